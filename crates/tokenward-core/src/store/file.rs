use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use tracing::debug;

use super::KeyValueStore;

/// Credentials file name in the cache directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// All keys live in one JSON object on disk. Every write replaces the whole
/// file through a temp file + rename, so a multi-key write is never observed
/// half-applied by another reader.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (without creating) the credentials file inside `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::at_path(dir.as_ref().join(CREDENTIALS_FILE))
    }

    pub fn at_path(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read credentials file {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse credentials file {}", self.path.display()))
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        if entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).context("Failed to remove credentials file")?;
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create credentials directory")?;
        }

        let contents = serde_json::to_string_pretty(entries)?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, contents).context("Failed to write credentials temp file")?;
        restrict_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, &self.path).context("Failed to replace credentials file")?;
        debug!(path = %self.path.display(), keys = entries.len(), "Credentials file written");
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .context("Failed to restrict credentials file permissions")
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let mut all = self.read_all()?;
        Ok(keys.iter().map(|key| all.remove(*key)).collect())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all = self.read_all()?;
        for (key, value) in entries {
            all.insert((*key).to_string(), (*value).to_string());
        }
        self.write_all(&all)
    }

    fn delete_many(&self, keys: &[&str]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all = self.read_all()?;
        let before = all.len();
        for key in keys {
            all.remove(*key);
        }
        if all.len() == before {
            return Ok(());
        }
        self.write_all(&all)
    }
}
