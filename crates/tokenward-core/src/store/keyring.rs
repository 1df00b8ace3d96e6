use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use ::keyring::{Entry, Error as KeyringError};

use super::KeyValueStore;

const SERVICE_NAME: &str = "tokenward";

/// One OS keychain entry per key under a single service name.
///
/// The keychain has no multi-key transactions: `set_many` writes entries in
/// order and stops at the first failure.
///
/// Entries are created once per key and reused. Credential handles from the
/// platform stores are stateless, the mock store keeps its value inside the
/// handle.
pub struct KeyringStore {
    service: String,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the entry for `key`, creating it on first use.
    fn with_entry<T>(&self, key: &str, f: impl FnOnce(&Entry) -> Result<T>) -> Result<T> {
        let mut entries = self.entries();
        if !entries.contains_key(key) {
            let entry = Entry::new(&self.service, key).context("Failed to create keyring entry")?;
            entries.insert(key.to_string(), entry);
        }
        match entries.get(key) {
            Some(entry) => f(entry),
            None => anyhow::bail!("keyring entry for {} vanished", key),
        }
    }
}

impl KeyValueStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(KeyringError::NoEntry) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {} from keychain", key)),
        })
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        for (key, value) in entries {
            self.with_entry(key, |entry| {
                entry
                    .set_password(value)
                    .with_context(|| format!("Failed to store {} in keychain", key))
            })?;
        }
        Ok(())
    }

    fn delete_many(&self, keys: &[&str]) -> Result<()> {
        // Attempt every key even if one fails, then report the first failure.
        let mut first_error = None;
        for key in keys {
            let result = self.with_entry(key, |entry| match entry.delete_credential() {
                Ok(()) | Err(KeyringError::NoEntry) => Ok(()),
                Err(e) => Err(e).with_context(|| format!("Failed to delete {} from keychain", key)),
            });
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
