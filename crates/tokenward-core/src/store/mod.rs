//! Durable key/value backends for credentials.
//!
//! The engine only needs to read keys, write several keys as one logical
//! write, and delete several keys as one logical write.
//! Missing keys read as `None` and deleting them is not an error, so a first
//! run looks the same as an empty store.
//!
//! Backends:
//! - `FileStore`: a JSON map on disk, replaced atomically on every write
//! - `KeyringStore`: one OS keychain entry per key
//! - `MemoryStore`: process-local, for tests and ephemeral sessions

pub mod file;
pub mod keyring;
pub mod memory;

use anyhow::Result;

pub use self::file::FileStore;
pub use self::keyring::KeyringStore;
pub use self::memory::MemoryStore;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Read several keys, in order. Backends that can read one snapshot
    /// override this so related keys are never mixed across two writes.
    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()>;

    fn delete_many(&self, keys: &[&str]) -> Result<()>;
}
