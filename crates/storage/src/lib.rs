pub mod error;
pub mod file;
pub mod ids;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use ids::{DEFAULT_SESSION_KEY, MessageId, SessionKey};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use store::{MessageStore, decode_snapshot, encode_snapshot};
pub use types::{Message, MessageText, Sender};

/// Raw string storage addressed by key, the durable layer under a [`MessageStore`].
///
/// Calls are synchronous: a conversation snapshot is small and callers treat
/// writes as instantaneous.
pub trait KeyValueBackend: Send + Sync {
    fn get(&self, key: &SessionKey) -> StorageResult<Option<String>>;
    /// Replaces any prior value for `key`.
    fn set(&self, key: &SessionKey, value: &str) -> StorageResult<()>;
    /// Removing an absent key is not an error.
    fn remove(&self, key: &SessionKey) -> StorageResult<()>;
}
