use std::sync::Arc;

use murmur_reply::{EchoResponder, ReplyGenerator};
use murmur_storage::{
    FileBackend, KeyValueBackend, MemoryBackend, MessageStore, SessionKey, SqliteBackend,
    StorageError,
};
use snafu::{ResultExt, Snafu};

use crate::chat::{ChatSession, SessionOptions};
use crate::settings::{BackendKind, Settings};

pub const CONVERSATIONS_DIRECTORY_NAME: &str = "conversations";
pub const SQLITE_FILE_NAME: &str = "murmur.db";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("invalid storage key {key:?} on `{stage}`: {source}"))]
    InvalidStorageKey {
        stage: &'static str,
        key: String,
        source: StorageError,
    },
    #[snafu(display("failed to open {backend:?} backend on `{stage}`: {source}"))]
    OpenBackend {
        stage: &'static str,
        backend: BackendKind,
        source: StorageError,
    },
}

/// Builds the backend named by `settings`.
pub async fn open_backend(settings: &Settings) -> Result<Arc<dyn KeyValueBackend>, SessionError> {
    let backend: Arc<dyn KeyValueBackend> = match settings.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::File => Arc::new(FileBackend::new(
            settings.data_dir.join(CONVERSATIONS_DIRECTORY_NAME),
        )),
        BackendKind::Sqlite => {
            let location = settings.data_dir.join(SQLITE_FILE_NAME);
            let backend = SqliteBackend::open(&location.display().to_string())
                .await
                .context(OpenBackendSnafu {
                    stage: "open-sqlite-backend",
                    backend: BackendKind::Sqlite,
                })?;
            Arc::new(backend)
        }
    };

    tracing::info!(backend = ?settings.backend, data_dir = ?settings.data_dir, "storage backend ready");
    Ok(backend)
}

/// Opens the configured backend and hydrates the session stored under the
/// configured key. Must run inside a tokio runtime.
pub async fn open_session(settings: &Settings) -> Result<ChatSession, SessionError> {
    let key = SessionKey::parse(&settings.storage_key).context(InvalidStorageKeySnafu {
        stage: "parse-storage-key",
        key: settings.storage_key.clone(),
    })?;
    let store = MessageStore::new(open_backend(settings).await?);
    let replies = ReplyGenerator::new(settings.reply_delay(), Arc::new(EchoResponder));

    Ok(ChatSession::initialize(
        store,
        replies,
        SessionOptions::new(key, settings.reply_policy),
    ))
}
