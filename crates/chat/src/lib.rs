//! A persisted chat session: user messages, delayed counterpart replies, and
//! the settings that wire them to a storage backend.

pub mod bootstrap;
pub mod chat;
pub mod settings;

pub use bootstrap::{SessionError, open_backend, open_session};
pub use chat::{ChatSession, ReplyPolicy, SessionOptions, SessionSnapshot, SessionState};
pub use settings::{BackendKind, Settings, SettingsError, SettingsStore};
