pub mod state;

pub use state::{BackendKind, Settings, SettingsError, SettingsStore};
