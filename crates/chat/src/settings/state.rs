use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use murmur_reply::DEFAULT_REPLY_DELAY;
use murmur_storage::DEFAULT_SESSION_KEY;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::chat::ReplyPolicy;

pub const SETTINGS_DIRECTORY_NAME: &str = "murmur";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "MURMUR_";

/// Where conversation snapshots are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Lost when the process exits.
    Memory,
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_reply_delay_ms")]
    pub reply_delay_ms: u64,
    #[serde(default)]
    pub reply_policy: ReplyPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
            backend: BackendKind::default(),
            data_dir: default_data_dir(),
            reply_delay_ms: default_reply_delay_ms(),
            reply_policy: ReplyPolicy::default(),
        }
    }
}

impl Settings {
    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.reply_delay_ms)
    }

    pub fn normalized(mut self) -> Self {
        self.storage_key = if self.storage_key.trim().is_empty() {
            default_storage_key()
        } else {
            self.storage_key.trim().to_string()
        };
        if self.data_dir.as_os_str().is_empty() {
            self.data_dir = default_data_dir();
        }

        self
    }
}

/// Current settings plus the file they were read from.
pub struct SettingsStore {
    settings: Arc<ArcSwap<Settings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".murmur"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_sources(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: Settings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    /// Defaults, then the JSON file, then `MURMUR_*` variables.
    fn load_from_sources(path: &Path) -> Settings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }

        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<Settings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                Settings::default()
            }
        }
    }

    fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateSettingsDirSnafu {
                stage: "settings-create-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(EncodeSettingsSnafu {
            stage: "settings-encode-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteSettingsSnafu {
            stage: "settings-write-temp",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(ReplaceSettingsSnafu {
            stage: "settings-replace",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = ?self.config_path, "settings saved");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("cannot create settings directory {path:?} on `{stage}`: {source}"))]
    CreateSettingsDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot encode settings as JSON on `{stage}`: {source}"))]
    EncodeSettings {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("cannot write settings to {path:?} on `{stage}`: {source}"))]
    WriteSettings {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot move {from:?} over {to:?} on `{stage}`: {source}"))]
    ReplaceSettings {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_storage_key() -> String {
    DEFAULT_SESSION_KEY.to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".murmur"))
}

fn default_reply_delay_ms() -> u64 {
    DEFAULT_REPLY_DELAY.as_millis() as u64
}
