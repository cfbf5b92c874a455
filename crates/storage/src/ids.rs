use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::ensure;
use uuid::Uuid;

use super::error::{InvalidKeySnafu, StorageError, StorageResult};

// String-backed identifiers share one definition.
macro_rules! define_opaque_id {
    ($name:ident, $id_type:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: &str) -> StorageResult<Self> {
                let trimmed = raw.trim();
                ensure!(
                    !trimmed.is_empty(),
                    InvalidKeySnafu {
                        stage: "parse-opaque-id",
                        details: format!("{} must not be blank", $id_type),
                    }
                );
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = StorageError;

            fn try_from(raw: String) -> StorageResult<Self> {
                Self::parse(&raw)
            }
        }

        impl FromStr for $name {
            type Err = StorageError;

            fn from_str(raw: &str) -> StorageResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_opaque_id!(MessageId, "message-id");
define_opaque_id!(SessionKey, "session-key");

impl MessageId {
    /// Mints a time-ordered id. Persisted ids of any other shape are still accepted by `parse`.
    pub fn new_v7() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

/// Key under which the original chat widget kept its conversation.
pub const DEFAULT_SESSION_KEY: &str = "elevenlabs-chat-messages";

impl Default for SessionKey {
    fn default() -> Self {
        Self(DEFAULT_SESSION_KEY.to_string())
    }
}
