use std::fmt;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ids::MessageId;

/// Who authored a message. The wire spelling keeps the widget's `user`/`bot` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sender {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "bot")]
    Counterpart,
}

impl Sender {
    pub fn is_user(self) -> bool {
        matches!(self, Self::User)
    }
}

/// Trimmed, non-blank message content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageText(String);

impl MessageText {
    /// Returns `None` when the input is empty after trimming.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageText {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl Serialize for MessageText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MessageText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).ok_or_else(|| serde::de::Error::custom("message text must not be blank"))
    }
}

/// One immutable entry of a conversation log.
///
/// Field names and the `type` tag mirror the persisted JSON layout, so a
/// snapshot is just `Vec<Message>` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    text: MessageText,
    #[serde(
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    sender: Sender,
}

impl Message {
    /// `timestamp` is truncated to the millisecond precision the wire format keeps.
    pub fn new(id: MessageId, text: MessageText, timestamp: DateTime<Utc>, sender: Sender) -> Self {
        Self {
            id,
            text,
            timestamp: timestamp.trunc_subsecs(3),
            sender,
        }
    }

    /// Creates a message with a fresh id stamped at the current time.
    pub fn now(text: MessageText, sender: Sender) -> Self {
        Self::new(MessageId::new_v7(), text, Utc::now(), sender)
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn text(&self) -> &str {
        self.text.as_str()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    pub(crate) fn replace_id(&mut self, id: MessageId) -> MessageId {
        std::mem::replace(&mut self.id, id)
    }
}

fn serialize_timestamp<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    DateTime::<Utc>::deserialize(deserializer).map(|timestamp| timestamp.trunc_subsecs(3))
}
