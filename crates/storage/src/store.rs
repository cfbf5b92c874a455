use std::collections::HashSet;
use std::sync::Arc;

use snafu::ResultExt;

use super::error::{DecodeSnapshotSnafu, EncodeSnapshotSnafu, StorageResult};
use super::ids::{MessageId, SessionKey};
use super::types::Message;
use super::KeyValueBackend;

/// Snapshot persistence for ordered conversation logs.
///
/// Every save writes the whole log under one key, so the durable value never
/// drifts from what the caller holds in memory. Reads and writes never fail
/// outward: corrupt payloads load as an empty log and write failures are logged.
#[derive(Clone)]
pub struct MessageStore {
    backend: Arc<dyn KeyValueBackend>,
}

impl MessageStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn KeyValueBackend> {
        &self.backend
    }

    /// Loads the log stored under `key`, or an empty log when absent or unreadable.
    pub fn load(&self, key: &SessionKey) -> Vec<Message> {
        match self.try_load(key) {
            Ok(messages) => messages,
            Err(error) => {
                tracing::warn!(key = %key, "discarding unreadable conversation snapshot: {}", error);
                Vec::new()
            }
        }
    }

    pub fn try_load(&self, key: &SessionKey) -> StorageResult<Vec<Message>> {
        match self.backend.get(key)? {
            Some(raw) => decode_snapshot(&raw),
            None => Ok(Vec::new()),
        }
    }

    /// Replaces the stored log with `messages`; an empty log deletes the key.
    pub fn save(&self, key: &SessionKey, messages: &[Message]) {
        if let Err(error) = self.try_save(key, messages) {
            tracing::warn!(
                key = %key,
                messages = messages.len(),
                "conversation snapshot was not persisted: {}",
                error
            );
        }
    }

    pub fn try_save(&self, key: &SessionKey, messages: &[Message]) -> StorageResult<()> {
        if messages.is_empty() {
            return self.backend.remove(key);
        }

        let payload = encode_snapshot(messages)?;
        self.backend.set(key, &payload)
    }
}

pub fn encode_snapshot(messages: &[Message]) -> StorageResult<String> {
    serde_json::to_string(messages).context(EncodeSnapshotSnafu {
        stage: "encode-snapshot",
    })
}

/// Parses a persisted log, rejecting the payload as a whole if any entry is invalid.
///
/// Millisecond ids from older payloads can collide; every repeat after the
/// first keeps its message and gets a fresh id.
pub fn decode_snapshot(raw: &str) -> StorageResult<Vec<Message>> {
    let mut messages = serde_json::from_str::<Vec<Message>>(raw).context(DecodeSnapshotSnafu {
        stage: "decode-snapshot",
    })?;

    let mut seen = HashSet::with_capacity(messages.len());
    for message in &mut messages {
        if seen.insert(message.id().clone()) {
            continue;
        }

        let fresh = MessageId::new_v7();
        seen.insert(fresh.clone());
        let repeated = message.replace_id(fresh);
        tracing::warn!(
            repeated = %repeated,
            reassigned = %message.id(),
            "duplicate message id in stored snapshot"
        );
    }

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::error::StorageError;
    use crate::memory::MemoryBackend;
    use crate::types::{MessageText, Sender};

    fn fixture_log() -> Vec<Message> {
        let start = Utc
            .with_ymd_and_hms(2024, 5, 1, 9, 30, 0)
            .single()
            .expect("valid timestamp");
        ["Hello", "Echo: Hello", "How are you?"]
            .iter()
            .enumerate()
            .map(|(index, text)| {
                let sender = if index % 2 == 0 {
                    Sender::User
                } else {
                    Sender::Counterpart
                };
                Message::new(
                    MessageId::new_v7(),
                    MessageText::new(text).expect("fixture text"),
                    start + Duration::milliseconds(index as i64 * 1_250),
                    sender,
                )
            })
            .collect()
    }

    fn store_with_backend() -> (MessageStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (MessageStore::new(backend.clone()), backend)
    }

    #[test]
    fn missing_key_loads_empty_log() {
        let (store, _) = store_with_backend();
        assert!(store.load(&SessionKey::default()).is_empty());
    }

    #[test]
    fn saved_log_loads_back_in_insertion_order() {
        let (store, _) = store_with_backend();
        let key = SessionKey::default();
        let log = fixture_log();

        store.save(&key, &log);

        assert_eq!(store.load(&key), log);
    }

    #[test]
    fn saving_empty_log_removes_the_key() {
        let (store, backend) = store_with_backend();
        let key = SessionKey::default();
        store.save(&key, &fixture_log());
        assert!(backend.contains(&key));

        store.save(&key, &[]);

        assert!(!backend.contains(&key));
        assert!(store.load(&key).is_empty());
    }

    #[test]
    fn save_overwrites_rather_than_appends() {
        let (store, _) = store_with_backend();
        let key = SessionKey::default();
        let log = fixture_log();
        store.save(&key, &log);

        store.save(&key, &log[..1]);

        assert_eq!(store.load(&key), log[..1].to_vec());
    }

    #[test]
    fn corrupt_payloads_load_as_empty() {
        let (store, backend) = store_with_backend();
        let key = SessionKey::default();

        for payload in [
            "not json at all",
            "{\"id\":\"1\"}",
            "[{\"id\":\"1\",\"text\":\"hi\"}]",
            "[{\"id\":\"1\",\"text\":\"hi\",\"timestamp\":\"yesterday\",\"type\":\"user\"}]",
            "[{\"id\":\"1\",\"text\":\"hi\",\"timestamp\":\"2024-05-01T09:30:00.000Z\",\"type\":\"robot\"}]",
            "[{\"id\":\"1\",\"text\":\"  \",\"timestamp\":\"2024-05-01T09:30:00.000Z\",\"type\":\"user\"}]",
        ] {
            backend.set(&key, payload).expect("seed payload");
            assert!(store.load(&key).is_empty(), "payload should be rejected: {payload}");
        }
    }

    #[test]
    fn duplicate_ids_are_reassigned_not_rejected() {
        let raw = r#"[
            {"id":"7","text":"a","timestamp":"2024-05-01T09:30:00.000Z","type":"user"},
            {"id":"7","text":"b","timestamp":"2024-05-01T09:30:01.000Z","type":"bot"}
        ]"#;

        let messages = decode_snapshot(raw).expect("duplicate ids are repaired");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id().as_str(), "7");
        assert_ne!(messages[1].id(), messages[0].id());
        assert_eq!(messages[1].text(), "b");
    }

    #[test]
    fn widget_payload_with_same_millisecond_ids_keeps_every_message() {
        let (store, backend) = store_with_backend();
        let key = SessionKey::default();
        let raw = r#"[
            {"id":"1714555800000","text":"Hello","timestamp":"2024-05-01T09:30:00.000Z","type":"user"},
            {"id":"1714555800000","text":"Hello again","timestamp":"2024-05-01T09:30:00.000Z","type":"user"},
            {"id":"1714555801001","text":"Echo: Hello","timestamp":"2024-05-01T09:30:01.001Z","type":"bot"}
        ]"#;
        backend.set(&key, raw).expect("seed payload");

        let loaded = store.load(&key);

        assert_eq!(
            loaded.iter().map(Message::text).collect::<Vec<_>>(),
            vec!["Hello", "Hello again", "Echo: Hello"]
        );
        let ids = loaded.iter().map(Message::id).collect::<HashSet<_>>();
        assert_eq!(ids.len(), 3);
        assert_eq!(loaded[0].id().as_str(), "1714555800000");
        assert_eq!(loaded[2].id().as_str(), "1714555801001");

        store.save(&key, &loaded);
        assert_eq!(store.load(&key), loaded);
    }

    #[test]
    fn nanosecond_timestamps_survive_save_and_load() {
        let (store, _) = store_with_backend();
        let key = SessionKey::default();
        let precise = Utc
            .with_ymd_and_hms(2026, 10, 19, 20, 14, 29)
            .single()
            .expect("valid timestamp")
            + Duration::nanoseconds(2_088_825);
        let log = vec![Message::new(
            MessageId::new_v7(),
            MessageText::new("precise").expect("text"),
            precise,
            Sender::User,
        )];

        store.save(&key, &log);

        assert_eq!(store.load(&key), log);
    }

    #[test]
    fn widget_payload_with_epoch_ids_is_readable() {
        let raw = r#"[
            {"id":"1714555800000","text":"Hello","timestamp":"2024-05-01T09:30:00.000Z","type":"user"},
            {"id":"1714555801001","text":"Echo: Hello","timestamp":"2024-05-01T09:30:01.001Z","type":"bot"}
        ]"#;

        let messages = decode_snapshot(raw).expect("widget payload");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id().as_str(), "1714555800000");
        assert_eq!(messages[1].sender(), Sender::Counterpart);
        assert_eq!(messages[1].text(), "Echo: Hello");
    }

    #[test]
    fn write_failure_is_swallowed_by_save() {
        let backend = Arc::new(MemoryBackend::with_quota(64));
        let store = MessageStore::new(backend.clone());
        let key = SessionKey::default();

        store.save(&key, &fixture_log());

        assert!(!backend.contains(&key));
        assert!(matches!(
            store.try_save(&key, &fixture_log()),
            Err(StorageError::QuotaExceeded { .. })
        ));
    }
}
