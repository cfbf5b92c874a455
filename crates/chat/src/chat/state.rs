use std::sync::Arc;

use murmur_storage::{Message, SessionKey};
use serde::{Deserialize, Serialize};

/// Whether the session is waiting on at least one counterpart reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingReply,
}

impl SessionState {
    pub fn from_outstanding(outstanding_replies: usize) -> Self {
        if outstanding_replies == 0 {
            Self::Idle
        } else {
            Self::AwaitingReply
        }
    }
}

/// What happens to replies still in flight when the conversation is cleared.
///
/// Tearing a session down always cancels them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyPolicy {
    #[default]
    CancelOnClear,
    /// Pending replies still land, in the cleared log.
    AlwaysComplete,
}

/// Which conversation a session drives and how it treats in-flight replies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionOptions {
    pub key: SessionKey,
    pub policy: ReplyPolicy,
}

impl SessionOptions {
    pub fn new(key: SessionKey, policy: ReplyPolicy) -> Self {
        Self { key, policy }
    }
}

/// Read-only view handed to renderers after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub messages: Arc<[Message]>,
    pub state: SessionState,
    pub outstanding_replies: usize,
    /// Bumped by every clear, so renderers can tell a reset from an append.
    pub epoch: u64,
}

impl SessionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_reflects_any_outstanding_reply() {
        assert_eq!(SessionState::from_outstanding(0), SessionState::Idle);
        assert_eq!(SessionState::from_outstanding(1), SessionState::AwaitingReply);
        assert_eq!(SessionState::from_outstanding(7), SessionState::AwaitingReply);
    }

    #[test]
    fn reply_policy_uses_snake_case_names() {
        assert_eq!(
            serde_json::to_string(&ReplyPolicy::AlwaysComplete).expect("serialize"),
            "\"always_complete\""
        );
        assert_eq!(
            serde_json::from_str::<ReplyPolicy>("\"cancel_on_clear\"").expect("deserialize"),
            ReplyPolicy::CancelOnClear
        );
    }
}
