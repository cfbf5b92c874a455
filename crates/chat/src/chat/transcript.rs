use chrono::TimeZone;
use murmur_storage::{Message, Sender};

use super::state::{SessionSnapshot, SessionState};

/// Single-letter avatar shown next to each message.
pub fn avatar(sender: Sender) -> char {
    match sender {
        Sender::User => 'U',
        Sender::Counterpart => 'B',
    }
}

/// `HH:MM  U  text`, with the time shown in `zone`.
pub fn render_line<Tz>(message: &Message, zone: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}  {}  {}",
        message.timestamp().with_timezone(zone).format("%H:%M"),
        avatar(message.sender()),
        message.text()
    )
}

pub fn render_status(state: SessionState) -> Option<&'static str> {
    match state {
        SessionState::Idle => None,
        SessionState::AwaitingReply => Some("..."),
    }
}

/// What changed since the previous snapshot a renderer saw.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TranscriptUpdate {
    pub cleared: bool,
    pub fresh: Vec<Message>,
}

/// Tracks how much of the log has already been printed.
#[derive(Debug, Clone, Default)]
pub struct TranscriptCursor {
    epoch: u64,
    rendered: usize,
}

impl TranscriptCursor {
    pub fn advance(&mut self, snapshot: &SessionSnapshot) -> TranscriptUpdate {
        let cleared = snapshot.epoch != self.epoch || snapshot.messages.len() < self.rendered;
        if cleared {
            self.epoch = snapshot.epoch;
            self.rendered = 0;
        }

        let fresh = snapshot.messages[self.rendered..].to_vec();
        self.rendered = snapshot.messages.len();
        TranscriptUpdate { cleared, fresh }
    }
}
