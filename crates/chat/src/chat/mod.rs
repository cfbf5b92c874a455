pub mod session;
pub mod state;
pub mod transcript;

pub use session::ChatSession;
pub use state::{ReplyPolicy, SessionOptions, SessionSnapshot, SessionState};
pub use transcript::{TranscriptCursor, TranscriptUpdate, avatar, render_line, render_status};
