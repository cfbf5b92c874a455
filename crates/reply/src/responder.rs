use murmur_storage::MessageText;

/// Prefix the local echo responder puts in front of the user's text.
pub const ECHO_PREFIX: &str = "Echo: ";

/// Produces the counterpart's text for one user message.
///
/// Implementations must be deterministic and must not block; the delay is
/// applied by [`crate::ReplyGenerator`], not here.
pub trait Responder: Send + Sync {
    fn id(&self) -> &str;
    fn respond(&self, original: &MessageText) -> String;
}

/// Stand-in for a real backend: repeats the user's message back.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoResponder;

impl Responder for EchoResponder {
    fn id(&self) -> &str {
        "echo"
    }

    fn respond(&self, original: &MessageText) -> String {
        format!("{ECHO_PREFIX}{original}")
    }
}
