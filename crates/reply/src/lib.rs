//! Deterministic, delayed counterpart replies for the chat session.

mod responder;
mod scheduler;

pub use responder::{ECHO_PREFIX, EchoResponder, Responder};
pub use scheduler::{
    DEFAULT_REPLY_DELAY, DeliverFn, ReplyError, ReplyGenerator, ReplyHandle, ReplyResult,
    ReplyTicket,
};
