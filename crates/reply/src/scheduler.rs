use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use murmur_storage::{Message, MessageText, Sender};
use snafu::{ResultExt, Snafu};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::responder::{EchoResponder, Responder};

/// Delay the chat widget waits before the counterpart answers.
pub const DEFAULT_REPLY_DELAY: Duration = Duration::from_millis(1_000);

/// Routing key for one scheduled reply.
///
/// `epoch` changes whenever the owning session is cleared or torn down, so a
/// delivery can be matched against the conversation that asked for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplyTicket {
    pub epoch: u64,
    pub sequence: u64,
}

impl ReplyTicket {
    pub const fn new(epoch: u64, sequence: u64) -> Self {
        Self { epoch, sequence }
    }
}

impl fmt::Display for ReplyTicket {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.epoch, self.sequence)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReplyError {
    #[snafu(display("cannot schedule reply {ticket} outside a tokio runtime"))]
    NoRuntime {
        stage: &'static str,
        ticket: ReplyTicket,
        source: tokio::runtime::TryCurrentError,
    },
}

pub type ReplyResult<T> = Result<T, ReplyError>;

/// Called once the delay elapses. `None` means the responder produced blank
/// text and there is nothing to append, but the reply is still settled.
pub type DeliverFn = Box<dyn FnOnce(ReplyTicket, Option<Message>) + Send + 'static>;

/// Schedules delayed counterpart replies on the current tokio runtime.
#[derive(Clone)]
pub struct ReplyGenerator {
    responder: Arc<dyn Responder>,
    delay: Duration,
}

impl Default for ReplyGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_REPLY_DELAY, Arc::new(EchoResponder))
    }
}

impl ReplyGenerator {
    pub fn new(delay: Duration, responder: Arc<dyn Responder>) -> Self {
        Self { responder, delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn responder_id(&self) -> &str {
        self.responder.id()
    }

    /// Spawns a task that waits out the delay and hands the counterpart message
    /// to `deliver`. Cancelling or dropping the returned handle first means
    /// `deliver` never runs.
    pub fn schedule(
        &self,
        ticket: ReplyTicket,
        original: MessageText,
        deliver: DeliverFn,
    ) -> ReplyResult<ReplyHandle> {
        let runtime = tokio::runtime::Handle::try_current().context(NoRuntimeSnafu {
            stage: "reply-schedule",
            ticket,
        })?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = runtime.spawn(run_reply_worker(
            ticket,
            original,
            Arc::clone(&self.responder),
            self.delay,
            cancel_rx,
            deliver,
        ));

        tracing::debug!(%ticket, delay_ms = self.delay.as_millis() as u64, "reply scheduled");
        Ok(ReplyHandle {
            ticket,
            cancel_tx: Some(cancel_tx),
            task,
        })
    }
}

async fn run_reply_worker(
    ticket: ReplyTicket,
    original: MessageText,
    responder: Arc<dyn Responder>,
    delay: Duration,
    mut cancel_rx: oneshot::Receiver<()>,
    deliver: DeliverFn,
) {
    tokio::select! {
        // A dropped sender counts as cancellation too.
        _ = &mut cancel_rx => {
            tracing::debug!(%ticket, "reply cancelled before delivery");
            return;
        }
        _ = tokio::time::sleep(delay) => {}
    }

    let reply = MessageText::new(&responder.respond(&original))
        .map(|text| Message::now(text, Sender::Counterpart));
    if reply.is_none() {
        tracing::warn!(%ticket, responder = responder.id(), "responder produced blank reply");
    }

    deliver(ticket, reply);
}

/// Owner of one pending reply; dropping it cancels the reply.
pub struct ReplyHandle {
    ticket: ReplyTicket,
    cancel_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReplyHandle {
    pub fn ticket(&self) -> ReplyTicket {
        self.ticket
    }

    /// Returns `true` while the reply task is still alive, which includes the
    /// window where the delay has elapsed and `deliver` is running. Only a
    /// `true` that arrives during the delay prevents delivery. Returns `false`
    /// on a second call or once the task has finished.
    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl fmt::Debug for ReplyHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ReplyHandle")
            .field("ticket", &self.ticket)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

impl Drop for ReplyHandle {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}
