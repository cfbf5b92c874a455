use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use murmur_reply::{DeliverFn, ReplyGenerator, ReplyHandle, ReplyTicket};
use murmur_storage::{Message, MessageId, MessageStore, MessageText, Sender, SessionKey};
use tokio::sync::watch;

use super::state::{ReplyPolicy, SessionOptions, SessionSnapshot, SessionState};

/// Single writer for one persisted conversation.
///
/// Every mutation updates the in-memory log, writes the full snapshot to the
/// [`MessageStore`] and publishes a [`SessionSnapshot`] before returning, so
/// readers never observe state that is not yet durable. Counterpart replies are
/// scheduled through the [`ReplyGenerator`]; the session owns their handles and
/// cancels them on teardown.
pub struct ChatSession {
    shared: Arc<SessionShared>,
}

struct SessionShared {
    key: SessionKey,
    store: MessageStore,
    replies: ReplyGenerator,
    policy: ReplyPolicy,
    log: Mutex<SessionLog>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

#[derive(Debug, Default)]
struct SessionLog {
    messages: Vec<Message>,
    pending: BTreeMap<ReplyTicket, ReplyHandle>,
    epoch: u64,
    next_sequence: u64,
    closed: bool,
}

impl SessionLog {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: Arc::from(self.messages.as_slice()),
            state: SessionState::from_outstanding(self.pending.len()),
            outstanding_replies: self.pending.len(),
            epoch: self.epoch,
        }
    }

    fn cancel_pending(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let cancelled = pending.len();
        for (_, mut handle) in pending {
            handle.cancel();
        }
        cancelled
    }
}

impl ChatSession {
    /// Hydrates the conversation stored under `options.key` and starts idle.
    pub fn initialize(store: MessageStore, replies: ReplyGenerator, options: SessionOptions) -> Self {
        let SessionOptions { key, policy } = options;
        let log = SessionLog {
            messages: store.load(&key),
            ..SessionLog::default()
        };
        let (snapshot_tx, _) = watch::channel(log.snapshot());

        tracing::info!(
            key = %key,
            messages = log.messages.len(),
            responder = replies.responder_id(),
            "chat session initialized"
        );

        Self {
            shared: Arc::new(SessionShared {
                key,
                store,
                replies,
                policy,
                log: Mutex::new(log),
                snapshot_tx,
            }),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.shared.key
    }

    pub fn policy(&self) -> ReplyPolicy {
        self.shared.policy
    }

    /// Appends a user message and schedules its counterpart reply.
    ///
    /// Returns `None` without touching the log or the store when `text` is
    /// blank after trimming.
    pub fn send(&self, text: &str) -> Option<MessageId> {
        let Some(text) = MessageText::new(text) else {
            tracing::trace!(key = %self.shared.key, "ignoring blank send");
            return None;
        };

        let mut log = self.shared.lock_log();
        if log.closed {
            tracing::warn!(key = %self.shared.key, "send on a closed session ignored");
            return None;
        }

        let message = Message::now(text.clone(), Sender::User);
        let message_id = message.id().clone();
        log.messages.push(message);
        self.shared.persist(&log);

        // Scheduled while the log lock is held, so a zero-delay reply cannot
        // reach `deliver_reply` before its handle is registered.
        let ticket = ReplyTicket::new(log.epoch, log.next_sequence);
        log.next_sequence += 1;
        match self
            .shared
            .replies
            .schedule(ticket, text, SessionShared::deliver_fn(&self.shared))
        {
            Ok(handle) => {
                log.pending.insert(ticket, handle);
            }
            Err(error) => {
                tracing::error!(key = %self.shared.key, %ticket, "reply not scheduled: {}", error);
            }
        }

        self.shared.publish(&log);
        Some(message_id)
    }

    /// Empties the conversation and deletes its persisted snapshot.
    ///
    /// Under [`ReplyPolicy::AlwaysComplete`] pending replies survive, so the
    /// state stays [`SessionState::AwaitingReply`] until they land.
    pub fn clear(&self) {
        let mut log = self.shared.lock_log();
        if log.closed {
            return;
        }

        log.messages.clear();
        log.epoch += 1;
        if self.shared.policy == ReplyPolicy::CancelOnClear {
            let cancelled = log.cancel_pending();
            if cancelled > 0 {
                tracing::debug!(key = %self.shared.key, cancelled, "pending replies cancelled by clear");
            }
        }

        self.shared.persist(&log);
        self.shared.publish(&log);
    }

    /// Tears the session down, cancelling every pending reply. Also runs on drop.
    pub fn shutdown(self) {
        drop(self);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot_tx.borrow().clone()
    }

    pub fn messages(&self) -> Arc<[Message]> {
        Arc::clone(&self.shared.snapshot_tx.borrow().messages)
    }

    pub fn state(&self) -> SessionState {
        self.shared.snapshot_tx.borrow().state
    }

    pub fn outstanding_replies(&self) -> usize {
        self.shared.snapshot_tx.borrow().outstanding_replies
    }

    /// Receives a fresh snapshot after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Resolves once no reply is outstanding.
    pub async fn settled(&self) {
        let mut updates = self.subscribe();
        let _ = updates
            .wait_for(|snapshot| snapshot.outstanding_replies == 0)
            .await;
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        let mut log = self.shared.lock_log();
        if log.closed {
            return;
        }

        log.closed = true;
        log.epoch += 1;
        let cancelled = log.cancel_pending();
        tracing::info!(key = %self.shared.key, cancelled, "chat session closed");
        self.shared.publish(&log);
    }
}

impl SessionShared {
    fn lock_log(&self) -> MutexGuard<'_, SessionLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, log: &SessionLog) {
        self.store.save(&self.key, &log.messages);
    }

    fn publish(&self, log: &SessionLog) {
        self.snapshot_tx.send_replace(log.snapshot());
    }

    fn deliver_fn(shared: &Arc<Self>) -> DeliverFn {
        let session = Arc::downgrade(shared);
        Box::new(move |ticket, reply| Self::deliver_to(&session, ticket, reply))
    }

    fn deliver_to(session: &Weak<Self>, ticket: ReplyTicket, reply: Option<Message>) {
        match session.upgrade() {
            Some(shared) => shared.deliver_reply(ticket, reply),
            None => tracing::debug!(%ticket, "reply dropped: session no longer exists"),
        }
    }

    /// Appends to the current log, not the one the reply was scheduled against.
    fn deliver_reply(&self, ticket: ReplyTicket, reply: Option<Message>) {
        let mut log = self.lock_log();
        if log.pending.remove(&ticket).is_none() {
            tracing::debug!(key = %self.key, %ticket, epoch = log.epoch, "discarding stale reply");
            return;
        }

        if let Some(message) = reply {
            log.messages.push(message);
            self.persist(&log);
        }
        self.publish(&log);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use murmur_storage::{KeyValueBackend, MemoryBackend};

    use super::*;

    struct Fixture {
        backend: Arc<MemoryBackend>,
        store: MessageStore,
        key: SessionKey,
    }

    impl Fixture {
        fn new() -> Self {
            let backend = Arc::new(MemoryBackend::new());
            Self {
                store: MessageStore::new(backend.clone()),
                backend,
                key: SessionKey::default(),
            }
        }

        fn session(&self, policy: ReplyPolicy) -> ChatSession {
            ChatSession::initialize(
                self.store.clone(),
                ReplyGenerator::default(),
                SessionOptions::new(self.key.clone(), policy),
            )
        }

        fn persisted(&self) -> Vec<Message> {
            self.store.load(&self.key)
        }
    }

    fn texts(messages: &[Message]) -> Vec<(Sender, String)> {
        messages
            .iter()
            .map(|message| (message.sender(), message.text().to_string()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn blank_send_is_a_silent_noop() {
        let fixture = Fixture::new();
        let session = fixture.session(ReplyPolicy::default());
        let mut updates = session.subscribe();

        for blank in ["", "   ", "\n\t "] {
            assert_eq!(session.send(blank), None);
        }

        assert!(session.messages().is_empty());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!fixture.backend.contains(&fixture.key));
        assert!(!updates.has_changed().expect("sender alive"));
    }

    #[tokio::test(start_paused = true)]
    async fn send_is_durable_before_the_reply_arrives() {
        let fixture = Fixture::new();
        let session = fixture.session(ReplyPolicy::default());

        let id = session.send("  Hello ").expect("message id");

        let messages = session.messages();
        assert_eq!(texts(&messages), vec![(Sender::User, "Hello".to_string())]);
        assert_eq!(messages[0].id(), &id);
        assert_eq!(fixture.persisted(), messages.to_vec());
        assert_eq!(session.state(), SessionState::AwaitingReply);
        assert_eq!(session.outstanding_replies(), 1);

        tokio::time::sleep(Duration::from_millis(1_001)).await;

        assert_eq!(
            texts(&session.messages()),
            vec![
                (Sender::User, "Hello".to_string()),
                (Sender::Counterpart, "Echo: Hello".to_string()),
            ]
        );
        assert_eq!(fixture.persisted(), session.messages().to_vec());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn reply_timestamp_is_not_before_user_message() {
        let fixture = Fixture::new();
        let session = fixture.session(ReplyPolicy::default());
        session.send("ping");
        session.settled().await;

        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].timestamp() >= messages[0].timestamp());
        assert_ne!(messages[0].id(), messages[1].id());
    }

    #[tokio::test(start_paused = true)]
    async fn state_stays_awaiting_until_every_reply_lands() {
        let fixture = Fixture::new();
        let session = fixture.session(ReplyPolicy::default());

        session.send("one");
        tokio::time::sleep(Duration::from_millis(400)).await;
        session.send("two");
        assert_eq!(session.outstanding_replies(), 2);

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(session.outstanding_replies(), 1);
        assert_eq!(session.state(), SessionState::AwaitingReply);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(
            texts(&session.messages()),
            vec![
                (Sender::User, "one".to_string()),
                (Sender::Counterpart, "Echo: one".to_string()),
                (Sender::User, "two".to_string()),
                (Sender::Counterpart, "Echo: two".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clear_deletes_the_key_and_cancels_pending_replies() {
        let fixture = Fixture::new();
        let session = fixture.session(ReplyPolicy::CancelOnClear);
        session.send("Hello");
        assert!(fixture.backend.contains(&fixture.key));

        session.clear();

        assert!(session.messages().is_empty());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.snapshot().epoch, 1);
        assert!(!fixture.backend.contains(&fixture.key));
        assert_eq!(fixture.backend.get(&fixture.key).expect("read"), None);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert!(session.messages().is_empty());
        assert!(!fixture.backend.contains(&fixture.key));
    }

    #[tokio::test(start_paused = true)]
    async fn always_complete_lets_pending_reply_land_after_clear() {
        let fixture = Fixture::new();
        let session = fixture.session(ReplyPolicy::AlwaysComplete);
        session.send("Hello");

        session.clear();
        assert!(session.messages().is_empty());
        assert_eq!(session.state(), SessionState::AwaitingReply);
        assert_eq!(session.outstanding_replies(), 1);

        session.settled().await;
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(
            texts(&session.messages()),
            vec![(Sender::Counterpart, "Echo: Hello".to_string())]
        );
        assert_eq!(fixture.persisted(), session.messages().to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_cancels_pending_replies() {
        let fixture = Fixture::new();
        let session = fixture.session(ReplyPolicy::AlwaysComplete);
        session.send("Hello");
        let persisted_at_teardown = fixture.persisted();

        session.shutdown();
        tokio::time::sleep(Duration::from_millis(2_000)).await;

        assert_eq!(fixture.persisted(), persisted_at_teardown);
        assert_eq!(persisted_at_teardown.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_hydrates_the_previous_conversation() {
        let fixture = Fixture::new();
        {
            let session = fixture.session(ReplyPolicy::default());
            session.send("remember me");
            session.settled().await;
        }

        let reloaded = fixture.session(ReplyPolicy::default());
        assert_eq!(
            texts(&reloaded.messages()),
            vec![
                (Sender::User, "remember me".to_string()),
                (Sender::Counterpart, "Echo: remember me".to_string()),
            ]
        );
        assert_eq!(reloaded.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_snapshot_starts_an_empty_session() {
        let fixture = Fixture::new();
        fixture
            .backend
            .set(&fixture.key, "{ definitely not a message list")
            .expect("seed corrupt payload");

        let session = fixture.session(ReplyPolicy::default());

        assert!(session.messages().is_empty());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_keeps_memory_authoritative() {
        let backend = Arc::new(MemoryBackend::with_quota(16));
        let store = MessageStore::new(backend.clone());
        let session =
            ChatSession::initialize(store, ReplyGenerator::default(), SessionOptions::default());

        session.send("this will not fit in sixteen bytes");
        session.settled().await;

        assert_eq!(session.messages().len(), 2);
        assert!(backend.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_every_mutation() {
        let fixture = Fixture::new();
        let session = fixture.session(ReplyPolicy::default());
        let mut updates = session.subscribe();

        session.send("watch me");
        updates.changed().await.expect("send update");
        assert_eq!(updates.borrow_and_update().messages.len(), 1);

        updates.changed().await.expect("reply update");
        let snapshot = updates.borrow_and_update().clone();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.state, SessionState::Idle);

        session.clear();
        updates.changed().await.expect("clear update");
        assert!(updates.borrow().is_empty());
    }
}
