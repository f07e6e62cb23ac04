//! Connection lifecycle: handshake, membership check, registration, read
//! loop and teardown for one client.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, close_code};
use futures::{Sink, SinkExt, Stream, StreamExt};
use groupchat_core::validation::validate_frame;
use groupchat_core::{
    AuthError, ChannelId, FrameError, NewMessage, PersistedMessage, ResultFrame, ServiceError,
    UserId,
};
use metrics::{counter, gauge};
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::connection::{CLOSE_TIMEOUT, ClientConnection, run_delivery_loop};
use crate::context::ChatContext;
use crate::metrics::{
    CHAT_MESSAGES_REJECTED_TOTAL, CHAT_MESSAGES_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_HANDSHAKE_REJECTIONS_TOTAL,
};

/// Read errors tolerated back to back before the connection is dropped.
/// Each one is still reported to the client.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 3;

/// How long teardown waits for the delivery loop before aborting it.
const DELIVERY_STOP_TIMEOUT: std::time::Duration = CLOSE_TIMEOUT.saturating_mul(3);

/// Why a connection was refused before registration.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Path segment is not a non-negative integer.
    #[error("invalid channel id")]
    InvalidChannel,
    /// Credential missing or rejected.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// User does not belong to the channel, or membership could not be checked.
    #[error("you are not a member of this channel")]
    NotMember,
}

impl HandshakeError {
    fn reason(&self) -> &'static str {
        match self {
            Self::InvalidChannel => "invalid_channel",
            Self::Auth(AuthError::MissingToken) => "missing_token",
            Self::Auth(_) => "invalid_token",
            Self::NotMember => "not_member",
        }
    }
}

/// What to do with one inbound payload.
#[derive(Debug)]
pub enum FrameOutcome {
    /// Nothing to do (empty payload).
    Ignore,
    /// Reply to the sender only.
    Rejected(ResultFrame),
    /// Persisted; acknowledge and broadcast.
    Accepted(PersistedMessage),
}

/// Runs connections against a shared [`ChatContext`].
#[derive(Clone)]
pub struct ConnectionHandler {
    ctx: Arc<ChatContext>,
}

impl ConnectionHandler {
    /// Handler over `ctx`.
    pub fn new(ctx: Arc<ChatContext>) -> Self {
        Self { ctx }
    }

    /// Shared context.
    pub fn context(&self) -> &Arc<ChatContext> {
        &self.ctx
    }

    /// Authenticate and check membership. Never registers anything.
    pub async fn authorize(
        &self,
        raw_channel: &str,
        token: Option<&str>,
    ) -> Result<(ChannelId, UserId), HandshakeError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::MissingToken)?;
        let user_id = self.ctx.collaborators.auth.verify(token).await?;
        let channel_id: ChannelId = raw_channel
            .parse()
            .map_err(|_| HandshakeError::InvalidChannel)?;

        match self
            .ctx
            .collaborators
            .membership
            .is_member(channel_id, user_id)
            .await
        {
            Ok(true) => Ok((channel_id, user_id)),
            Ok(false) => Err(HandshakeError::NotMember),
            Err(e) => {
                error!(%channel_id, %user_id, error = %e, detail = e.detail(), "membership check failed");
                Err(HandshakeError::NotMember)
            }
        }
    }

    /// Validate one payload and persist it if it passes.
    pub async fn process_frame(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        raw: &[u8],
    ) -> FrameOutcome {
        if raw.is_empty() {
            return FrameOutcome::Ignore;
        }

        let body = match validate_frame(raw, self.ctx.max_frame_bytes) {
            Ok(body) => body,
            Err(e) => {
                counter!(CHAT_MESSAGES_REJECTED_TOTAL, "reason" => frame_reason(&e)).increment(1);
                debug!(%channel_id, %user_id, error = %e, len = raw.len(), "frame rejected");
                return FrameOutcome::Rejected(ResultFrame::from_error(&e));
            }
        };

        let message = NewMessage {
            channel_id,
            author_id: user_id,
            body,
        };
        match self.ctx.collaborators.store.persist(message).await {
            Ok(persisted) => FrameOutcome::Accepted(persisted),
            Err(e) => {
                counter!(CHAT_MESSAGES_REJECTED_TOTAL, "reason" => service_reason(&e)).increment(1);
                FrameOutcome::Rejected(ResultFrame::from_error(&e))
            }
        }
    }

    /// Drive one connection from handshake to teardown.
    ///
    /// `sink` and `stream` are the two halves of the client socket. Rejected
    /// handshakes get a single error frame followed by a close frame.
    pub async fn run<S, R, E>(&self, mut sink: S, stream: R, raw_channel: String, token: Option<String>)
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display + Send,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display + Send,
    {
        let (channel_id, user_id) = match self.authorize(&raw_channel, token.as_deref()).await {
            Ok(ids) => ids,
            Err(err) => {
                info!(channel = %raw_channel, error = %err, "handshake rejected");
                counter!(WS_HANDSHAKE_REJECTIONS_TOTAL, "reason" => err.reason()).increment(1);
                let frame = ResultFrame::from_error(&err).to_json();
                let _ = sink.send(Message::Text(frame.into())).await;
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                return;
            }
        };

        let (conn, mailbox) = ClientConnection::new(
            user_id,
            channel_id,
            self.ctx.mailbox_capacity,
            self.ctx.shutdown.child_token(),
        );
        let conn = Arc::new(conn);
        let span = info_span!("chat_session", %channel_id, %user_id, conn_id = %conn.id);

        self.ctx.hub.add_client(Arc::clone(&conn));
        let delivery = tokio::spawn(
            run_delivery_loop(Arc::clone(&conn), mailbox, sink).instrument(span.clone()),
        );

        async {
            info!("client connected");
            counter!(WS_CONNECTIONS_TOTAL).increment(1);
            gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

            self.read_loop(&conn, stream).await;

            let _ = conn.close();
            let _ = self.ctx.hub.remove_client(channel_id, &conn.id);
            let mut delivery = delivery;
            match tokio::time::timeout(DELIVERY_STOP_TIMEOUT, &mut delivery).await {
                Ok(Ok(exit)) => debug!(?exit, "delivery loop joined"),
                Ok(Err(e)) => warn!(error = %e, "delivery task failed"),
                Err(_) => {
                    warn!("delivery loop did not stop, aborting");
                    delivery.abort();
                }
            }

            info!(age_secs = conn.age().as_secs(), dropped = conn.drop_count(), "client disconnected");
            counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
            gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        }
        .instrument(span)
        .await;
    }

    async fn read_loop<R, E>(&self, conn: &Arc<ClientConnection>, mut stream: R)
    where
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display + Send,
    {
        let channel_id = conn.channel_id();
        let user_id = conn.user_id();
        let mut read_errors = 0u32;

        loop {
            let next = tokio::select! {
                biased;
                () = conn.cancelled() => {
                    debug!("connection cancelled, stopping reads");
                    break;
                }
                next = stream.next() => next,
            };

            let msg = match next {
                None => break,
                Some(Err(e)) => {
                    read_errors += 1;
                    warn!(error = %e, read_errors, "read error");
                    let frame = ResultFrame::error(e.to_string()).to_json();
                    if !conn.send_direct(frame).await || read_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                        break;
                    }
                    continue;
                }
                Some(Ok(msg)) => {
                    read_errors = 0;
                    msg
                }
            };

            let outcome = match msg {
                Message::Text(text) => {
                    self.process_frame(channel_id, user_id, text.as_str().as_bytes()).await
                }
                Message::Binary(data) => self.process_frame(channel_id, user_id, &data).await,
                Message::Close(frame) => {
                    log_close(frame.as_ref());
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => continue,
            };

            match outcome {
                FrameOutcome::Ignore => {}
                FrameOutcome::Rejected(frame) => {
                    if !conn.send_direct(frame.to_json()).await {
                        break;
                    }
                }
                FrameOutcome::Accepted(message) => {
                    counter!(CHAT_MESSAGES_TOTAL).increment(1);
                    debug!(message_id = %message.id, "message persisted");
                    if !conn.send_direct(ResultFrame::message_sent().to_json()).await {
                        break;
                    }
                    let _ = self.ctx.hub.broadcast(channel_id, &message);
                }
            }
        }
    }
}

fn log_close(frame: Option<&CloseFrame>) {
    match frame {
        None => debug!("client closed without status"),
        Some(cf) if matches!(cf.code, close_code::NORMAL | close_code::AWAY | close_code::STATUS) => {
            debug!(code = cf.code, "client closed");
        }
        Some(cf) => warn!(code = cf.code, reason = cf.reason.as_str(), "unexpected close"),
    }
}

fn frame_reason(err: &FrameError) -> &'static str {
    match err {
        FrameError::TooLarge { .. } => "too_large",
        FrameError::InvalidJson => "invalid_json",
        FrameError::Invalid(_) => "invalid_schema",
    }
}

fn service_reason(err: &ServiceError) -> &'static str {
    match err {
        ServiceError::Membership { .. } => "membership",
        ServiceError::FetchUser { .. } => "fetch_user",
        ServiceError::InsertMessage { .. } => "insert",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Collaborators;
    use crate::websocket::hub::ChannelRegistry;
    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use groupchat_core::{
        AuthVerifier, AuthorSummary, MembershipOracle, MessageId, MessageStore,
    };
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Tokens are `user-<id>`.
    struct PrefixAuth;

    #[async_trait]
    impl AuthVerifier for PrefixAuth {
        async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
            token
                .strip_prefix("user-")
                .and_then(|id| id.parse().ok())
                .map(UserId::new)
                .ok_or(AuthError::Invalid {
                    reason: "bad prefix".into(),
                })
        }
    }

    struct Members(HashSet<(i64, i64)>);

    #[async_trait]
    impl MembershipOracle for Members {
        async fn is_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<bool, ServiceError> {
            if channel_id.get() == 500 {
                return Err(ServiceError::Membership {
                    detail: "db down".into(),
                });
            }
            Ok(self.0.contains(&(channel_id.get(), user_id.get())))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        next_id: AtomicI64,
        stored: Mutex<Vec<NewMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl MessageStore for MemoryStore {
        async fn persist(&self, message: NewMessage) -> Result<PersistedMessage, ServiceError> {
            if self.fail {
                return Err(ServiceError::InsertMessage {
                    detail: "disk full".into(),
                });
            }
            self.stored.lock().push(message.clone());
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(PersistedMessage {
                id: MessageId::new(id),
                channel_id: message.channel_id,
                author_id: message.author_id,
                body: message.body,
                created_at: "2026-01-01T00:00:00+00:00".into(),
                author: AuthorSummary {
                    id: message.author_id,
                    name: format!("user {}", message.author_id),
                    avatar_url: String::new(),
                    created_at: "2025-01-01T00:00:00+00:00".into(),
                },
            })
        }
    }

    struct Harness {
        handler: ConnectionHandler,
        store: Arc<MemoryStore>,
    }

    fn harness_with(store: MemoryStore) -> Harness {
        harness_with_capacity(store, 16)
    }

    fn harness_with_capacity(store: MemoryStore, mailbox_capacity: usize) -> Harness {
        let store = Arc::new(store);
        let ctx = ChatContext {
            hub: Arc::new(ChannelRegistry::new()),
            collaborators: Collaborators {
                auth: Arc::new(PrefixAuth),
                membership: Arc::new(Members([(7, 1), (7, 2)].into_iter().collect())),
                store: store.clone(),
            },
            mailbox_capacity,
            max_frame_bytes: 10 * 1024,
            shutdown: CancellationToken::new(),
        };
        Harness {
            handler: ConnectionHandler::new(Arc::new(ctx)),
            store,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryStore::default())
    }

    type Inbound = fmpsc::UnboundedSender<Result<Message, String>>;
    type Outbound = fmpsc::UnboundedReceiver<Message>;

    /// Start a session; returns the client's write half, read half and the task.
    fn connect(
        handler: &ConnectionHandler,
        channel: &str,
        token: Option<&str>,
    ) -> (Inbound, Outbound, tokio::task::JoinHandle<()>) {
        let (out_tx, out_rx) = fmpsc::unbounded::<Message>();
        let (in_tx, in_rx) = fmpsc::unbounded::<Result<Message, String>>();
        let handler = handler.clone();
        let channel = channel.to_string();
        let token = token.map(str::to_string);
        let task = tokio::spawn(async move { handler.run(out_tx, in_rx, channel, token).await });
        (in_tx, out_rx, task)
    }

    async fn next_json(out: &mut Outbound) -> serde_json::Value {
        let msg = tokio::time::timeout(Duration::from_secs(2), out.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended");
        match msg {
            Message::Text(t) => serde_json::from_str(t.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn send_text(tx: &Inbound, text: &str) {
        tx.unbounded_send(Ok(Message::Text(text.to_string().into()))).unwrap();
    }

    async fn wait_for_members(handler: &ConnectionHandler, channel: i64, n: usize) {
        for _ in 0..200 {
            if handler.context().hub.channel_connection_count(ChannelId::new(channel)) == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("channel {channel} never reached {n} members");
    }

    #[tokio::test]
    async fn missing_token_rejected_without_registration() {
        let h = harness();
        let (_in, mut out, task) = connect(&h.handler, "7", None);
        let frame = next_json(&mut out).await;
        assert_eq!(frame["success"], false);
        assert_eq!(frame["message"], "token is required");
        assert!(matches!(out.next().await, Some(Message::Close(None))));
        task.await.unwrap();
        assert_eq!(h.handler.context().hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn bad_token_reports_verifier_error() {
        let h = harness();
        let (_in, mut out, task) = connect(&h.handler, "7", Some("garbage"));
        assert_eq!(next_json(&mut out).await["message"], "invalid token");
        task.await.unwrap();
    }

    #[tokio::test]
    async fn invalid_channel_rejected() {
        let h = harness();
        let (_in, mut out, task) = connect(&h.handler, "-3", Some("user-1"));
        assert_eq!(next_json(&mut out).await["message"], "invalid channel id");
        task.await.unwrap();
    }

    #[tokio::test]
    async fn non_member_rejected() {
        let h = harness();
        let (_in, mut out, task) = connect(&h.handler, "7", Some("user-3"));
        assert_eq!(
            next_json(&mut out).await["message"],
            "you are not a member of this channel"
        );
        task.await.unwrap();
        assert!(!h.handler.context().hub.has_channel(ChannelId::new(7)));
    }

    #[tokio::test]
    async fn membership_failure_reads_as_not_member() {
        let h = harness();
        let err = h.handler.authorize("500", Some("user-1")).await.unwrap_err();
        assert!(matches!(err, HandshakeError::NotMember));
    }

    #[tokio::test]
    async fn accepted_message_acked_then_broadcast_to_all() {
        let h = harness();
        let (a_in, mut a_out, a_task) = connect(&h.handler, "7", Some("user-1"));
        let (b_in, mut b_out, b_task) = connect(&h.handler, "7", Some("user-2"));
        wait_for_members(&h.handler, 7, 2).await;

        send_text(&a_in, r#"{"type":"text","content":"hello"}"#);

        let ack = next_json(&mut a_out).await;
        assert_eq!(ack["success"], true);
        assert_eq!(ack["message"], "Message sent successfully");

        let echo = next_json(&mut a_out).await;
        assert_eq!(echo["body"]["content"], "hello");

        let seen = next_json(&mut b_out).await;
        assert_eq!(seen["body"]["content"], "hello");
        assert_eq!(seen["user"]["id"], 1);
        assert_eq!(seen["user_id"], 1);
        assert_eq!(seen["channel_id"], 7);

        drop(a_in);
        drop(b_in);
        a_task.await.unwrap();
        b_task.await.unwrap();
        assert!(!h.handler.context().hub.has_channel(ChannelId::new(7)));
    }

    #[tokio::test]
    async fn malformed_frames_rejected_and_connection_stays_open() {
        let h = harness();
        let (tx, mut out, task) = connect(&h.handler, "7", Some("user-1"));
        wait_for_members(&h.handler, 7, 1).await;

        send_text(&tx, &"x".repeat(10 * 1024 + 1));
        assert_eq!(next_json(&mut out).await["message"], "message size exceeds limit");

        send_text(&tx, "{not json");
        assert_eq!(next_json(&mut out).await["message"], "invalid message body JSON");

        send_text(&tx, r#"{"type":"poke"}"#);
        assert_eq!(next_json(&mut out).await["message"], "unsupported message type");

        send_text(&tx, r#"{"content":"hi"}"#);
        assert_eq!(
            next_json(&mut out).await["message"],
            "message body must have a 'type' field"
        );

        // Empty payloads are ignored; the next valid frame is still served.
        send_text(&tx, "");
        tx.unbounded_send(Ok(Message::Binary(
            br#"{"type":"text","content":"bin"}"#.to_vec().into(),
        )))
        .unwrap();
        assert_eq!(next_json(&mut out).await["success"], true);
        assert_eq!(next_json(&mut out).await["body"]["content"], "bin");

        assert_eq!(h.store.stored.lock().len(), 1);
        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn persistence_failure_reported_and_not_broadcast() {
        let h = harness_with(MemoryStore {
            fail: true,
            ..MemoryStore::default()
        });
        let (tx, mut out, task) = connect(&h.handler, "7", Some("user-1"));
        wait_for_members(&h.handler, 7, 1).await;

        send_text(&tx, r#"{"type":"text","content":"hello"}"#);
        let frame = next_json(&mut out).await;
        assert_eq!(frame["success"], false);
        assert_eq!(frame["message"], "error inserting message");

        drop(tx);
        task.await.unwrap();
        // Only the close frame follows.
        assert!(matches!(out.next().await, Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn read_error_reported_then_reading_continues() {
        let h = harness();
        let (tx, mut out, task) = connect(&h.handler, "7", Some("user-1"));
        wait_for_members(&h.handler, 7, 1).await;

        tx.unbounded_send(Err("frame decode failed".into())).unwrap();
        let frame = next_json(&mut out).await;
        assert_eq!(frame["success"], false);
        assert_eq!(frame["message"], "frame decode failed");

        send_text(&tx, r#"{"type":"text","content":"still here"}"#);
        assert_eq!(next_json(&mut out).await["success"], true);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn close_frame_ends_session_and_unregisters() {
        let h = harness();
        let (tx, mut out, task) = connect(&h.handler, "7", Some("user-1"));
        wait_for_members(&h.handler, 7, 1).await;

        tx.unbounded_send(Ok(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "bye".into(),
        }))))
        .unwrap();
        task.await.unwrap();
        assert!(matches!(out.next().await, Some(Message::Close(None))));
        assert_eq!(h.handler.context().hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_live_sessions() {
        let h = harness();
        let (_tx, mut out, task) = connect(&h.handler, "7", Some("user-1"));
        wait_for_members(&h.handler, 7, 1).await;

        h.handler.context().shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("session did not stop")
            .unwrap();
        assert!(matches!(out.next().await, Some(Message::Close(None))));
        assert!(!h.handler.context().hub.has_channel(ChannelId::new(7)));
    }

    #[tokio::test]
    async fn every_read_error_reported_until_limit() {
        let h = harness();
        let (tx, mut out, task) = connect(&h.handler, "7", Some("user-1"));
        wait_for_members(&h.handler, 7, 1).await;

        for i in 1..MAX_CONSECUTIVE_READ_ERRORS {
            tx.unbounded_send(Err(format!("bad frame {i}"))).unwrap();
            assert_eq!(next_json(&mut out).await["message"], format!("bad frame {i}"));
        }
        tx.unbounded_send(Err("bad frame last".into())).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("session kept reading past the error limit")
            .unwrap();

        // The last error frame may lose the race with teardown; the close frame may not.
        let mut rest = Vec::new();
        while let Some(msg) = out.next().await {
            rest.push(msg);
        }
        assert!(matches!(rest.last(), Some(Message::Close(None))));
        assert_eq!(h.handler.context().hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn unexpected_close_code_ends_session() {
        let h = harness();
        let (tx, mut out, task) = connect(&h.handler, "7", Some("user-1"));
        wait_for_members(&h.handler, 7, 1).await;

        tx.unbounded_send(Ok(Message::Close(Some(CloseFrame {
            code: close_code::ERROR,
            reason: "server blew up".into(),
        }))))
        .unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("session ignored close frame")
            .unwrap();
        assert!(matches!(out.next().await, Some(Message::Close(None))));
        assert!(!h.handler.context().hub.has_channel(ChannelId::new(7)));
        drop(tx);
    }

    #[tokio::test]
    async fn evicted_client_with_stalled_socket_is_disconnected() {
        let h = harness_with_capacity(MemoryStore::default(), 2);
        // Zero-buffer sink nobody drains: the socket stops accepting writes.
        let (sink, _stalled) = fmpsc::channel::<Message>(0);
        let (_input, stream) = fmpsc::unbounded::<Result<Message, String>>();
        let handler = h.handler.clone();
        let task = tokio::spawn(async move {
            handler
                .run(sink, stream, "7".into(), Some("user-1".into()))
                .await;
        });
        wait_for_members(&h.handler, 7, 1).await;

        let hub = Arc::clone(&h.handler.context().hub);
        let mut evicted = 0;
        for i in 0..10 {
            evicted += hub.broadcast_raw(ChannelId::new(7), Arc::new(format!("m{i}"))).evicted;
            tokio::task::yield_now().await;
        }
        assert_eq!(evicted, 1);
        assert!(!hub.has_channel(ChannelId::new(7)));

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("session of evicted client never finished")
            .unwrap();
    }
}
