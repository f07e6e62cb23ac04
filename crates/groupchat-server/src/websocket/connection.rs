//! Live client connection: bounded outbound mailbox, one-shot cancellation
//! and the delivery loop that drains the mailbox onto the socket.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use groupchat_core::{ChannelId, ConnectionId, UserId};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Receiving half of a connection's mailbox, owned by its delivery loop.
pub type Mailbox = mpsc::Receiver<Arc<String>>;

/// Outcome of a non-blocking enqueue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Frame queued; the failure streak was reset.
    Queued,
    /// Mailbox full; `consecutive` is the failure streak including this one.
    Full {
        /// Consecutive full-mailbox attempts so far.
        consecutive: u32,
    },
    /// Delivery loop has exited; nothing will drain the mailbox again.
    Closed,
}

/// One live client bound to one channel.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    user_id: UserId,
    channel_id: ChannelId,
    tx: mpsc::Sender<Arc<String>>,
    cancel: CancellationToken,
    closed: AtomicBool,
    consecutive_failures: AtomicU32,
    last_failure: Mutex<Option<Instant>>,
    /// Count of frames dropped due to a full mailbox.
    dropped_messages: AtomicU64,
    connected_at: Instant,
}

impl ClientConnection {
    /// Create a connection with a fresh mailbox of `capacity` slots.
    ///
    /// `cancel` is normally a child of the server shutdown token.
    pub fn new(
        user_id: UserId,
        channel_id: ChannelId,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, Mailbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Self {
            id: ConnectionId::new(),
            user_id,
            channel_id,
            tx,
            cancel,
            closed: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            last_failure: Mutex::new(None),
            dropped_messages: AtomicU64::new(0),
            connected_at: Instant::now(),
        };
        (conn, rx)
    }

    /// Authenticated owner.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The one channel this connection is registered in.
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Non-blocking enqueue used by broadcast.
    ///
    /// Success resets the failure streak; a full mailbox extends it and
    /// stamps the failure time.
    pub fn try_deliver(&self, frame: Arc<String>) -> Delivery {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Release);
                Delivery::Queued
            }
            Err(TrySendError::Full(_)) => {
                let consecutive = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                *self.last_failure.lock() = Some(Instant::now());
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Delivery::Full { consecutive }
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Enqueue a frame for this client only, waiting for mailbox space.
    ///
    /// Returns `false` if the connection was cancelled or its loop exited first.
    pub async fn send_direct(&self, frame: String) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = self.tx.send(Arc::new(frame)) => sent.is_ok(),
        }
    }

    /// Stop the connection. Only the first call has any effect and returns `true`.
    pub fn close(&self) -> bool {
        let first = self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.cancel.cancel();
        }
        first
    }

    /// Whether the connection has been closed or cancelled.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.cancel.is_cancelled()
    }

    /// Resolves once the connection is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Current consecutive full-mailbox streak.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// When a broadcast last found the mailbox full.
    pub fn last_failure(&self) -> Option<Instant> {
        *self.last_failure.lock()
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("channel_id", &self.channel_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Why a delivery loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// The connection was cancelled (teardown, eviction or shutdown).
    Cancelled,
    /// Writing to the socket failed.
    WriteFailed,
    /// Every sender was dropped.
    MailboxClosed,
}

/// Upper bound on writing the close frame and closing the sink once the
/// loop has stopped. A peer that stopped reading never frees the socket.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Drain `mailbox` onto `sink` until cancellation or a write failure.
///
/// Every write races the cancellation signal, so a client that stopped
/// reading is dropped as soon as it is evicted. On exit a close frame is
/// attempted once within [`CLOSE_TIMEOUT`], the sink is closed and the
/// connection is marked closed.
pub async fn run_delivery_loop<S>(conn: Arc<ClientConnection>, mut mailbox: Mailbox, mut sink: S) -> LoopExit
where
    S: Sink<Message> + Unpin,
    S::Error: Display + Send,
{
    let exit = loop {
        let frame = tokio::select! {
            biased;
            () = conn.cancelled() => break LoopExit::Cancelled,
            next = mailbox.recv() => match next {
                Some(frame) => frame,
                None => break LoopExit::MailboxClosed,
            },
        };

        tokio::select! {
            biased;
            () = conn.cancelled() => {
                debug!(conn_id = %conn.id, "cancelled during write");
                break LoopExit::Cancelled;
            }
            sent = sink.send(Message::Text(String::clone(&frame).into())) => {
                if let Err(e) = sent {
                    warn!(conn_id = %conn.id, error = %e, "write failed, closing connection");
                    break LoopExit::WriteFailed;
                }
            }
        }
    };

    let goodbye = async {
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    };
    if tokio::time::timeout(CLOSE_TIMEOUT, goodbye).await.is_err() {
        debug!(conn_id = %conn.id, "peer not accepting close frame, dropping socket");
    }
    let _ = conn.close();
    debug!(conn_id = %conn.id, ?exit, "delivery loop stopped");
    exit
}
