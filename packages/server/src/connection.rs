//! Per-connection outbound queue and lifecycle flag.
//!
//! A [`ConnectionHandle`] is the hub-facing side of one WebSocket: a
//! bounded FIFO drained by that socket's single write pump, a dropped
//! frame counter, and an idempotent close latch. The socket pumps
//! themselves live in the `ui` layer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Notify, mpsc};
use undertow_shared::{ConnectionId, ServerFrame, UserId};

#[derive(Clone)]
pub struct ConnectionHandle {
    pub user_id: UserId,
    pub conn_id: ConnectionId,
    outbound: mpsc::Sender<ServerFrame>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    close_notify: Arc<Notify>,
}

impl ConnectionHandle {
    /// Creates a handle and the receiver its write pump drains.
    pub fn new(
        user_id: UserId,
        queue_size: usize,
    ) -> (Self, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let handle = Self {
            user_id,
            conn_id: ConnectionId::generate(),
            outbound: tx,
            dropped: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            close_notify: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    /// Non-blocking enqueue. Returns `false` without blocking when the
    /// queue is saturated or the connection is closed; a saturated
    /// queue drops the newest frame, bumps the counter, and leaves a
    /// best-effort notice so the client can re-fetch.
    pub fn send(&self, frame: ServerFrame) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    user_id = %self.user_id,
                    conn_id = %self.conn_id,
                    dropped_total = total,
                    "outbound queue full, dropped frame"
                );
                let _ = self.outbound.try_send(ServerFrame::MessagesDropped {
                    reason: "buffer_full".to_string(),
                });
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Latches the connection closed. Returns `true` only for the first
    /// caller, so hub/presence cleanup runs exactly once.
    pub fn close(&self, reason: &str) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            tracing::debug!(
                user_id = %self.user_id,
                conn_id = %self.conn_id,
                reason,
                "connection closed"
            );
            self.close_notify.notify_waiters();
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves when [`close`](Self::close) is first called. Used by
    /// the socket pumps to react to forced eviction.
    pub async fn closed(&self) {
        let mut notified = std::pin::pin!(self.close_notify.notified());
        // Register before the flag check so a close landing in between
        // cannot be missed.
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    /// Frames dropped on this connection due to backpressure.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_never_blocks_and_counts_drops() {
        let (handle, mut rx) = ConnectionHandle::new(UserId(1), 2);
        assert!(handle.send(ServerFrame::Pong));
        assert!(handle.send(ServerFrame::Pong));

        // Queue full: the newest frame is dropped and counted, the
        // call returns immediately, and queued frames are untouched.
        assert!(!handle.send(ServerFrame::Pong));
        assert!(!handle.send(ServerFrame::Pong));
        assert_eq!(handle.dropped_count(), 2);

        assert_eq!(rx.recv().await, Some(ServerFrame::Pong));
        assert_eq!(rx.recv().await, Some(ServerFrame::Pong));
        // Draining restores capacity for later sends.
        assert!(handle.send(ServerFrame::Pong));
        assert_eq!(rx.recv().await, Some(ServerFrame::Pong));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (handle, _rx) = ConnectionHandle::new(UserId(9), 4);
        assert!(handle.close("test"));
        assert!(!handle.close("test again"));
        assert!(handle.is_closed());
        assert!(!handle.send(ServerFrame::Pong));
        // Already closed: must resolve immediately.
        handle.closed().await;
    }
}
