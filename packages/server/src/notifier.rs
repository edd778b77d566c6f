//! Cross-process event bus.
//!
//! Every room-scoped event goes through here, even with a single
//! process: a publish is picked up by the subscription task and fanned
//! out locally, so delivery is exactly-once whether the publisher and
//! the recipients share a process or not.
//!
//! Backed by Redis pattern pub/sub when a shared store is configured,
//! or by an in-process broadcast channel otherwise. A handler that
//! panics takes down only its own dispatch task; the subscription
//! survives, and a lost Redis connection is retried with exponential
//! backoff.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::StoreError;

const LOCAL_BUS_CAPACITY: usize = 1024;
const RECONNECT_BASE: Duration = Duration::from_millis(500);
const RECONNECT_CAP: Duration = Duration::from_secs(30);

/// Called with `(channel, payload)` for every matching event.
pub type EventHandler = Arc<dyn Fn(String, String) -> BoxFuture<'static, ()> + Send + Sync>;

enum Backend {
    Redis {
        client: redis::Client,
        publish_conn: Mutex<Option<redis::aio::MultiplexedConnection>>,
    },
    Local {
        bus: broadcast::Sender<(String, String)>,
    },
}

pub struct Notifier {
    backend: Backend,
}

impl Notifier {
    pub fn redis(client: redis::Client) -> Arc<Self> {
        Arc::new(Self {
            backend: Backend::Redis {
                client,
                publish_conn: Mutex::new(None),
            },
        })
    }

    /// Single-process bus. Publishes loop straight back to local
    /// subscribers.
    pub fn local() -> Arc<Self> {
        let (bus, _) = broadcast::channel(LOCAL_BUS_CAPACITY);
        Arc::new(Self {
            backend: Backend::Local { bus },
        })
    }

    /// Publishes an event. The caller sees the event again through its
    /// own subscription; a failed publish means no subscriber anywhere
    /// saw it, and the caller decides whether to fall back to direct
    /// local delivery.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Local { bus } => {
                // No receivers is not an error; there is simply nobody
                // subscribed yet.
                let _ = bus.send((channel.to_string(), payload.to_string()));
                Ok(())
            }
            Backend::Redis {
                client,
                publish_conn,
            } => {
                let mut guard = publish_conn.lock().await;
                if guard.is_none() {
                    *guard = Some(client.get_multiplexed_tokio_connection().await?);
                }
                let conn = guard.as_mut().expect("publish connection just set");
                let result: Result<(), redis::RedisError> = redis::cmd("PUBLISH")
                    .arg(channel)
                    .arg(payload)
                    .query_async(conn)
                    .await;
                if let Err(err) = result {
                    // Drop the connection so the next publish redials.
                    *guard = None;
                    return Err(err.into());
                }
                Ok(())
            }
        }
    }

    /// Runs a subscription over the given glob patterns until shutdown.
    /// Each event is dispatched on its own task; panics are logged and
    /// contained.
    pub fn subscribe(
        self: &Arc<Self>,
        patterns: Vec<String>,
        handler: EventHandler,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            match &notifier.backend {
                Backend::Local { bus } => {
                    run_local_subscription(bus.subscribe(), patterns, handler, shutdown).await;
                }
                Backend::Redis { client, .. } => {
                    run_redis_subscription(client.clone(), patterns, handler, shutdown).await;
                }
            }
        })
    }
}

fn dispatch(handler: &EventHandler, channel: String, payload: String) {
    let fut = handler(channel.clone(), payload);
    let task = tokio::spawn(fut);
    tokio::spawn(async move {
        if let Err(err) = task.await {
            if err.is_panic() {
                tracing::error!(%channel, "event handler panicked");
            }
        }
    });
}

async fn run_local_subscription(
    mut rx: broadcast::Receiver<(String, String)>,
    patterns: Vec<String>,
    handler: EventHandler,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok((channel, payload)) => {
                    if patterns.iter().any(|p| glob_match(p, &channel)) {
                        dispatch(&handler, channel, payload);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "local bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn run_redis_subscription(
    client: redis::Client,
    patterns: Vec<String>,
    handler: EventHandler,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = RECONNECT_BASE;
    loop {
        if *shutdown.borrow() {
            return;
        }
        match subscribe_once(&client, &patterns, &handler, &mut shutdown).await {
            Ok(()) => return,
            Err(err) => {
                tracing::warn!(%err, delay_ms = backoff.as_millis() as u64,
                    "pubsub connection lost, reconnecting");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
                backoff = (backoff * 2).min(RECONNECT_CAP);
            }
        }
    }
}

/// One subscription session. `Ok(())` means shutdown was requested;
/// `Err` means the connection dropped and should be retried.
async fn subscribe_once(
    client: &redis::Client,
    patterns: &[String],
    handler: &EventHandler,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), StoreError> {
    let mut pubsub = client.get_async_pubsub().await?;
    for pattern in patterns {
        pubsub.psubscribe(pattern).await?;
    }
    tracing::info!(?patterns, "pubsub subscription established");

    let mut stream = pubsub.on_message();
    loop {
        tokio::select! {
            message = stream.next() => {
                let Some(message) = message else {
                    return Err(StoreError::Unavailable("pubsub stream ended".into()));
                };
                let channel = message.get_channel_name().to_string();
                match message.get_payload::<String>() {
                    Ok(payload) => dispatch(handler, channel, payload),
                    Err(err) => {
                        tracing::warn!(%channel, %err, "discarding undecodable event payload");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

/// Redis-style glob matching: `*` spans any run of characters, `?`
/// exactly one.
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    fn inner(p: &[u8], c: &[u8]) -> bool {
        match (p.first(), c.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], c) || (!c.is_empty() && inner(p, &c[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&p[1..], &c[1..]),
            (Some(a), Some(b)) if a == b => inner(&p[1..], &c[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), candidate.as_bytes())
}
