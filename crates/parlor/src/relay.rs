//! Relay plumbing: how a client publishes to and consumes from the
//! parlor's pub/sub pipe.
//!
//! The relay contract is weak on purpose: broadcast only, unordered,
//! at-least-once, no replay. [`LocalHub`] is an in-process relay with
//! exactly those semantics, used by the bot harness and tests; a real
//! deployment bridges [`RelayHandle`]/[`RelayFeed`] onto the BBS door's
//! transport instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parlorproto::event::Envelope;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

struct HubFrame {
    from: u64,
    payload: Bytes,
}

/// Publish side. Encoding or a full hub queue drops the event; the
/// contract already demands receivers cope with loss.
#[derive(Clone)]
pub struct RelayHandle {
    id: u64,
    tx: mpsc::Sender<HubFrame>,
}

impl RelayHandle {
    pub fn publish(&self, env: &Envelope) {
        let payload = match env.encode() {
            Ok(b) => b,
            Err(e) => {
                warn!(err = %e, "dropping unencodable relay event");
                return;
            }
        };
        if self
            .tx
            .try_send(HubFrame {
                from: self.id,
                payload,
            })
            .is_err()
        {
            debug!("relay queue full or closed; event dropped");
        }
    }
}

/// Consume side. Malformed frames are logged and skipped, never fatal.
pub struct RelayFeed {
    rx: mpsc::Receiver<Bytes>,
}

impl RelayFeed {
    /// Wrap a raw byte channel, for bridging an external transport.
    pub fn from_channel(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx }
    }

    /// Next well-formed envelope, or `None` once the relay is gone.
    /// Cancel-safe.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let b = self.rx.recv().await?;
            match Envelope::decode(&b) {
                Ok(env) => return Some(env),
                Err(e) => {
                    warn!(err = %e, len = b.len(), "skipping malformed relay frame");
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    pub channel_capacity: usize,
    /// Deliver every Nth frame twice (0 = off). Lets tests and the bot
    /// harness exercise the at-least-once side of the contract.
    pub dup_every: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            dup_every: 0,
        }
    }
}

/// In-process pub/sub hub. Fans every published frame out to every
/// subscriber except the publisher; no ordering promises across
/// publishers, optional duplicate injection.
pub struct LocalHub {
    tx: mpsc::Sender<HubFrame>,
    subs: Arc<Mutex<HashMap<u64, mpsc::Sender<Bytes>>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl LocalHub {
    pub fn new(cfg: HubConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<HubFrame>(cfg.channel_capacity.max(1));
        let subs: Arc<Mutex<HashMap<u64, mpsc::Sender<Bytes>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(route_task(rx, subs.clone(), cfg.dup_every));
        Arc::new(Self {
            tx,
            subs,
            next_id: AtomicU64::new(1),
            capacity: cfg.channel_capacity.max(1),
        })
    }

    /// One handle/feed pair per driver instance; a client running a
    /// tournament and a duel at once attaches twice.
    pub async fn attach(&self) -> (RelayHandle, RelayFeed) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel::<Bytes>(self.capacity);
        self.subs.lock().await.insert(id, tx);
        (
            RelayHandle {
                id,
                tx: self.tx.clone(),
            },
            RelayFeed { rx },
        )
    }
}

async fn route_task(
    mut rx: mpsc::Receiver<HubFrame>,
    subs: Arc<Mutex<HashMap<u64, mpsc::Sender<Bytes>>>>,
    dup_every: u64,
) {
    let mut frames: u64 = 0;
    while let Some(frame) = rx.recv().await {
        frames += 1;
        let copies = if dup_every > 0 && frames % dup_every == 0 {
            2
        } else {
            1
        };
        let mut gone = Vec::new();
        {
            let m = subs.lock().await;
            for (id, tx) in m.iter() {
                if *id == frame.from {
                    continue;
                }
                for _ in 0..copies {
                    match tx.try_send(frame.payload.clone()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            debug!(sub = id, "subscriber backlogged; frame dropped");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            gone.push(*id);
                            break;
                        }
                    }
                }
            }
        }
        if !gone.is_empty() {
            let mut m = subs.lock().await;
            for id in gone {
                m.remove(&id);
            }
        }
    }
}
