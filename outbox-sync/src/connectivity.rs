/// Connectivity monitor
///
/// Relays the host's reachability signal. Holds the last known value and
/// fans every real transition out to subscribers, in order, exactly once.
/// Repeated reports of the current value are dropped.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

/// A connectivity transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

impl ConnectivityEvent {
    pub fn from_online(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Handle identifying a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving end of a subscription
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<ConnectivityEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next transition; `None` once the monitor is gone
    pub async fn recv(&mut self) -> Option<ConnectivityEvent> {
        self.rx.recv().await
    }

    /// Next already-delivered transition, if any
    pub fn try_recv(&mut self) -> Option<ConnectivityEvent> {
        self.rx.try_recv().ok()
    }
}

/// Host-side reachability check, for platforms without push notifications
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

struct MonitorInner {
    online: bool,
    next_id: u64,
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<ConnectivityEvent>)>,
}

/// Online/offline signal source
pub struct ConnectivityMonitor {
    inner: Mutex<MonitorInner>,
}

impl ConnectivityMonitor {
    /// Create a monitor seeded with the platform's current reachability
    pub fn new(initially_online: bool) -> Self {
        Self {
            inner: Mutex::new(MonitorInner {
                online: initially_online,
                next_id: 1,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Last known connectivity
    pub fn is_online(&self) -> bool {
        self.inner.lock().online
    }

    /// Feed a reachability report. Returns true if it was a transition.
    pub fn report(&self, online: bool) -> bool {
        let mut inner = self.inner.lock();
        if inner.online == online {
            return false;
        }
        inner.online = online;

        let event = ConnectivityEvent::from_online(online);
        if online {
            tracing::info!("Connectivity: online");
        } else {
            tracing::warn!("Connectivity: offline");
        }

        // Sending under the lock keeps delivery order identical to report order
        inner.subscribers.retain(|(_, tx)| tx.send(event).is_ok());
        true
    }

    /// Subscribe to future transitions
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push((id, tx));
        Subscription { id, rx }
    }

    /// Stop delivering to a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        inner.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Poll `probe` every `interval` and report the result.
    ///
    /// The task ends on its own once the monitor is dropped.
    pub fn watch_probe(
        self: &Arc<Self>,
        probe: Arc<dyn ReachabilityProbe>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let reachable = probe.is_reachable().await;
                match monitor.upgrade() {
                    Some(monitor) => {
                        monitor.report(reachable);
                    }
                    None => break,
                }
            }
        })
    }
}
