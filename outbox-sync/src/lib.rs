/// Offline-first action queue, sync scheduler and optimistic updates
///
/// Mutations made while the remote is unreachable are recorded as pending
/// actions in a durable FIFO queue and replayed in order once connectivity
/// returns. Client state is updated optimistically and rolled back if the
/// remote refuses the change.
///
/// `OutboxBuilder` wires the pieces together around one persistent store.

pub mod action;
pub mod queue;
pub mod connectivity;
pub mod remote;
pub mod config;
pub mod scheduler;
pub mod optimistic;
pub mod storefront;

pub use action::{kinds, ActionId, ActionKind, PendingAction};
pub use queue::PendingQueue;
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, ReachabilityProbe, Subscription};
pub use remote::{remote_fn, RemoteApply, RemoteError, RemoteRouter, SharedRemote};
pub use config::{OptimisticConfig, OutboxConfig, SyncConfig};
pub use scheduler::{DrainReport, DropReason, DroppedAction, SkipReason, SyncEvent, SyncScheduler, SyncStatus};
pub use optimistic::{Mutation, OptimisticResource, ResourceContext, ResourceSnapshot, UpdateError, UpdateOutcome};
pub use storefront::{Address, CartLine, Coordinates, OptimisticAddresses, OptimisticCart, OptimisticWishlist};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use outbox_core::clock::{system_clock, SharedClock};
use outbox_core::{MemoryStore, SharedStore, SnapshotCache};

/// Builder for an `Outbox`
pub struct OutboxBuilder {
    store: Option<SharedStore>,
    remote: Option<SharedRemote>,
    config: OutboxConfig,
    initially_online: bool,
    clock: Option<SharedClock>,
}

impl OutboxBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            remote: None,
            config: OutboxConfig::default(),
            initially_online: true,
            clock: None,
        }
    }

    /// Persistent store for the queue and snapshots (in-memory when unset)
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_remote(mut self, remote: impl RemoteApply + 'static) -> Self {
        self.remote = Some(Arc::new(remote));
        self
    }

    pub fn with_config(mut self, config: OutboxConfig) -> Self {
        self.config = config;
        self
    }

    /// Connectivity as reported by the platform at startup
    pub fn with_initial_online(mut self, online: bool) -> Self {
        self.initially_online = online;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Outbox> {
        let remote = self
            .remote
            .ok_or_else(|| anyhow::anyhow!("Remote apply handler is required"))?;
        self.config
            .validate()
            .context("Invalid outbox configuration")?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let clock = self.clock.unwrap_or_else(system_clock);

        let monitor = Arc::new(ConnectivityMonitor::new(self.initially_online));
        let queue = Arc::new(PendingQueue::open_with_clock(store.clone(), clock.clone()));
        let scheduler = Arc::new(SyncScheduler::with_clock(
            queue.clone(),
            monitor.clone(),
            remote,
            self.config.sync.clone(),
            clock.clone(),
        ));

        let ctx = ResourceContext {
            monitor: monitor.clone(),
            queue: queue.clone(),
            cache: SnapshotCache::with_clock(store, clock.clone()),
            clock,
            config: self.config.optimistic.clone(),
        };

        tracing::info!(
            "Outbox ready: {} pending actions, online={}",
            queue.len(),
            monitor.is_online()
        );

        Ok(Outbox {
            cart: OptimisticCart::open(ctx.clone()),
            wishlist: OptimisticWishlist::open(ctx.clone()),
            addresses: OptimisticAddresses::open(ctx.clone()),
            monitor,
            queue,
            scheduler,
            ctx,
        })
    }
}

impl Default for OutboxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The offline-first engine: queue, scheduler and optimistic resources
pub struct Outbox {
    monitor: Arc<ConnectivityMonitor>,
    queue: Arc<PendingQueue>,
    scheduler: Arc<SyncScheduler>,
    ctx: ResourceContext,
    cart: OptimisticCart,
    wishlist: OptimisticWishlist,
    addresses: OptimisticAddresses,
}

impl Outbox {
    pub fn builder() -> OutboxBuilder {
        OutboxBuilder::new()
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn queue(&self) -> &Arc<PendingQueue> {
        &self.queue
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.ctx.cache
    }

    /// Open an optimistic resource backed by this outbox
    pub fn resource<T>(
        &self,
        name: &str,
        kind: impl Into<ActionKind>,
        initial: T,
    ) -> OptimisticResource<T>
    where
        T: Clone + Serialize + DeserializeOwned + Send + Sync,
    {
        OptimisticResource::open(name, kind, initial, self.ctx.clone())
    }

    pub fn cart(&self) -> &OptimisticCart {
        &self.cart
    }

    pub fn wishlist(&self) -> &OptimisticWishlist {
        &self.wishlist
    }

    pub fn addresses(&self) -> &OptimisticAddresses {
        &self.addresses
    }

    /// Forward a reachability report to the monitor
    pub fn set_online(&self, online: bool) -> bool {
        self.monitor.report(online)
    }

    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    /// Run a drain cycle now
    pub async fn sync_now(&self) -> DrainReport {
        self.scheduler.drain().await
    }

    pub fn status(&self) -> SyncStatus {
        self.scheduler.status()
    }

    pub fn clear_sync_error(&self) {
        self.scheduler.clear_sync_error()
    }

    /// Start the background scheduler
    pub fn start(&self) {
        self.scheduler.start();
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_core::snapshot::names;
    use serde_json::json;

    fn ok_remote() -> impl RemoteApply {
        remote_fn(|_| async { Ok::<_, RemoteError>(()) })
    }

    #[test]
    fn test_builder_requires_remote() {
        let err = OutboxBuilder::new().build().err().unwrap();
        assert!(err.to_string().contains("Remote apply handler is required"));
    }

    #[test]
    fn test_builder_validates_config() {
        let config = OutboxConfig::new().with_optimistic(
            OptimisticConfig::new().with_timeout(std::time::Duration::ZERO),
        );
        let result = Outbox::builder()
            .with_remote(ok_remote())
            .with_config(config)
            .build();
        let err = result.err().unwrap();
        assert_eq!(err.to_string(), "Invalid outbox configuration");
        assert!(format!("{:#}", err).contains("timeout must be greater than 0"));
    }

    #[tokio::test]
    async fn test_offline_then_sync_now() {
        let outbox = Outbox::builder()
            .with_remote(ok_remote())
            .with_initial_online(false)
            .build()
            .unwrap();

        outbox.queue().enqueue(kinds::ADD_ADDRESS, json!({"city": "Yangon"}));
        assert_eq!(outbox.sync_now().await.skipped, Some(SkipReason::Offline));

        assert!(outbox.set_online(true));
        let report = outbox.sync_now().await;
        assert_eq!(report.applied.len(), 1);

        let status = outbox.status();
        assert!(status.is_online);
        assert_eq!(status.pending, 0);
        assert!(status.last_sync_time.is_some());
    }

    #[tokio::test]
    async fn test_resources_share_the_store() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let outbox = Outbox::builder()
            .with_store(store.clone())
            .with_remote(ok_remote())
            .build()
            .unwrap();

        let orders = outbox.resource(names::ORDERS, kinds::CREATE_ORDER, Vec::<String>::new());
        orders
            .update(Mutation::new(vec!["order-1".to_string()], vec![]), |v| async move {
                Ok::<_, RemoteError>(v)
            })
            .await
            .unwrap();

        let reopened = Outbox::builder()
            .with_store(store)
            .with_remote(ok_remote())
            .build()
            .unwrap();
        let orders = reopened.resource(names::ORDERS, kinds::CREATE_ORDER, Vec::<String>::new());
        assert_eq!(orders.visible(), vec!["order-1".to_string()]);
    }
}
