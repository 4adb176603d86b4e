//! Controller — the event loop and worker pool around the reconciler.
//!
//! The controller subscribes to the store's change feed, fans events out
//! to workload keys, and runs `workers` tasks that pull keys from the
//! work queue. Delayed retries are detached sleeps that re-queue the key;
//! no worker ever blocks on a delay.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use slicegrid_core::SliceConfig;
use slicegrid_metrics::MetricsSink;
use slicegrid_state::{ChangeEvent, ResourceAccessor, StateStore, WorkloadKey};

use crate::clock::{Clock, SystemClock};
use crate::queue::WorkQueue;
use crate::reconciler::{Action, Reconciler};

pub struct Controller {
    store: StateStore,
    reconciler: Arc<Reconciler<StateStore>>,
    queue: Arc<WorkQueue>,
}

impl Controller {
    pub fn new(store: StateStore, config: SliceConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self::with_clock(store, config, metrics, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: StateStore,
        config: SliceConfig,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reconciler = Reconciler::with_clock(store.clone(), config, metrics, clock);
        Self {
            store,
            reconciler: Arc::new(reconciler),
            queue: Arc::new(WorkQueue::new()),
        }
    }

    pub fn reconciler(&self) -> &Reconciler<StateStore> {
        &self.reconciler
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Queue every stored workload.
    pub fn enqueue_all(&self) {
        match self.store.list_workloads() {
            Ok(workloads) => {
                let count = workloads.len();
                for record in workloads {
                    self.queue.add(record.value.key());
                }
                debug!(count, "queued all workloads");
            }
            Err(e) => error!(error = %e, "failed to list workloads for resync"),
        }
    }

    /// Translate one change event into queued keys.
    fn handle_event(&self, event: ChangeEvent) {
        match event {
            ChangeEvent::Workload(key) => self.queue.add(key),
            ChangeEvent::Inventory(node) => {
                match self.store.get_inventory(&node) {
                    Ok(None) => {
                        debug!(%node, "inventory deleted");
                        self.reconciler.forget_node(&node);
                        return;
                    }
                    Ok(Some(_)) => {}
                    Err(e) => {
                        error!(%node, error = %e, "failed to read inventory");
                        return;
                    }
                }
                match self.reconciler.workloads_for_inventory(&node) {
                    Ok(keys) => {
                        for key in keys {
                            self.queue.add(key);
                        }
                    }
                    Err(e) => error!(%node, error = %e, "failed to fan out inventory change"),
                }
                if let Err(e) = self.reconciler.prune_deleted(&node) {
                    warn!(%node, error = %e, "failed to prune deleted allocations");
                }
            }
        }
    }

    fn spawn_worker(&self, id: usize) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let reconciler = Arc::clone(&self.reconciler);
        tokio::spawn(async move {
            debug!(worker = id, "reconcile worker starting");
            while let Some(key) = queue.get().await {
                let action = reconciler.reconcile(&key);
                queue.done(&key);
                schedule(&queue, key, action);
            }
            debug!(worker = id, "reconcile worker stopped");
        })
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let config = self.reconciler.config();
        let mut events = self.store.subscribe();
        self.enqueue_all();

        let workers: Vec<JoinHandle<()>> =
            (0..config.workers).map(|id| self.spawn_worker(id)).collect();
        info!(
            workers = workers.len(),
            policy = %config.policy,
            domain = %config.domain,
            "controller started"
        );

        let mut metrics_tick = tokio::time::interval(config.metrics_interval());

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "change feed lagged, resyncing");
                        self.enqueue_all();
                    }
                    Err(RecvError::Closed) => {
                        warn!("change feed closed");
                        break;
                    }
                },
                _ = metrics_tick.tick() => {
                    if let Err(e) = self.reconciler.refresh_metrics() {
                        warn!(error = %e, "metrics refresh failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("controller shutting down");
                    break;
                }
            }
        }

        self.queue.shutdown();
        for (id, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!(worker = id, error = %e, "reconcile worker failed");
            }
        }
        info!("controller stopped");
    }
}

/// Apply a pass's action to its key.
fn schedule(queue: &Arc<WorkQueue>, key: WorkloadKey, action: Action) {
    match action {
        Action::Done => {}
        Action::Requeue => queue.add(key),
        Action::RequeueAfter(delay) => {
            let queue = Arc::clone(queue);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                queue.add(key);
            });
        }
    }
}
