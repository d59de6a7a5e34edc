//! Shared application state.

use std::sync::Arc;

use crate::config::Config;
use crate::coordinator::JobCoordinator;
use crate::events::{MetricsSink, TracingSink};
use crate::liveness::LivenessMonitor;
use crate::metrics::Counters;
use crate::queue::TaskQueue;
use crate::registry::WorkerRegistry;
use crate::resolver::{DatasetResolver, PermissiveResolver, StaticCatalog};
use crate::scheduler::Scheduler;
use crate::store::{JobStore, MemoryBackend, StorageBackend};

/// Shared application state.
pub struct AppState {
    pub config: Config,

    /// Jobs and tasks.
    pub store: Arc<JobStore>,

    /// Pending-task index.
    pub queue: Arc<TaskQueue>,

    /// Known workers.
    pub registry: Arc<WorkerRegistry>,

    pub coordinator: Arc<JobCoordinator>,
    pub scheduler: Scheduler,
    pub counters: Arc<Counters>,
}

impl AppState {
    /// Wire every component together.
    pub fn new(
        config: Config,
        backend: Arc<dyn StorageBackend>,
        resolver: Arc<dyn DatasetResolver>,
        sink: Arc<dyn MetricsSink>,
    ) -> Arc<Self> {
        let store = Arc::new(JobStore::new(backend));
        let queue = Arc::new(TaskQueue::new());
        let registry = Arc::new(WorkerRegistry::new());
        let counters = Arc::new(Counters::default());

        let coordinator = Arc::new(JobCoordinator::new(
            store.clone(),
            queue.clone(),
            registry.clone(),
            resolver,
            sink,
            counters.clone(),
            config.retry_policy(),
        ));
        let scheduler = Scheduler::new(
            store.clone(),
            queue.clone(),
            registry.clone(),
            coordinator.clone(),
            counters.clone(),
        );

        Arc::new(Self {
            config,
            store,
            queue,
            registry,
            coordinator,
            scheduler,
            counters,
        })
    }

    /// In-memory state with default configuration.
    pub fn in_memory() -> Arc<Self> {
        Self::with_config(Config::default())
    }

    /// In-memory state with the given configuration.
    pub fn with_config(config: Config) -> Arc<Self> {
        let resolver = Self::resolver_for(&config);
        Self::new(
            config,
            Arc::new(MemoryBackend::new()),
            resolver,
            Arc::new(TracingSink),
        )
    }

    /// Catalog of the configured datasets, or accept-anything when none are.
    pub fn resolver_for(config: &Config) -> Arc<dyn DatasetResolver> {
        if config.datasets.is_empty() {
            Arc::new(PermissiveResolver)
        } else {
            Arc::new(StaticCatalog::new(config.datasets.iter().cloned()))
        }
    }

    /// A liveness monitor over this state.
    pub fn liveness_monitor(&self) -> LivenessMonitor {
        LivenessMonitor::new(
            self.registry.clone(),
            self.coordinator.clone(),
            self.config.liveness(),
        )
    }
}
