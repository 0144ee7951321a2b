//! The control-plane facade.
//!
//! `Facade` owns the collaborators every operation needs: the state store,
//! the coordinator, the instance-state source, the health cache, the tenant
//! lock registry, and the random source used for IP selection. The
//! operations themselves live in the `address`, `scheduler`, `instance`,
//! `tenant`, and `service` modules.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use corral_core::CorralConfig;
use corral_state::StateStore;

use crate::coordinator::{Coordinator, CoordinatorError};
use crate::health::HealthCache;
use crate::instance::InstanceSource;
use crate::tenant::TenantLocks;

const DEFAULT_COORDINATOR_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_HEALTH_TTL: Duration = Duration::from_secs(30);

pub struct Facade {
    pub(crate) store: StateStore,
    pub(crate) coordinator: Arc<dyn Coordinator>,
    pub(crate) instances: Arc<dyn InstanceSource>,
    pub(crate) health: HealthCache,
    pub(crate) locks: Arc<TenantLocks>,
    rng: Mutex<StdRng>,
    coordinator_timeout: Duration,
    pub(crate) retry_interval: Duration,
}

impl Facade {
    pub fn new(
        store: StateStore,
        coordinator: Arc<dyn Coordinator>,
        instances: Arc<dyn InstanceSource>,
    ) -> Self {
        Self {
            store,
            coordinator,
            instances,
            health: HealthCache::new(DEFAULT_HEALTH_TTL),
            locks: Arc::new(TenantLocks::new()),
            rng: Mutex::new(StdRng::from_os_rng()),
            coordinator_timeout: DEFAULT_COORDINATOR_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Use a specific random source for IP selection.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// Share a tenant lock registry with other facades.
    pub fn with_locks(mut self, locks: Arc<TenantLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_health_cache(mut self, health: HealthCache) -> Self {
        self.health = health;
        self
    }

    pub fn with_coordinator_timeout(mut self, timeout: Duration) -> Self {
        self.coordinator_timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Apply the timeouts and cache TTL from a loaded configuration.
    pub fn with_config(self, config: &CorralConfig) -> Self {
        self.with_coordinator_timeout(config.coordinator_timeout())
            .with_retry_interval(config.lock_retry_interval())
            .with_health_cache(HealthCache::new(config.health_cache_ttl()))
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn health(&self) -> &HealthCache {
        &self.health
    }

    pub fn locks(&self) -> &TenantLocks {
        &self.locks
    }

    /// Run a coordinator call, bounded by the configured timeout.
    pub(crate) async fn coordinated<T, F>(&self, call: F) -> Result<T, CoordinatorError>
    where
        F: Future<Output = Result<T, CoordinatorError>>,
    {
        match tokio::time::timeout(self.coordinator_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.coordinator_timeout, "coordinator call timed out");
                Err(CoordinatorError::Timeout(self.coordinator_timeout))
            }
        }
    }

    /// Uniform pick in `0..len`. `len` must be non-zero.
    pub(crate) fn pick_index(&self, len: usize) -> usize {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.random_range(0..len)
    }
}
