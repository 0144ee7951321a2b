//! Coordinator interface and the in-process implementation.
//!
//! The coordinator is the distributed side of the control plane: it holds
//! the scheduling record that worker nodes watch, the ephemeral virtual-host
//! registry, and per-service distributed locks. The facade only talks to it
//! through the [`Coordinator`] trait.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use corral_state::{DesiredState, Service, ServiceId};

/// Errors reported by a coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("coordinator unavailable: {0}")]
    Unavailable(String),

    #[error("coordinator call timed out after {0:?}")]
    Timeout(Duration),

    #[error("coordinator rejected request: {0}")]
    Rejected(String),
}

/// Operations the facade needs from the distributed coordinator.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Register or update a service's scheduling record.
    async fn update_service(&self, tenant_id: &str, svc: &Service) -> Result<(), CoordinatorError>;

    /// Remove a service's scheduling record.
    async fn remove_service(&self, pool_id: &str, service_id: &str) -> Result<(), CoordinatorError>;

    /// Stop one running instance of a service.
    async fn stop_service_instance(
        &self,
        pool_id: &str,
        service_id: &str,
        instance_id: u32,
    ) -> Result<(), CoordinatorError>;

    /// Returns the ID of a service other than `service_id` currently
    /// running the virtual host, if any.
    async fn check_running_vhost(
        &self,
        vhost: &str,
        service_id: &str,
    ) -> Result<Option<ServiceId>, CoordinatorError>;

    /// Acquire the distributed lock of every given service.
    async fn lock_services(&self, services: &[Service]) -> Result<(), CoordinatorError>;

    /// Release the distributed lock of every given service.
    async fn unlock_services(&self, services: &[Service]) -> Result<(), CoordinatorError>;
}

/// Stop requests remembered by [`LocalCoordinator`].
pub const STOP_HISTORY: usize = 64;

/// In-process coordinator for standalone mode and tests.
///
/// Virtual hosts are claimed when a service is pushed with `Run` and
/// released when it is pushed with `Stop` or removed. Lock and unlock
/// failures, and call latency, can be injected.
#[derive(Default)]
pub struct LocalCoordinator {
    /// service_id → (tenant_id, last pushed record).
    services: RwLock<HashMap<ServiceId, (String, Service)>>,
    /// vhost → owning service_id.
    vhosts: RwLock<HashMap<String, ServiceId>>,
    locked: RwLock<HashSet<ServiceId>>,
    /// Most recent stop requests, oldest first, at most [`STOP_HISTORY`].
    stopped: RwLock<VecDeque<(ServiceId, u32)>>,
    fail_lock: AtomicBool,
    fail_unlock: AtomicBool,
    latency_ms: AtomicU64,
}

impl LocalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `lock_services` call fail.
    pub fn set_fail_lock(&self, fail: bool) {
        self.fail_lock.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `unlock_services` call fail.
    pub fn set_fail_unlock(&self, fail: bool) {
        self.fail_unlock.store(fail, Ordering::SeqCst);
    }

    /// Delay every call by the given duration.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Mark a virtual host as running under a service.
    pub async fn claim_vhost(&self, vhost: &str, service_id: &str) {
        self.vhosts
            .write()
            .await
            .insert(vhost.to_string(), service_id.to_string());
    }

    /// The last record pushed for a service.
    pub async fn registered(&self, service_id: &str) -> Option<Service> {
        self.services
            .read()
            .await
            .get(service_id)
            .map(|(_, svc)| svc.clone())
    }

    /// The tenant a service was last registered under.
    pub async fn tenant_of(&self, service_id: &str) -> Option<String> {
        self.services
            .read()
            .await
            .get(service_id)
            .map(|(tenant, _)| tenant.clone())
    }

    pub async fn is_locked(&self, service_id: &str) -> bool {
        self.locked.read().await.contains(service_id)
    }

    /// The most recent (service_id, instance_id) stop requests, in call
    /// order.
    pub async fn stopped_instances(&self) -> Vec<(ServiceId, u32)> {
        self.stopped.read().await.iter().cloned().collect()
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    async fn release_vhosts(&self, service_id: &str) {
        self.vhosts
            .write()
            .await
            .retain(|_, owner| owner != service_id);
    }
}

#[async_trait]
impl Coordinator for LocalCoordinator {
    async fn update_service(&self, tenant_id: &str, svc: &Service) -> Result<(), CoordinatorError> {
        self.simulate_latency().await;
        match svc.desired_state {
            DesiredState::Run => {
                let mut vhosts = self.vhosts.write().await;
                for vhost in svc.endpoints.iter().flat_map(|ep| ep.vhosts.iter()) {
                    vhosts.entry(vhost.clone()).or_insert_with(|| svc.id.clone());
                }
            }
            DesiredState::Stop => self.release_vhosts(&svc.id).await,
            DesiredState::Pause | DesiredState::Restart => {}
        }
        self.services
            .write()
            .await
            .insert(svc.id.clone(), (tenant_id.to_string(), svc.clone()));
        debug!(service_id = %svc.id, %tenant_id, desired_state = %svc.desired_state, "service synced to coordinator");
        Ok(())
    }

    async fn remove_service(&self, pool_id: &str, service_id: &str) -> Result<(), CoordinatorError> {
        self.simulate_latency().await;
        self.services.write().await.remove(service_id);
        self.locked.write().await.remove(service_id);
        self.release_vhosts(service_id).await;
        debug!(%pool_id, %service_id, "service removed from coordinator");
        Ok(())
    }

    async fn stop_service_instance(
        &self,
        pool_id: &str,
        service_id: &str,
        instance_id: u32,
    ) -> Result<(), CoordinatorError> {
        self.simulate_latency().await;
        {
            let mut stopped = self.stopped.write().await;
            if stopped.len() == STOP_HISTORY {
                stopped.pop_front();
            }
            stopped.push_back((service_id.to_string(), instance_id));
        }
        info!(%pool_id, %service_id, instance_id, "instance stop requested");
        Ok(())
    }

    async fn check_running_vhost(
        &self,
        vhost: &str,
        service_id: &str,
    ) -> Result<Option<ServiceId>, CoordinatorError> {
        self.simulate_latency().await;
        let owner = self
            .vhosts
            .read()
            .await
            .get(vhost)
            .filter(|owner| owner.as_str() != service_id)
            .cloned();
        Ok(owner)
    }

    async fn lock_services(&self, services: &[Service]) -> Result<(), CoordinatorError> {
        self.simulate_latency().await;
        if self.fail_lock.load(Ordering::SeqCst) {
            return Err(CoordinatorError::Unavailable("lock refused".to_string()));
        }
        let mut locked = self.locked.write().await;
        locked.extend(services.iter().map(|svc| svc.id.clone()));
        Ok(())
    }

    async fn unlock_services(&self, services: &[Service]) -> Result<(), CoordinatorError> {
        self.simulate_latency().await;
        if self.fail_unlock.load(Ordering::SeqCst) {
            return Err(CoordinatorError::Unavailable("unlock refused".to_string()));
        }
        let mut locked = self.locked.write().await;
        for svc in services {
            locked.remove(&svc.id);
        }
        Ok(())
    }
}
