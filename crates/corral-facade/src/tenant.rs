//! Tenant lock manager.
//!
//! Each tenant has an in-process reader/writer lock. Scheduling takes it
//! shared; [`Facade::lock_tenant`] takes it exclusively and then locks every
//! service of the tenant in the coordinator. The in-process lock is always
//! acquired before and released after the coordinator lock, so a failed
//! coordinator unlock leaves the tenant locked locally too.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock, RwLockReadGuard, watch};
use tracing::{debug, info, warn};

use corral_state::Service;

use crate::error::{FacadeError, FacadeResult};
use crate::facade::Facade;

/// Registry of per-tenant locks. Entries live as long as the registry.
#[derive(Default)]
pub struct TenantLocks {
    locks: Mutex<HashMap<String, Arc<TenantLock>>>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for a tenant, created on first use.
    pub fn get(&self, tenant_id: &str) -> Arc<TenantLock> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(TenantLock::default()))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive hold taken by `lock_tenant`, kept until `unlock_tenant`.
struct Held {
    _guard: OwnedRwLockWriteGuard<()>,
    /// Services locked in the coordinator.
    services: Vec<Service>,
}

#[derive(Default)]
pub struct TenantLock {
    rw: Arc<RwLock<()>>,
    held: tokio::sync::Mutex<Option<Held>>,
}

impl TenantLock {
    /// Shared access, as taken by scheduling.
    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.rw.read().await
    }

    /// True while anyone holds the lock, shared or exclusive.
    pub fn is_held(&self) -> bool {
        self.rw.try_write().is_err()
    }
}

/// How a cancellable wait ended.
enum Wake {
    Elapsed,
    Signalled,
    SenderGone,
}

impl Facade {
    /// Lock a tenant in-process and in the coordinator.
    ///
    /// Waits for in-flight scheduling on the tenant to finish. If the
    /// coordinator lock fails, the in-process lock is released again.
    pub async fn lock_tenant(&self, tenant_id: &str) -> FacadeResult<()> {
        let lock = self.locks.get(tenant_id);
        let guard = lock.rw.clone().write_owned().await;

        let services = self.get_service_list(tenant_id)?;
        if let Err(err) = self
            .coordinated(self.coordinator.lock_services(&services))
            .await
        {
            warn!(%tenant_id, error = %err, "coordinator lock failed, releasing tenant");
            drop(guard);
            return Err(err.into());
        }

        *lock.held.lock().await = Some(Held {
            _guard: guard,
            services,
        });
        info!(%tenant_id, "tenant locked");
        Ok(())
    }

    /// Unlock a tenant in the coordinator, then in-process.
    ///
    /// If the coordinator unlock fails the tenant stays locked in-process.
    pub async fn unlock_tenant(&self, tenant_id: &str) -> FacadeResult<()> {
        let lock = self.locks.get(tenant_id);
        let mut held = lock.held.lock().await;
        let Some(current) = held.as_ref() else {
            debug!(%tenant_id, "tenant is not locked");
            return Ok(());
        };

        self.coordinated(self.coordinator.unlock_services(&current.services))
            .await?;
        *held = None;
        info!(%tenant_id, "tenant unlocked");
        Ok(())
    }

    /// Retry [`Facade::unlock_tenant`] every `interval` until it succeeds or
    /// `cancel` turns true.
    pub async fn retry_unlock_tenant(
        &self,
        tenant_id: &str,
        mut cancel: Option<watch::Receiver<bool>>,
        interval: Duration,
    ) -> FacadeResult<()> {
        loop {
            match self.unlock_tenant(tenant_id).await {
                Ok(()) => return Ok(()),
                Err(err) => warn!(%tenant_id, error = %err, ?interval, "could not unlock tenant, retrying"),
            }

            if cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
                info!(%tenant_id, "tenant unlock cancelled");
                return Err(FacadeError::Cancelled);
            }
            let wake = match cancel.as_mut() {
                Some(rx) => tokio::select! {
                    _ = tokio::time::sleep(interval) => Wake::Elapsed,
                    changed = rx.changed() => match changed {
                        Ok(()) => Wake::Signalled,
                        Err(_) => Wake::SenderGone,
                    },
                },
                None => {
                    tokio::time::sleep(interval).await;
                    Wake::Elapsed
                }
            };
            match wake {
                Wake::Signalled if cancel.as_ref().is_some_and(|rx| *rx.borrow()) => {
                    info!(%tenant_id, "tenant unlock cancelled");
                    return Err(FacadeError::Cancelled);
                }
                Wake::SenderGone => cancel = None,
                Wake::Elapsed | Wake::Signalled => {}
            }
        }
    }

    /// Force-release a tenant: unlock all of its current services in the
    /// coordinator and drop any in-process hold.
    pub async fn reset_lock(&self, tenant_id: &str) -> FacadeResult<()> {
        let lock = self.locks.get(tenant_id);
        let mut held = lock.held.lock().await;
        let mut services = match held.as_ref() {
            Some(current) => current.services.clone(),
            None => Vec::new(),
        };
        match self.get_service_list(tenant_id) {
            Ok(current) => {
                for svc in current {
                    if !services.iter().any(|s| s.id == svc.id) {
                        services.push(svc);
                    }
                }
            }
            Err(FacadeError::ServiceNotFound(_)) => {}
            Err(err) => return Err(err),
        }

        self.coordinated(self.coordinator.unlock_services(&services))
            .await?;
        *held = None;
        warn!(%tenant_id, services = services.len(), "tenant lock reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, service};

    #[test]
    fn registry_hands_out_one_lock_per_tenant() {
        let locks = TenantLocks::new();
        let a = locks.get("t1");
        let b = locks.get("t1");
        let c = locks.get("t2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn lock_and_unlock_round_trip() {
        let fx = fixture();
        fx.store.put_service(&service("t1", None, "tenant")).unwrap();
        fx.store.put_service(&service("a", Some("t1"), "a")).unwrap();

        fx.facade.lock_tenant("t1").await.unwrap();
        assert!(fx.facade.locks().get("t1").is_held());
        assert!(fx.coordinator.is_locked("t1").await);
        assert!(fx.coordinator.is_locked("a").await);

        fx.facade.unlock_tenant("t1").await.unwrap();
        assert!(!fx.facade.locks().get("t1").is_held());
        assert!(!fx.coordinator.is_locked("a").await);
    }

    #[tokio::test]
    async fn failed_coordinator_lock_releases_local_lock() {
        let fx = fixture();
        fx.store.put_service(&service("t1", None, "tenant")).unwrap();
        fx.coordinator.set_fail_lock(true);

        assert!(matches!(
            fx.facade.lock_tenant("t1").await,
            Err(FacadeError::Coordinator(_))
        ));
        assert!(!fx.facade.locks().get("t1").is_held());
    }

    #[tokio::test]
    async fn unlocking_an_unlocked_tenant_is_a_no_op() {
        let fx = fixture();
        fx.facade.unlock_tenant("t9").await.unwrap();
    }

    #[tokio::test]
    async fn retry_unlock_succeeds_once_coordinator_recovers() {
        let fx = fixture();
        fx.store.put_service(&service("t1", None, "tenant")).unwrap();
        fx.facade.lock_tenant("t1").await.unwrap();
        fx.coordinator.set_fail_unlock(true);

        let coordinator = fx.coordinator.clone();
        let (retry, ()) = tokio::join!(
            fx.facade
                .retry_unlock_tenant("t1", None, Duration::from_millis(5)),
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                coordinator.set_fail_unlock(false);
            }
        );
        retry.unwrap();
        assert!(!fx.facade.locks().get("t1").is_held());
    }

    #[tokio::test]
    async fn retry_unlock_honours_cancel() {
        let fx = fixture();
        fx.store.put_service(&service("t1", None, "tenant")).unwrap();
        fx.facade.lock_tenant("t1").await.unwrap();
        fx.coordinator.set_fail_unlock(true);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (retry, ()) = tokio::join!(
            fx.facade
                .retry_unlock_tenant("t1", Some(cancel_rx), Duration::from_secs(60)),
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let _ = cancel_tx.send(true);
            }
        );
        assert!(matches!(retry, Err(FacadeError::Cancelled)));
        assert!(fx.facade.locks().get("t1").is_held());
    }

    #[tokio::test]
    async fn reset_lock_releases_everything() {
        let fx = fixture();
        fx.store.put_service(&service("t1", None, "tenant")).unwrap();
        fx.facade.lock_tenant("t1").await.unwrap();

        fx.facade.reset_lock("t1").await.unwrap();
        assert!(!fx.facade.locks().get("t1").is_held());
        assert!(!fx.coordinator.is_locked("t1").await);
    }
}
