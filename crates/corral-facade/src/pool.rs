//! Host and virtual-IP removal.
//!
//! Removing an IP source moves the services bound to it onto another IP of
//! their pool. Services that cannot be moved lose their assignments and are
//! stopped.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{info, warn};

use corral_state::*;

use crate::error::{FacadeError, FacadeResult};
use crate::facade::Facade;

/// What happened to the services bound to a removed host or virtual IP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IpRemoval {
    /// Services now bound to another IP of their pool.
    pub reassigned: BTreeSet<ServiceId>,
    /// Services whose assignments were deleted and which were stopped.
    pub stopped: BTreeSet<ServiceId>,
}

impl Facade {
    // ── Hosts ──────────────────────────────────────────────────────

    /// Delete a host and move its services' static assignments elsewhere.
    ///
    /// Like the other removal operations this stops services through the
    /// tenant read lock and must not be called while holding `lock_tenant`.
    pub async fn remove_host(&self, host_id: &str) -> FacadeResult<IpRemoval> {
        if self.store.get_host(host_id)?.is_none() {
            return Err(FacadeError::HostNotFound(host_id.to_string()));
        }
        let bound = services_of(&self.store.list_assignments_for_host(host_id)?);

        self.store.delete_host(host_id)?;
        info!(%host_id, services = bound.len(), "host removed");

        let mut removal = self.reassign(&bound).await;
        removal.stopped = self.remove_addr_assignments_by_host(host_id).await?;
        removal.reassigned.retain(|id| !removal.stopped.contains(id));
        Ok(removal)
    }

    // ── Virtual IPs ────────────────────────────────────────────────

    /// Drop a virtual IP from its pool and move the services bound to it.
    pub async fn remove_virtual_ip(&self, pool_id: &str, ip: &str) -> FacadeResult<IpRemoval> {
        let mut pool = self
            .store
            .get_pool(pool_id)?
            .ok_or_else(|| FacadeError::PoolNotExists(pool_id.to_string()))?;
        let before = pool.virtual_ips.len();
        pool.virtual_ips.retain(|vip| vip.ip != ip);
        if pool.virtual_ips.len() == before {
            return Err(FacadeError::VirtualIpNotExists {
                pool_id: pool_id.to_string(),
                ip: ip.to_string(),
            });
        }
        let bound = services_of(&self.store.list_assignments_for_ip(ip)?);

        self.store.put_pool(&pool)?;
        info!(%pool_id, %ip, services = bound.len(), "virtual IP removed");

        let mut removal = self.reassign(&bound).await;
        removal.stopped = self.remove_addr_assignments_by_ip(ip).await?;
        removal.reassigned.retain(|id| !removal.stopped.contains(id));
        Ok(removal)
    }

    /// Auto-assign each service, collecting the ones that moved.
    async fn reassign(&self, services: &BTreeSet<ServiceId>) -> IpRemoval {
        let mut removal = IpRemoval::default();
        for service_id in services {
            match self.assign_ips(service_id, None).await {
                Ok(()) => {
                    removal.reassigned.insert(service_id.clone());
                }
                Err(err) => {
                    warn!(%service_id, error = %err, "could not move service to another IP")
                }
            }
        }
        removal
    }
}

fn services_of(assignments: &[AddressAssignment]) -> BTreeSet<ServiceId> {
    assignments.iter().map(|a| a.service_id.clone()).collect()
}
