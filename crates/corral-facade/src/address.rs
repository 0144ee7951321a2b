//! Address assignment engine.
//!
//! Binds the configurable endpoints of a service to one IP:port each. All
//! endpoints of a service share one IP. Manual assignment validates a
//! caller-chosen IP against the service's pool; auto assignment first tries
//! to keep the IP the service already uses and otherwise picks uniformly at
//! random among the pool's virtual IPs and its hosts' static IPs that are
//! free on every required port.
//!
//! Uniqueness of IP:port and of service endpoint is checked again by the
//! store at write time, so a caller that loses a race with a concurrent
//! assignment gets [`FacadeError::AddrAssignExists`].

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, error, info, warn};

use corral_state::*;

use crate::error::{FacadeError, FacadeResult};
use crate::facade::Facade;
use crate::scheduler::LockScope;
use crate::walk::{Visit, walk_services};

/// An IP chosen for a service, before it becomes assignment records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpInfo {
    pub ip: String,
    pub assignment_type: AssignmentType,
    pub host_id: Option<HostId>,
}

impl IpInfo {
    fn virtual_ip(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            assignment_type: AssignmentType::Virtual,
            host_id: None,
        }
    }

    fn static_ip(ip: &str, host_id: &str) -> Self {
        Self {
            ip: ip.to_string(),
            assignment_type: AssignmentType::Static,
            host_id: Some(host_id.to_string()),
        }
    }
}

/// Distinct ports required by the configurable endpoints of one service.
///
/// Two configurable endpoints of the same service on the same port is an
/// error. Ports are not compared across services.
pub fn required_ports(svc: &Service) -> FacadeResult<BTreeSet<u16>> {
    let mut ports = BTreeSet::new();
    for (_, port) in svc.configured_ports() {
        if !ports.insert(port) {
            return Err(FacadeError::MultiplePorts {
                service_id: svc.id.clone(),
                port,
            });
        }
    }
    Ok(ports)
}

/// The IP shared by every assignment, if they all agree on one.
fn shared_ip(svc: &Service, assignments: &[AddressAssignment]) -> Option<String> {
    let first = assignments.first()?;
    if assignments.iter().all(|a| a.ip_addr == first.ip_addr) {
        Some(first.ip_addr.clone())
    } else {
        warn!(
            service_id = %svc.id,
            ips = ?assignments.iter().map(|a| a.ip_addr.as_str()).collect::<BTreeSet<_>>(),
            "service has assignments on more than one IP"
        );
        None
    }
}

impl Facade {
    // ── Assignment ─────────────────────────────────────────────────

    /// Assign an IP to a service and all of its descendants.
    ///
    /// `None` or an empty string requests auto assignment. A running service
    /// that gains an assignment is restarted through [`Facade::schedule_service`],
    /// so callers holding [`Facade::lock_tenant`] must use
    /// [`Facade::assign_ips_locked`] instead.
    pub async fn assign_ips(&self, service_id: &str, ip: Option<&str>) -> FacadeResult<()> {
        self.assign_tree(service_id, ip, LockScope::Acquire).await
    }

    /// Same as [`Facade::assign_ips`], for callers that already hold the
    /// tenant lock.
    pub async fn assign_ips_locked(&self, service_id: &str, ip: Option<&str>) -> FacadeResult<()> {
        self.assign_tree(service_id, ip, LockScope::Held).await
    }

    async fn assign_tree(&self, service_id: &str, ip: Option<&str>, scope: LockScope) -> FacadeResult<()> {
        let ip = ip.filter(|ip| !ip.is_empty());
        let this = self;
        walk_services(&self.store, service_id, true, |svc| async move {
            match this.assign_service_ips(&svc, ip, scope).await {
                Ok(()) => Visit::Continue,
                Err(err) => Visit::Stop(err),
            }
        })
        .await?;
        Ok(())
    }

    async fn assign_service_ips(&self, svc: &Service, ip: Option<&str>, scope: LockScope) -> FacadeResult<()> {
        let ports = required_ports(svc)?;
        if ports.is_empty() {
            debug!(service_id = %svc.id, "no configurable endpoints, nothing to assign");
            return Ok(());
        }
        let existing = self.store.list_assignments_for_service(&svc.id)?;

        let info = match ip {
            None => self.reuse_or_auto_assignment(svc, &ports, &existing)?,
            Some(ip) => {
                let held: BTreeSet<u16> = existing
                    .iter()
                    .filter(|a| a.ip_addr == ip)
                    .map(|a| a.port)
                    .collect();
                let missing: Vec<u16> = ports.difference(&held).copied().collect();
                self.get_manual_assignment(&svc.pool_id, ip, &missing)?
            }
        };

        // Keep assignments already on the chosen IP with the right port.
        let mut kept = HashSet::new();
        for assignment in &existing {
            let wanted = svc
                .endpoints
                .iter()
                .find(|ep| ep.name == assignment.endpoint_name)
                .and_then(|ep| ep.configured_port());
            if assignment.ip_addr == info.ip && wanted == Some(assignment.port) {
                kept.insert(assignment.endpoint_name.as_str());
            } else {
                self.store.delete_assignment(&assignment.id)?;
                debug!(
                    service_id = %svc.id,
                    endpoint = %assignment.endpoint_name,
                    ip = %assignment.ip_addr,
                    port = assignment.port,
                    "removed stale address assignment"
                );
            }
        }

        let created = self.bind_endpoints(svc, &info, &kept)?;
        if created > 0 && svc.desired_state == DesiredState::Run {
            if let Err(err) = self
                .reschedule(&svc.id, false, DesiredState::Restart, scope)
                .await
            {
                warn!(service_id = %svc.id, error = %err, "could not restart service after address change");
            }
        }
        Ok(())
    }

    /// Create an assignment on `info` for every configurable endpoint not in
    /// `kept`. If one create fails, the assignments created here are deleted
    /// again and the create error is returned.
    fn bind_endpoints(&self, svc: &Service, info: &IpInfo, kept: &HashSet<&str>) -> FacadeResult<usize> {
        let mut created: Vec<AssignmentId> = Vec::new();
        for (ep, port) in svc.configured_ports() {
            if kept.contains(ep.name.as_str()) {
                continue;
            }
            let assignment = AddressAssignment {
                id: String::new(),
                assignment_type: info.assignment_type,
                host_id: info.host_id.clone(),
                pool_id: svc.pool_id.clone(),
                ip_addr: info.ip.clone(),
                port,
                service_id: svc.id.clone(),
                endpoint_name: ep.name.clone(),
            };
            match self.store.create_assignment(&assignment) {
                Ok(stored) => {
                    info!(
                        service_id = %svc.id,
                        endpoint = %ep.name,
                        ip = %stored.ip_addr,
                        port,
                        id = %stored.id,
                        "address assigned"
                    );
                    created.push(stored.id);
                }
                Err(err) => {
                    let err = FacadeError::from(err);
                    warn!(
                        service_id = %svc.id,
                        endpoint = %ep.name,
                        ip = %info.ip,
                        port,
                        error = %err,
                        rolled_back = created.len(),
                        "address assignment failed, undoing this call's assignments"
                    );
                    self.unbind(&created);
                    return Err(err);
                }
            }
        }
        Ok(created.len())
    }

    fn unbind(&self, ids: &[AssignmentId]) {
        for id in ids {
            if let Err(err) = self.store.delete_assignment(id) {
                warn!(%id, error = %err, "could not delete address assignment during rollback");
            }
        }
    }

    fn reuse_or_auto_assignment(
        &self,
        svc: &Service,
        ports: &BTreeSet<u16>,
        existing: &[AddressAssignment],
    ) -> FacadeResult<IpInfo> {
        if let Some(ip) = shared_ip(svc, existing) {
            let held: BTreeSet<u16> = existing.iter().map(|a| a.port).collect();
            let missing: Vec<u16> = ports.difference(&held).copied().collect();
            match self.get_manual_assignment(&svc.pool_id, &ip, &missing) {
                Ok(info) => return Ok(info),
                Err(err) => {
                    debug!(service_id = %svc.id, %ip, error = %err, "cannot reuse current IP, picking a new one")
                }
            }
        }
        let all: Vec<u16> = ports.iter().copied().collect();
        self.get_auto_assignment(&svc.pool_id, &all)
    }

    /// Pick a random IP of the pool that is free on every given port.
    pub fn get_auto_assignment(&self, pool_id: &str, ports: &[u16]) -> FacadeResult<IpInfo> {
        let pool = self
            .store
            .get_pool(pool_id)?
            .ok_or_else(|| FacadeError::PoolNotExists(pool_id.to_string()))?;

        let mut taken = HashSet::new();
        for &port in ports {
            for assignment in self.store.list_assignments_for_port(port)? {
                taken.insert(assignment.ip_addr);
            }
        }

        let mut candidates: Vec<IpInfo> = pool
            .virtual_ips
            .iter()
            .filter(|vip| !taken.contains(&vip.ip))
            .map(|vip| IpInfo::virtual_ip(&vip.ip))
            .collect();
        for host in self.store.list_hosts_in_pool(pool_id)? {
            candidates.extend(
                host.ips
                    .iter()
                    .filter(|ip| !taken.contains(&ip.ip_address))
                    .map(|ip| IpInfo::static_ip(&ip.ip_address, &host.id)),
            );
        }

        if candidates.is_empty() {
            error!(%pool_id, ?ports, "no IPs are available to be assigned");
            return Err(FacadeError::NoIpsAvailable {
                pool_id: pool_id.to_string(),
            });
        }
        let picked = candidates.swap_remove(self.pick_index(candidates.len()));
        debug!(%pool_id, ip = %picked.ip, "auto-selected IP");
        Ok(picked)
    }

    /// Validate a caller-chosen IP for the given ports.
    pub fn get_manual_assignment(&self, pool_id: &str, ip: &str, ports: &[u16]) -> FacadeResult<IpInfo> {
        for &port in ports {
            if let Some(existing) = self.store.find_assignment_by_address(ip, port)? {
                error!(
                    %ip,
                    port,
                    service_id = %existing.service_id,
                    endpoint = %existing.endpoint_name,
                    "address already assigned"
                );
                return Err(FacadeError::AddrAssignExists(address_key(ip, port)));
            }
        }

        let pool = self
            .store
            .get_pool(pool_id)?
            .ok_or_else(|| FacadeError::PoolNotExists(pool_id.to_string()))?;
        if pool.virtual_ips.iter().any(|vip| vip.ip == ip) {
            return Ok(IpInfo::virtual_ip(ip));
        }

        let host = self
            .store
            .get_host_by_ip(ip)?
            .ok_or_else(|| FacadeError::HostNotExists(ip.to_string()))?;
        if host.pool_id != pool_id {
            return Err(FacadeError::HostNotInPool {
                host_id: host.id,
                pool_id: pool_id.to_string(),
            });
        }
        host.ips
            .iter()
            .find(|res| res.ip_address == ip)
            .map(|res| IpInfo::static_ip(&res.ip_address, &host.id))
            .ok_or_else(|| FacadeError::HostNotExists(ip.to_string()))
    }

    /// Re-create the assignments carried by a service definition.
    ///
    /// Each endpoint first tries its recorded IP and falls back to auto
    /// assignment. Failures are logged and skipped. Returns the number of
    /// endpoints restored.
    pub fn restore_ips(&self, svc: &Service) -> usize {
        let mut restored = 0;
        for ep in &svc.endpoints {
            let (Some(recorded), Some(port)) = (ep.address_assignment.as_ref(), ep.configured_port())
            else {
                continue;
            };
            if recorded.ip_addr.is_empty() {
                continue;
            }

            match self.store.find_assignment_by_endpoint(&svc.id, &ep.name) {
                Ok(Some(current)) => {
                    debug!(service_id = %svc.id, endpoint = %ep.name, ip = %current.ip_addr, "endpoint already assigned");
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(service_id = %svc.id, endpoint = %ep.name, error = %err, "could not look up assignment");
                    continue;
                }
            }

            let info = match self.get_manual_assignment(&svc.pool_id, &recorded.ip_addr, &[port]) {
                Ok(info) => info,
                Err(err) => {
                    warn!(
                        service_id = %svc.id,
                        endpoint = %ep.name,
                        ip = %recorded.ip_addr,
                        error = %err,
                        "could not restore IP, trying auto assignment"
                    );
                    match self.get_auto_assignment(&svc.pool_id, &[port]) {
                        Ok(info) => info,
                        Err(err) => {
                            warn!(service_id = %svc.id, endpoint = %ep.name, error = %err, "could not auto-assign IP");
                            continue;
                        }
                    }
                }
            };

            let assignment = AddressAssignment {
                id: String::new(),
                assignment_type: info.assignment_type,
                host_id: info.host_id,
                pool_id: svc.pool_id.clone(),
                ip_addr: info.ip,
                port,
                service_id: svc.id.clone(),
                endpoint_name: ep.name.clone(),
            };
            match self.store.create_assignment(&assignment) {
                Ok(stored) => {
                    info!(service_id = %svc.id, endpoint = %ep.name, ip = %stored.ip_addr, port, "restored address assignment");
                    restored += 1;
                }
                Err(err) => {
                    warn!(service_id = %svc.id, endpoint = %ep.name, error = %err, "could not restore address assignment")
                }
            }
        }
        restored
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn get_addr_assignments_by_service(&self, service_id: &str) -> FacadeResult<Vec<AddressAssignment>> {
        Ok(self.store.list_assignments_for_service(service_id)?)
    }

    pub fn get_addr_assignments_by_ip(&self, ip: &str) -> FacadeResult<Vec<AddressAssignment>> {
        Ok(self.store.list_assignments_for_ip(ip)?)
    }

    pub fn get_addr_assignments_by_host(&self, host_id: &str) -> FacadeResult<Vec<AddressAssignment>> {
        Ok(self.store.list_assignments_for_host(host_id)?)
    }

    pub fn get_addr_assignments_by_port(&self, port: u16) -> FacadeResult<Vec<AddressAssignment>> {
        Ok(self.store.list_assignments_for_port(port)?)
    }

    // ── Removal ────────────────────────────────────────────────────

    // Removal stops the affected services through the tenant read lock. The
    // affected services can span tenants, so these must not be called while
    // holding `lock_tenant` for any of them.

    /// Delete every assignment of a service and stop it.
    pub async fn remove_addr_assignments_by_service(&self, service_id: &str) -> FacadeResult<BTreeSet<ServiceId>> {
        let assignments = self.store.list_assignments_for_service(service_id)?;
        self.remove_assignments(assignments).await
    }

    /// Delete every assignment on an IP and stop the services that held them.
    pub async fn remove_addr_assignments_by_ip(&self, ip: &str) -> FacadeResult<BTreeSet<ServiceId>> {
        let assignments = self.store.list_assignments_for_ip(ip)?;
        self.remove_assignments(assignments).await
    }

    /// Delete every static assignment of a host and stop the services that
    /// held them.
    pub async fn remove_addr_assignments_by_host(&self, host_id: &str) -> FacadeResult<BTreeSet<ServiceId>> {
        let assignments = self.store.list_assignments_for_host(host_id)?;
        self.remove_assignments(assignments).await
    }

    async fn remove_assignments(&self, assignments: Vec<AddressAssignment>) -> FacadeResult<BTreeSet<ServiceId>> {
        let mut affected = BTreeSet::new();
        for assignment in assignments {
            self.store.delete_assignment(&assignment.id)?;
            info!(
                service_id = %assignment.service_id,
                endpoint = %assignment.endpoint_name,
                ip = %assignment.ip_addr,
                port = assignment.port,
                "address assignment removed"
            );
            affected.insert(assignment.service_id);
        }

        for service_id in &affected {
            match self.schedule_service(service_id, false, DesiredState::Stop).await {
                Ok(_) => {}
                Err(err) if matches!(err.source, FacadeError::ServiceNotFound(_)) => {
                    debug!(%service_id, "service already gone, nothing to stop")
                }
                Err(err) => warn!(%service_id, error = %err, "could not stop service after removing its addresses"),
            }
        }
        Ok(affected)
    }
}
