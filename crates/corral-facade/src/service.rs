//! Service registry operations: add, update, remove, restore, and tree
//! lookups.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, info, warn};

use corral_state::Service;

use crate::address::required_ports;
use crate::error::{FacadeError, FacadeResult};
use crate::facade::Facade;
use crate::walk::ServiceWalk;

impl Facade {
    pub fn get_service(&self, service_id: &str) -> FacadeResult<Service> {
        self.store
            .get_service(service_id)?
            .ok_or_else(|| FacadeError::ServiceNotFound(service_id.to_string()))
    }

    /// ID of the root service of the tree containing `service_id`.
    pub fn get_tenant_id(&self, service_id: &str) -> FacadeResult<String> {
        let mut seen = HashSet::new();
        let mut current = self.get_service(service_id)?;
        while let Some(parent_id) = current.parent_service_id.take() {
            if !seen.insert(current.id.clone()) {
                return Err(FacadeError::InvalidParent {
                    service_id: service_id.to_string(),
                    reason: "parent chain has a cycle".to_string(),
                });
            }
            current = self.get_service(&parent_id)?;
        }
        Ok(current.id)
    }

    /// A service and all of its descendants, parents before children.
    pub fn get_service_list(&self, service_id: &str) -> FacadeResult<Vec<Service>> {
        ServiceWalk::new(&self.store, service_id, true).collect()
    }

    /// Register a new service.
    pub async fn add_service(&self, mut svc: Service) -> FacadeResult<Service> {
        if self.store.get_service(&svc.id)?.is_some() {
            return Err(FacadeError::ServiceExists(svc.id));
        }
        self.check_definition(&svc)?;

        let now = Utc::now();
        svc.created_at = now;
        svc.updated_at = now;
        self.store.put_service(&svc)?;

        let tenant_id = self.get_tenant_id(&svc.id)?;
        self.coordinated(self.coordinator.update_service(&tenant_id, &svc))
            .await?;
        info!(service_id = %svc.id, name = %svc.name, %tenant_id, "service added");
        Ok(svc)
    }

    /// Replace an existing service definition.
    ///
    /// A service with a parent cannot become a root, and cannot be moved
    /// under one of its own descendants.
    pub async fn update_service(&self, mut svc: Service) -> FacadeResult<Service> {
        let current = self.get_service(&svc.id)?;
        if current.parent_service_id.is_some() && svc.parent_service_id.is_none() {
            return Err(FacadeError::InvalidParent {
                service_id: svc.id,
                reason: "a child service cannot become a tenant".to_string(),
            });
        }
        if let Some(parent_id) = svc.parent_service_id.as_deref() {
            let descendants = self.get_service_list(&svc.id)?;
            if descendants.iter().any(|d| d.id == parent_id) {
                return Err(FacadeError::InvalidParent {
                    service_id: svc.id,
                    reason: format!("{parent_id} is the service itself or one of its descendants"),
                });
            }
        }
        self.check_definition(&svc)?;

        svc.created_at = current.created_at;
        svc.updated_at = Utc::now();
        self.store.put_service(&svc)?;

        let tenant_id = self.get_tenant_id(&svc.id)?;
        self.coordinated(self.coordinator.update_service(&tenant_id, &svc))
            .await?;
        info!(service_id = %svc.id, name = %svc.name, "service updated");
        Ok(svc)
    }

    /// Remove a service and its descendants.
    ///
    /// Runs under the tenant lock. Refused while any service in the subtree
    /// still has instance records.
    pub async fn remove_service(&self, service_id: &str) -> FacadeResult<()> {
        let tenant_id = self.get_tenant_id(service_id)?;
        self.lock_tenant(&tenant_id).await?;
        let result = self.remove_service_tree(service_id).await;
        if let Err(err) = self
            .retry_unlock_tenant(&tenant_id, None, self.retry_interval)
            .await
        {
            warn!(%tenant_id, error = %err, "tenant left locked after service removal");
        }
        result
    }

    async fn remove_service_tree(&self, service_id: &str) -> FacadeResult<()> {
        let services = self.get_service_list(service_id)?;
        for svc in &services {
            let states = self.instances.service_states(&svc.pool_id, &svc.id).await?;
            if !states.is_empty() {
                return Err(FacadeError::InstancesRunning(svc.id.clone()));
            }
        }

        // Children before parents.
        for svc in services.iter().rev() {
            for assignment in self.store.list_assignments_for_service(&svc.id)? {
                self.store.delete_assignment(&assignment.id)?;
            }
            self.coordinated(self.coordinator.remove_service(&svc.pool_id, &svc.id))
                .await?;
            self.store.delete_service(&svc.id)?;
            info!(service_id = %svc.id, name = %svc.name, "service removed");
        }
        Ok(())
    }

    /// Load service definitions into a tenant, restoring their recorded
    /// address assignments. Parents must come before their children.
    ///
    /// Returns the number of services stored.
    pub async fn restore_services(&self, tenant_id: &str, services: Vec<Service>) -> FacadeResult<usize> {
        let mut restored = 0;
        for mut svc in services {
            if let Some(current) = self.store.get_service(&svc.id)? {
                svc.created_at = current.created_at;
            }
            svc.updated_at = Utc::now();
            self.store.put_service(&svc)?;
            self.coordinated(self.coordinator.update_service(tenant_id, &svc))
                .await?;

            let ips = self.restore_ips(&svc);
            debug!(service_id = %svc.id, %tenant_id, ips, "service restored");
            restored += 1;
        }
        info!(%tenant_id, restored, "services restored");
        Ok(restored)
    }

    /// Parent and pool must exist; endpoint ports must be distinct.
    fn check_definition(&self, svc: &Service) -> FacadeResult<()> {
        if let Some(parent_id) = svc.parent_service_id.as_deref() {
            if self.store.get_service(parent_id)?.is_none() {
                return Err(FacadeError::InvalidParent {
                    service_id: svc.id.clone(),
                    reason: format!("parent {parent_id} does not exist"),
                });
            }
        }
        if self.store.get_pool(&svc.pool_id)?.is_none() {
            return Err(FacadeError::PoolNotExists(svc.pool_id.clone()));
        }
        required_ports(svc)?;
        Ok(())
    }
}
