//! Desired-state scheduler.
//!
//! Applies a target desired state to a service and, when `auto_launch` is
//! set, to its descendants. Startability of the whole visited tree is
//! validated before anything is written. Non-root services with manual
//! launch are left alone, as are services already in the target state.
//!
//! `Restart` is not stored: every instance of the service is stopped
//! through the coordinator and the stored state becomes `Run`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use corral_state::{DesiredState, LaunchMode, Service};

use crate::error::{FacadeError, FacadeResult, ScheduleError};
use crate::facade::Facade;
use crate::walk::{ServiceWalk, Visit, walk_services};

/// A scheduling request as received from an API caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub service_id: String,
    #[serde(default)]
    pub auto_launch: bool,
    /// Integer desired-state code.
    pub desired_state: i32,
}

impl Facade {
    /// Decode and apply a scheduling request.
    pub async fn schedule(&self, request: &ScheduleRequest) -> Result<usize, ScheduleError> {
        let target = DesiredState::try_from(request.desired_state)
            .map_err(|err| ScheduleError::unapplied(FacadeError::DesiredStateUnknown(err.0)))?;
        self.schedule_service(&request.service_id, request.auto_launch, target)
            .await
    }

    /// Apply `target` to a service tree under the tenant's read lock.
    ///
    /// Returns the number of services whose stored state changed. On error
    /// the count of services already changed is carried in the error.
    pub async fn schedule_service(
        &self,
        service_id: &str,
        auto_launch: bool,
        target: DesiredState,
    ) -> Result<usize, ScheduleError> {
        let tenant_id = self.get_tenant_id(service_id).map_err(ScheduleError::unapplied)?;
        let lock = self.locks.get(&tenant_id);
        let _guard = lock.read().await;
        self.schedule_locked(service_id, auto_launch, target).await
    }

    /// Same as [`Facade::schedule_service`], for callers that already hold
    /// the tenant lock through [`Facade::lock_tenant`].
    pub async fn schedule_locked(
        &self,
        service_id: &str,
        auto_launch: bool,
        target: DesiredState,
    ) -> Result<usize, ScheduleError> {
        if target != DesiredState::Stop {
            self.can_start_service(service_id, auto_launch)
                .await
                .map_err(ScheduleError::unapplied)?;
        }
        let tenant_id = self.get_tenant_id(service_id).map_err(ScheduleError::unapplied)?;

        let mut affected = 0;
        for next in ServiceWalk::new(&self.store, service_id, auto_launch) {
            let applied = match next {
                Ok(svc) => self.apply_desired_state(svc, service_id, &tenant_id, target).await,
                Err(err) => Err(err),
            };
            match applied {
                Ok(true) => affected += 1,
                Ok(false) => {}
                Err(source) => return Err(ScheduleError { affected, source }),
            }
        }
        info!(%service_id, %tenant_id, desired_state = %target, affected, "service tree scheduled");
        Ok(affected)
    }

    /// Schedule through whichever entry point matches the caller's lock.
    pub(crate) async fn reschedule(
        &self,
        service_id: &str,
        auto_launch: bool,
        target: DesiredState,
        scope: LockScope,
    ) -> Result<usize, ScheduleError> {
        match scope {
            LockScope::Acquire => self.schedule_service(service_id, auto_launch, target).await,
            LockScope::Held => self.schedule_locked(service_id, auto_launch, target).await,
        }
    }

    pub async fn start_service(&self, service_id: &str, auto_launch: bool) -> Result<usize, ScheduleError> {
        self.schedule_service(service_id, auto_launch, DesiredState::Run).await
    }

    pub async fn stop_service(&self, service_id: &str, auto_launch: bool) -> Result<usize, ScheduleError> {
        self.schedule_service(service_id, auto_launch, DesiredState::Stop).await
    }

    pub async fn pause_service(&self, service_id: &str, auto_launch: bool) -> Result<usize, ScheduleError> {
        self.schedule_service(service_id, auto_launch, DesiredState::Pause).await
    }

    pub async fn restart_service(&self, service_id: &str, auto_launch: bool) -> Result<usize, ScheduleError> {
        self.schedule_service(service_id, auto_launch, DesiredState::Restart).await
    }

    /// Check that every service the walk would touch may start: each
    /// configurable endpoint has an address assignment and no other service
    /// runs any of its virtual hosts.
    pub async fn can_start_service(&self, service_id: &str, auto_launch: bool) -> FacadeResult<()> {
        let this = self;
        walk_services(&self.store, service_id, auto_launch, |svc| async move {
            if skipped_launch(&svc, service_id) {
                return Visit::Continue;
            }
            match this.validate_service_start(&svc).await {
                Ok(()) => Visit::Continue,
                Err(err) => Visit::Stop(err),
            }
        })
        .await?;
        Ok(())
    }

    async fn validate_service_start(&self, svc: &Service) -> FacadeResult<()> {
        for ep in &svc.endpoints {
            if ep.is_configurable()
                && self
                    .store
                    .find_assignment_by_endpoint(&svc.id, &ep.name)?
                    .is_none()
            {
                return Err(FacadeError::MissingAddrAssign {
                    service_id: svc.id.clone(),
                    endpoint: ep.name.clone(),
                });
            }
            for vhost in &ep.vhosts {
                let holder = self
                    .coordinated(self.coordinator.check_running_vhost(vhost, &svc.id))
                    .await?;
                if let Some(holder) = holder {
                    return Err(FacadeError::VHostInUse {
                        vhost: vhost.clone(),
                        service_id: holder,
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns whether the stored state changed.
    async fn apply_desired_state(
        &self,
        mut svc: Service,
        root_id: &str,
        tenant_id: &str,
        target: DesiredState,
    ) -> FacadeResult<bool> {
        if skipped_launch(&svc, root_id) {
            debug!(service_id = %svc.id, "manual launch, skipping");
            return Ok(false);
        }
        if svc.desired_state == target {
            debug!(service_id = %svc.id, desired_state = %target, "already in desired state");
            return Ok(false);
        }

        let stored = if target == DesiredState::Restart {
            self.stop_instances(&svc).await?;
            DesiredState::Run
        } else {
            target
        };
        svc.desired_state = stored;
        svc.updated_at = Utc::now();
        self.store.put_service(&svc)?;
        self.coordinated(self.coordinator.update_service(tenant_id, &svc))
            .await?;
        info!(service_id = %svc.id, name = %svc.name, desired_state = %stored, "desired state changed");
        Ok(true)
    }

    async fn stop_instances(&self, svc: &Service) -> FacadeResult<()> {
        let states = self.instances.service_states(&svc.pool_id, &svc.id).await?;
        for state in &states {
            self.coordinated(self.coordinator.stop_service_instance(
                &svc.pool_id,
                &svc.id,
                state.instance_id,
            ))
            .await?;
        }
        debug!(service_id = %svc.id, stopped = states.len(), "instances stopped for restart");
        Ok(())
    }
}

/// Whether a caller already holds the tenant lock through
/// [`Facade::lock_tenant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockScope {
    Acquire,
    Held,
}

fn skipped_launch(svc: &Service, root_id: &str) -> bool {
    svc.id != root_id && svc.launch == LaunchMode::Manual
}
