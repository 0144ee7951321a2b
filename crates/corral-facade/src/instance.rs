//! Instance current-state derivation and instance views.
//!
//! Worker nodes publish one [`InstanceState`] per running copy of a
//! service. The facade never mutates those records; it derives the
//! observable lifecycle state from the desired state and the
//! started/terminated timestamps.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use corral_state::{DesiredState, InstanceState, Service, StateStore};

use crate::error::{FacadeError, FacadeResult};
use crate::facade::Facade;
use crate::health::{HealthStatus, aggregate_health};

/// Source of instance records published by the runtime layer.
#[async_trait]
pub trait InstanceSource: Send + Sync {
    async fn service_states(&self, pool_id: &str, service_id: &str) -> FacadeResult<Vec<InstanceState>>;
    async fn host_states(&self, pool_id: &str, host_id: &str) -> FacadeResult<Vec<InstanceState>>;
}

#[async_trait]
impl InstanceSource for StateStore {
    async fn service_states(&self, _pool_id: &str, service_id: &str) -> FacadeResult<Vec<InstanceState>> {
        Ok(self.list_instances_for_service(service_id)?)
    }

    async fn host_states(&self, _pool_id: &str, host_id: &str) -> FacadeResult<Vec<InstanceState>> {
        Ok(self.list_instances_for_host(host_id)?)
    }
}

/// Observable lifecycle state of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Pausing,
    Paused,
}

/// True when `a` is set and strictly later than `b`. An unset timestamp is
/// never after anything.
fn is_after(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> bool {
    match (a, b) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(a), Some(b)) => a > b,
    }
}

/// Derive the current state of an instance.
///
/// | desired | condition                          | current  |
/// |---------|------------------------------------|----------|
/// | Stop    | terminated after started           | Stopped  |
/// | Stop    | otherwise                          | Stopping |
/// | Run     | started after terminated, unpaused | Running  |
/// | Run     | otherwise                          | Starting |
/// | Pause   | started after terminated, paused   | Paused   |
/// | Pause   | started after terminated, unpaused | Pausing  |
/// | Pause   | started not after terminated       | Stopped  |
///
/// Returns `None` for a desired state outside the table.
pub fn derive_current_state(state: &InstanceState) -> Option<CurrentState> {
    let up = is_after(state.started, state.terminated);
    match state.desired_state {
        DesiredState::Stop => Some(if is_after(state.terminated, state.started) {
            CurrentState::Stopped
        } else {
            CurrentState::Stopping
        }),
        DesiredState::Run => Some(if up && !state.paused {
            CurrentState::Running
        } else {
            CurrentState::Starting
        }),
        DesiredState::Pause => Some(match (up, state.paused) {
            (true, true) => CurrentState::Paused,
            (true, false) => CurrentState::Pausing,
            (false, _) => CurrentState::Stopped,
        }),
        DesiredState::Restart => None,
    }
}

/// Time since the instance last started, zero when it is not up.
pub fn uptime(state: &InstanceState, now: DateTime<Utc>) -> Duration {
    match state.started {
        Some(started) if is_after(state.started, state.terminated) => {
            (now - started).to_std().unwrap_or_default()
        }
        _ => Duration::ZERO,
    }
}

/// API view of one instance.
#[derive(Debug, Clone, Serialize)]
pub struct Instance {
    pub service_id: String,
    pub service_name: String,
    pub instance_id: u32,
    pub host_id: String,
    pub host_name: String,
    pub container_id: String,
    pub image_id: String,
    /// Whether the instance runs the image currently set on its service.
    pub image_synced: bool,
    pub desired_state: DesiredState,
    pub current_state: Option<CurrentState>,
    pub scheduled: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub terminated: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub health: BTreeMap<String, HealthStatus>,
}

impl Facade {
    /// Derived views of every instance of a service.
    pub async fn get_service_instances(&self, service_id: &str) -> FacadeResult<Vec<Instance>> {
        let svc = self.get_service(service_id)?;
        let states = self.instances.service_states(&svc.pool_id, &svc.id).await?;
        let now = Utc::now();
        debug!(%service_id, count = states.len(), "loaded service instances");

        let mut host_names: HashMap<String, String> = HashMap::new();
        let mut views = Vec::with_capacity(states.len());
        for state in &states {
            if !host_names.contains_key(&state.host_id) {
                let name = match self.store.get_host(&state.host_id)? {
                    Some(host) => host.name,
                    None => state.host_id.clone(),
                };
                host_names.insert(state.host_id.clone(), name);
            }
            let host_name = host_names.get(&state.host_id).map_or("", String::as_str);
            views.push(self.instance_view(&svc, host_name, state, now));
        }
        Ok(views)
    }

    /// Derived views of every instance placed on a host.
    pub async fn get_host_instances(&self, host_id: &str) -> FacadeResult<Vec<Instance>> {
        let host = self
            .store
            .get_host(host_id)?
            .ok_or_else(|| FacadeError::HostNotFound(host_id.to_string()))?;
        let states = self.instances.host_states(&host.pool_id, &host.id).await?;
        let now = Utc::now();

        let mut services: HashMap<String, Option<Service>> = HashMap::new();
        let mut views = Vec::with_capacity(states.len());
        for state in &states {
            if !services.contains_key(&state.service_id) {
                let svc = self.store.get_service(&state.service_id)?;
                services.insert(state.service_id.clone(), svc);
            }
            match services.get(&state.service_id).and_then(Option::as_ref) {
                Some(svc) => views.push(self.instance_view(svc, &host.name, state, now)),
                None => {
                    warn!(%host_id, service_id = %state.service_id, "instance of unknown service, skipping")
                }
            }
        }
        Ok(views)
    }

    fn instance_view(
        &self,
        svc: &Service,
        host_name: &str,
        state: &InstanceState,
        now: DateTime<Utc>,
    ) -> Instance {
        let up = uptime(state, now);
        Instance {
            service_id: svc.id.clone(),
            service_name: svc.name.clone(),
            instance_id: state.instance_id,
            host_id: state.host_id.clone(),
            host_name: host_name.to_string(),
            container_id: state.container_id.clone(),
            image_id: state.image_id.clone(),
            image_synced: state.image_id == svc.image_id,
            desired_state: state.desired_state,
            current_state: derive_current_state(state),
            scheduled: state.scheduled,
            started: state.started,
            terminated: state.terminated,
            uptime_secs: up.as_secs(),
            health: aggregate_health(&self.health, svc, state.instance_id, up),
        }
    }
}
