//! Domain types for the Corral state store.
//!
//! These types represent the persisted model of services, address
//! assignments, hosts, resource pools, and running instances. All types are
//! serializable to/from JSON for storage in redb tables.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque service identifier.
pub type ServiceId = String;

/// Opaque host identifier.
pub type HostId = String;

/// Resource pool identifier.
pub type PoolId = String;

/// Address assignment identifier.
pub type AssignmentId = String;

// ── Desired state ─────────────────────────────────────────────────

/// Target run-state requested for a service.
///
/// Persisted as its integer code. `Restart` is never stored as a rest state;
/// applying it rewrites the stored state to `Run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum DesiredState {
    Restart,
    Stop,
    Run,
    Pause,
}

/// An integer that does not name a [`DesiredState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownDesiredState(pub i32);

impl fmt::Display for UnknownDesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown desired state {}", self.0)
    }
}

impl std::error::Error for UnknownDesiredState {}

impl DesiredState {
    pub fn code(self) -> i32 {
        match self {
            DesiredState::Restart => -1,
            DesiredState::Stop => 0,
            DesiredState::Run => 1,
            DesiredState::Pause => 2,
        }
    }
}

impl TryFrom<i32> for DesiredState {
    type Error = UnknownDesiredState;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            -1 => Ok(DesiredState::Restart),
            0 => Ok(DesiredState::Stop),
            1 => Ok(DesiredState::Run),
            2 => Ok(DesiredState::Pause),
            other => Err(UnknownDesiredState(other)),
        }
    }
}

impl From<DesiredState> for i32 {
    fn from(state: DesiredState) -> i32 {
        state.code()
    }
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DesiredState::Restart => "restart",
            DesiredState::Stop => "stop",
            DesiredState::Run => "go",
            DesiredState::Pause => "pause",
        };
        f.write_str(s)
    }
}

/// Whether a service follows its parent in tree-wide scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    #[default]
    Auto,
    Manual,
}

// ── Service ───────────────────────────────────────────────────────

/// A node in a tenant's service tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub deployment_id: String,
    /// `None` for a tenant (root) service.
    pub parent_service_id: Option<ServiceId>,
    pub pool_id: PoolId,
    pub desired_state: DesiredState,
    #[serde(default)]
    pub launch: LaunchMode,
    #[serde(default)]
    pub endpoints: Vec<ServiceEndpoint>,
    /// Health checks keyed by check name.
    #[serde(default)]
    pub health_checks: BTreeMap<String, HealthCheck>,
    #[serde(default)]
    pub instances: u32,
    #[serde(default)]
    pub image_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Definition of a named health check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheck {
    pub script: String,
    /// Check interval (e.g., "10s").
    pub interval: String,
    /// Timeout per check (e.g., "5s").
    pub timeout: String,
}

/// A network endpoint exported or imported by a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServiceEndpoint {
    pub name: String,
    #[serde(default)]
    pub application: String,
    /// "export" or "import".
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub protocol: String,
    /// Present when the endpoint needs its own IP:port binding.
    #[serde(default)]
    pub address_config: Option<AddressConfig>,
    /// Virtual hosts published through this endpoint.
    #[serde(default)]
    pub vhosts: Vec<String>,
    /// Binding carried by an imported service definition, replayed by
    /// address restoration. Not authoritative.
    #[serde(default)]
    pub address_assignment: Option<AddressAssignment>,
}

/// Port and protocol requested by a configurable endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddressConfig {
    pub port: u16,
    pub protocol: String,
}

impl ServiceEndpoint {
    /// True when the endpoint requires an address assignment to start.
    pub fn is_configurable(&self) -> bool {
        self.configured_port().is_some()
    }

    /// The requested port of a configurable endpoint.
    pub fn configured_port(&self) -> Option<u16> {
        self.address_config
            .as_ref()
            .filter(|c| c.port > 0 && !c.protocol.is_empty())
            .map(|c| c.port)
    }
}

// ── Address assignment ────────────────────────────────────────────

/// Whether an assignment binds a host's own IP or a pool's floating IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentType {
    Static,
    Virtual,
}

/// Binding of one IP:port to one (service, endpoint) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddressAssignment {
    /// Assigned by the store on creation when empty.
    #[serde(default)]
    pub id: AssignmentId,
    pub assignment_type: AssignmentType,
    /// Empty for virtual assignments.
    pub host_id: Option<HostId>,
    pub pool_id: PoolId,
    pub ip_addr: String,
    pub port: u16,
    pub service_id: ServiceId,
    pub endpoint_name: String,
}

// ── Hosts and pools ───────────────────────────────────────────────

/// A worker host and the static IPs it owns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    pub pool_id: PoolId,
    #[serde(default)]
    pub ips: Vec<HostIpResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostIpResource {
    pub host_id: HostId,
    pub ip_address: String,
    #[serde(default)]
    pub interface_name: String,
}

/// A resource pool and its floating IPs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourcePool {
    pub id: PoolId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub virtual_ips: Vec<VirtualIp>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VirtualIp {
    pub pool_id: PoolId,
    pub ip: String,
    #[serde(default)]
    pub netmask: String,
    #[serde(default)]
    pub bind_interface: String,
}

// ── Instance ──────────────────────────────────────────────────────

/// Runtime record for one running copy of a service, published by the
/// worker that owns it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceState {
    pub service_id: ServiceId,
    pub instance_id: u32,
    pub host_id: HostId,
    /// The last desired state the scheduler asked for.
    pub desired_state: DesiredState,
    pub scheduled: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub terminated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub container_id: String,
    /// Image the container is running.
    #[serde(default)]
    pub image_id: String,
}

impl Service {
    /// Build the unique path key: deployment id, parent, name.
    pub fn path_key(&self) -> String {
        let parent = self.parent_service_id.as_deref().unwrap_or("");
        format!("{}/{}/{}", self.deployment_id, parent, self.name)
    }

    /// Ports required by configurable endpoints, in endpoint order.
    pub fn configured_ports(&self) -> impl Iterator<Item = (&ServiceEndpoint, u16)> {
        self.endpoints
            .iter()
            .filter_map(|ep| ep.configured_port().map(|port| (ep, port)))
    }
}

impl AddressAssignment {
    /// Index key enforcing one assignment per IP:port.
    pub fn address_key(&self) -> String {
        address_key(&self.ip_addr, self.port)
    }

    /// Index key enforcing one assignment per service endpoint.
    pub fn endpoint_key(&self) -> String {
        endpoint_key(&self.service_id, &self.endpoint_name)
    }
}

impl InstanceState {
    /// Build the composite key for the instances table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.service_id, self.instance_id)
    }
}

/// `{ip}:{port}`; the port never contains a colon, so IPv6 keys stay unique.
pub fn address_key(ip: &str, port: u16) -> String {
    format!("{ip}:{port}")
}

/// `{service_id}#{endpoint_name}`.
pub fn endpoint_key(service_id: &str, endpoint_name: &str) -> String {
    format!("{service_id}#{endpoint_name}")
}
