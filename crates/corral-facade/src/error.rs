//! Facade error types.

use corral_state::StateError;
use thiserror::Error;

use crate::coordinator::CoordinatorError;

/// Broad classification of a [`FacadeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The mutation collides with an existing invariant holder.
    Conflict,
    /// The operation cannot proceed given current cluster state.
    Precondition,
    /// The caller supplied a value with no defined meaning.
    UnknownInput,
    /// A coordinator or lock failure that may clear on its own.
    Transient,
    /// Persistence failure.
    Internal,
}

/// Errors returned by facade operations.
#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("address assignment exists for {0}")]
    AddrAssignExists(String),

    #[error("service {service_id} has more than one endpoint on port {port}")]
    MultiplePorts { service_id: String, port: u16 },

    #[error("service already exists: {0}")]
    ServiceExists(String),

    #[error("service path already exists: {0}")]
    ServicePathExists(String),

    #[error("no host owns IP {0}")]
    HostNotExists(String),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("host {host_id} is not in pool {pool_id}")]
    HostNotInPool { host_id: String, pool_id: String },

    #[error("no IPs are available to be assigned in pool {pool_id}")]
    NoIpsAvailable { pool_id: String },

    #[error("resource pool not found: {0}")]
    PoolNotExists(String),

    #[error("virtual IP {ip} is not in pool {pool_id}")]
    VirtualIpNotExists { pool_id: String, ip: String },

    #[error("service {service_id} is missing an address assignment for endpoint {endpoint}")]
    MissingAddrAssign { service_id: String, endpoint: String },

    #[error("unknown desired state: {0}")]
    DesiredStateUnknown(i32),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("virtual host {vhost} is already running under service {service_id}")]
    VHostInUse { vhost: String, service_id: String },

    #[error("service {0} still has instances")]
    InstancesRunning(String),

    #[error("invalid parent for service {service_id}: {reason}")]
    InvalidParent { service_id: String, reason: String },

    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("state store error: {0}")]
    State(StateError),

    #[error("operation cancelled")]
    Cancelled,
}

pub type FacadeResult<T> = Result<T, FacadeError>;

impl From<StateError> for FacadeError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::AddressInUse { address, .. } => FacadeError::AddrAssignExists(address),
            StateError::EndpointAssigned { service_id, endpoint } => {
                FacadeError::AddrAssignExists(format!("{service_id}/{endpoint}"))
            }
            StateError::ServicePathExists { path, .. } => FacadeError::ServicePathExists(path),
            other => FacadeError::State(other),
        }
    }
}

impl FacadeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FacadeError::AddrAssignExists(_)
            | FacadeError::MultiplePorts { .. }
            | FacadeError::ServiceExists(_)
            | FacadeError::ServicePathExists(_)
            | FacadeError::VHostInUse { .. }
            | FacadeError::InstancesRunning(_) => ErrorKind::Conflict,
            FacadeError::HostNotExists(_)
            | FacadeError::HostNotFound(_)
            | FacadeError::HostNotInPool { .. }
            | FacadeError::NoIpsAvailable { .. }
            | FacadeError::PoolNotExists(_)
            | FacadeError::VirtualIpNotExists { .. }
            | FacadeError::MissingAddrAssign { .. }
            | FacadeError::ServiceNotFound(_)
            | FacadeError::InvalidParent { .. } => ErrorKind::Precondition,
            FacadeError::DesiredStateUnknown(_) => ErrorKind::UnknownInput,
            FacadeError::Coordinator(_) | FacadeError::Cancelled => ErrorKind::Transient,
            FacadeError::State(err) if err.is_conflict() => ErrorKind::Conflict,
            FacadeError::State(_) => ErrorKind::Internal,
        }
    }

    /// Whether re-invoking the same operation may succeed.
    ///
    /// A lost race on the IP:port uniqueness index is retryable: the next
    /// attempt re-reads the occupied addresses and picks another one.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FacadeError::AddrAssignExists(_)) || self.kind() == ErrorKind::Transient
    }
}

/// Failure of a scheduling call, carrying how many services were already
/// changed before the error. Applied changes are not rolled back.
#[derive(Debug, Error)]
#[error("{source} (after {affected} service(s) changed)")]
pub struct ScheduleError {
    pub affected: usize,
    #[source]
    pub source: FacadeError,
}

impl ScheduleError {
    /// An error raised before any service was changed.
    pub fn unapplied(source: impl Into<FacadeError>) -> Self {
        Self {
            affected: 0,
            source: source.into(),
        }
    }
}
