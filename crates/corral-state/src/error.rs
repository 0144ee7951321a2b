//! State store errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("database unavailable: {0}")]
    Database(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open table: {0}")]
    Table(String),

    #[error("storage I/O failed: {0}")]
    Storage(String),

    #[error("cannot encode record: {0}")]
    Encode(String),

    #[error("corrupt record: {0}")]
    Decode(String),

    // ── Uniqueness violations ──────────────────────────────────
    #[error("address assignment {0} already exists")]
    AssignmentIdExists(String),

    #[error("address {address} is already assigned to {service_id}/{endpoint}")]
    AddressInUse {
        address: String,
        service_id: String,
        endpoint: String,
    },

    #[error("endpoint {service_id}/{endpoint} already has an address assignment")]
    EndpointAssigned { service_id: String, endpoint: String },

    #[error("service path {path} is already taken by {existing_id}")]
    ServicePathExists { path: String, existing_id: String },

    #[error("IP {ip} already belongs to host {host_id}")]
    HostIpExists { ip: String, host_id: String },
}

impl StateError {
    /// True for violations of a store uniqueness rule, as opposed to
    /// failures of the storage itself.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StateError::AssignmentIdExists(_)
                | StateError::AddressInUse { .. }
                | StateError::EndpointAssigned { .. }
                | StateError::ServicePathExists { .. }
                | StateError::HostIpExists { .. }
        )
    }
}
