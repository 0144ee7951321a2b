//! corral-facade: service lifecycle and resource coordination.
//!
//! The facade mediates every mutation of the service model so that the
//! state store and the coordinator stay consistent. It is made of four
//! cooperating parts:
//!
//! - **Address assignment** binds each configurable endpoint to one IP:port,
//!   manually or by random pick among the pool's free IPs
//! - **Desired-state scheduling** walks a service tree, validates that it
//!   can start, and applies Run/Stop/Pause/Restart
//! - **Current-state derivation** turns raw instance records into
//!   Starting/Running/Stopping/Stopped/Pausing/Paused
//! - **Tenant locks** serialize scheduling against whole-tenant operations
//!   such as removal, snapshot, and rollback
//!
//! # Architecture
//!
//! ```text
//! Facade
//!   ├── StateStore (services, assignments, hosts, pools, instances)
//!   ├── dyn Coordinator (scheduling records, vhost registry, service locks)
//!   ├── dyn InstanceSource (instance records published by workers)
//!   ├── TenantLocks (per-tenant RwLock registry)
//!   ├── HealthCache (TTL cache of health-check results)
//!   └── StdRng (IP selection)
//! ```

pub mod address;
pub mod coordinator;
pub mod error;
pub mod facade;
pub mod health;
pub mod instance;
pub mod pool;
pub mod scheduler;
pub mod service;
pub mod tenant;
pub mod walk;

#[cfg(test)]
mod testing;

pub use address::{IpInfo, required_ports};
pub use coordinator::{Coordinator, CoordinatorError, LocalCoordinator};
pub use error::{ErrorKind, FacadeError, FacadeResult, ScheduleError};
pub use facade::Facade;
pub use health::{HealthCache, HealthStatus, HealthStatusKey, aggregate_health};
pub use instance::{CurrentState, Instance, InstanceSource, derive_current_state, uptime};
pub use pool::IpRemoval;
pub use scheduler::ScheduleRequest;
pub use tenant::{TenantLock, TenantLocks};
pub use walk::{ChildLookup, ServiceWalk, Visit, walk_services};
