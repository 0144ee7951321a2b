//! corral-state: embedded state store for Corral.
//!
//! Services, address assignments, hosts, resource pools and instance
//! records, kept in a single [redb](https://docs.rs/redb) file or in memory.
//!
//! # Architecture
//!
//! Records are stored as JSON bytes keyed by their string IDs.
//! Uniqueness rules live in string index tables (`{ip}:{port}`,
//! `{service_id}#{endpoint}`, service path, host IP) that are written in the
//! same transaction as the record they guard.
//!
//! Clones of a `StateStore` share one `Arc<Database>`, so the facade and the
//! instance source can hold the same store.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
