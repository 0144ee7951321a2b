//! redb table definitions for the Corral state store.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Index tables map a uniqueness key to the owning record's ID and
//! are only ever written in the same transaction as that record.

use redb::TableDefinition;

/// Services keyed by service ID.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// Service path (`{deployment}/{parent}/{name}`) → service ID.
pub const SERVICE_PATHS: TableDefinition<&str, &str> = TableDefinition::new("service_paths");

/// Address assignments keyed by assignment ID.
pub const ADDRESS_ASSIGNMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("address_assignments");

/// `{ip}:{port}` → assignment ID.
pub const ASSIGNMENTS_BY_ADDRESS: TableDefinition<&str, &str> =
    TableDefinition::new("assignments_by_address");

/// `{service_id}#{endpoint}` → assignment ID.
pub const ASSIGNMENTS_BY_ENDPOINT: TableDefinition<&str, &str> =
    TableDefinition::new("assignments_by_endpoint");

/// Hosts keyed by host ID.
pub const HOSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("hosts");

/// Static IP → host ID.
pub const HOST_IPS: TableDefinition<&str, &str> = TableDefinition::new("host_ips");

/// Resource pools keyed by pool ID.
pub const POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("pools");

/// Instance state keyed by `{service_id}:{instance_id}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");
