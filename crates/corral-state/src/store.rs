//! StateStore: redb-backed state persistence for Corral.
//!
//! Provides typed CRUD operations over services, address assignments,
//! hosts, resource pools, and instance records. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).
//!
//! Uniqueness invariants (service path, assignment IP:port, assignment
//! service endpoint, host IP) are checked and indexed inside the same write
//! transaction that stores the record. redb serializes write transactions,
//! so two racing writers cannot both pass the check.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use tracing::debug;
use ulid::Ulid;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// `map_err` closure that wraps an error message in the named `StateError` variant.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Control-plane records in one redb database. Cheap to clone.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open the database file at `path`, creating it when missing.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Database))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// A store that lives only as long as the process. Used by tests.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Database))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create every record and index table on first open.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SERVICES).map_err(map_err!(Table))?;
        txn.open_table(SERVICE_PATHS).map_err(map_err!(Table))?;
        txn.open_table(ADDRESS_ASSIGNMENTS).map_err(map_err!(Table))?;
        txn.open_table(ASSIGNMENTS_BY_ADDRESS).map_err(map_err!(Table))?;
        txn.open_table(ASSIGNMENTS_BY_ENDPOINT).map_err(map_err!(Table))?;
        txn.open_table(HOSTS).map_err(map_err!(Table))?;
        txn.open_table(HOST_IPS).map_err(map_err!(Table))?;
        txn.open_table(POOLS).map_err(map_err!(Table))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn get_record<T: DeserializeOwned>(
        &self,
        def: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Storage))? {
            Some(guard) => {
                let record: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Scan a record table, keeping the rows accepted by `keep`.
    fn scan_records<T: DeserializeOwned>(
        &self,
        def: TableDefinition<&str, &[u8]>,
        keep: impl Fn(&T) -> bool,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (_, value) = entry.map_err(map_err!(Storage))?;
            let record: T =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            if keep(&record) {
                results.push(record);
            }
        }
        Ok(results)
    }

    fn lookup_index(
        &self,
        def: TableDefinition<&str, &str>,
        key: &str,
    ) -> StateResult<Option<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let id = table
            .get(key)
            .map_err(map_err!(Storage))?
            .map(|guard| guard.value().to_string());
        Ok(id)
    }

    // ── Services ───────────────────────────────────────────────────

    /// Insert or update a service.
    ///
    /// Fails with [`StateError::ServicePathExists`] when another service
    /// already owns the same deployment/parent/name path.
    pub fn put_service(&self, svc: &Service) -> StateResult<()> {
        let path = svc.path_key();
        let value = serde_json::to_vec(svc).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut services = txn.open_table(SERVICES).map_err(map_err!(Table))?;
            let mut paths = txn.open_table(SERVICE_PATHS).map_err(map_err!(Table))?;

            let owner = paths
                .get(path.as_str())
                .map_err(map_err!(Storage))?
                .map(|guard| guard.value().to_string());
            if let Some(existing_id) = owner {
                if existing_id != svc.id {
                    return Err(StateError::ServicePathExists { path, existing_id });
                }
            }

            let old_path = match services.get(svc.id.as_str()).map_err(map_err!(Storage))? {
                Some(guard) => {
                    let old: Service =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                    Some(old.path_key())
                }
                None => None,
            };
            if let Some(old_path) = old_path.filter(|p| *p != path) {
                paths.remove(old_path.as_str()).map_err(map_err!(Storage))?;
            }

            paths
                .insert(path.as_str(), svc.id.as_str())
                .map_err(map_err!(Storage))?;
            services
                .insert(svc.id.as_str(), value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(service_id = %svc.id, %path, "service stored");
        Ok(())
    }

    /// Get a service by ID.
    pub fn get_service(&self, id: &str) -> StateResult<Option<Service>> {
        self.get_record(SERVICES, id)
    }

    /// List the direct children of a service.
    pub fn list_child_services(&self, parent_id: &str) -> StateResult<Vec<Service>> {
        self.scan_records(SERVICES, |svc: &Service| {
            svc.parent_service_id.as_deref() == Some(parent_id)
        })
    }

    /// Delete a service by ID. Returns true if it existed.
    pub fn delete_service(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut services = txn.open_table(SERVICES).map_err(map_err!(Table))?;
            let mut paths = txn.open_table(SERVICE_PATHS).map_err(map_err!(Table))?;
            let removed = match services.remove(id).map_err(map_err!(Storage))? {
                Some(guard) => {
                    let old: Service =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                    Some(old)
                }
                None => None,
            };
            existed = removed.is_some();
            if let Some(old) = removed {
                paths
                    .remove(old.path_key().as_str())
                    .map_err(map_err!(Storage))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(service_id = %id, existed, "service deleted");
        Ok(existed)
    }

    // ── Address assignments ────────────────────────────────────────

    /// Create an address assignment, enforcing IP:port and
    /// service-endpoint uniqueness. Returns the stored record with its ID.
    pub fn create_assignment(&self, assignment: &AddressAssignment) -> StateResult<AddressAssignment> {
        let mut record = assignment.clone();
        if record.id.is_empty() {
            record.id = new_assignment_id();
        }
        let address = record.address_key();
        let endpoint = record.endpoint_key();
        let value = serde_json::to_vec(&record).map_err(map_err!(Encode))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut assignments = txn.open_table(ADDRESS_ASSIGNMENTS).map_err(map_err!(Table))?;
            let mut by_address = txn.open_table(ASSIGNMENTS_BY_ADDRESS).map_err(map_err!(Table))?;
            let mut by_endpoint = txn.open_table(ASSIGNMENTS_BY_ENDPOINT).map_err(map_err!(Table))?;

            if assignments.get(record.id.as_str()).map_err(map_err!(Storage))?.is_some() {
                return Err(StateError::AssignmentIdExists(record.id.clone()));
            }

            let holder = by_address
                .get(address.as_str())
                .map_err(map_err!(Storage))?
                .map(|guard| guard.value().to_string());
            if let Some(holder_id) = holder {
                let owner = match assignments.get(holder_id.as_str()).map_err(map_err!(Storage))? {
                    Some(guard) => {
                        let a: AddressAssignment = serde_json::from_slice(guard.value())
                            .map_err(map_err!(Decode))?;
                        (a.service_id, a.endpoint_name)
                    }
                    None => (String::new(), String::new()),
                };
                return Err(StateError::AddressInUse {
                    address,
                    service_id: owner.0,
                    endpoint: owner.1,
                });
            }

            if by_endpoint.get(endpoint.as_str()).map_err(map_err!(Storage))?.is_some() {
                return Err(StateError::EndpointAssigned {
                    service_id: record.service_id.clone(),
                    endpoint: record.endpoint_name.clone(),
                });
            }

            assignments
                .insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Storage))?;
            by_address
                .insert(address.as_str(), record.id.as_str())
                .map_err(map_err!(Storage))?;
            by_endpoint
                .insert(endpoint.as_str(), record.id.as_str())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %record.id, %address, %endpoint, "address assignment stored");
        Ok(record)
    }

    /// Get an address assignment by ID.
    pub fn get_assignment(&self, id: &str) -> StateResult<Option<AddressAssignment>> {
        self.get_record(ADDRESS_ASSIGNMENTS, id)
    }

    /// Delete an address assignment and its index entries. Returns true if
    /// it existed.
    pub fn delete_assignment(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut assignments = txn.open_table(ADDRESS_ASSIGNMENTS).map_err(map_err!(Table))?;
            let mut by_address = txn.open_table(ASSIGNMENTS_BY_ADDRESS).map_err(map_err!(Table))?;
            let mut by_endpoint = txn.open_table(ASSIGNMENTS_BY_ENDPOINT).map_err(map_err!(Table))?;

            let removed = match assignments.remove(id).map_err(map_err!(Storage))? {
                Some(guard) => {
                    let a: AddressAssignment =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                    Some(a)
                }
                None => None,
            };
            existed = removed.is_some();
            if let Some(a) = removed {
                remove_index_entry(&mut by_address, &a.address_key(), id)?;
                remove_index_entry(&mut by_endpoint, &a.endpoint_key(), id)?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, existed, "address assignment deleted");
        Ok(existed)
    }

    /// List all address assignments.
    pub fn list_assignments(&self) -> StateResult<Vec<AddressAssignment>> {
        self.scan_records(ADDRESS_ASSIGNMENTS, |_: &AddressAssignment| true)
    }

    /// List the address assignments of a service.
    pub fn list_assignments_for_service(&self, service_id: &str) -> StateResult<Vec<AddressAssignment>> {
        self.scan_records(ADDRESS_ASSIGNMENTS, |a: &AddressAssignment| a.service_id == service_id)
    }

    /// List the address assignments bound to an IP.
    pub fn list_assignments_for_ip(&self, ip: &str) -> StateResult<Vec<AddressAssignment>> {
        self.scan_records(ADDRESS_ASSIGNMENTS, |a: &AddressAssignment| a.ip_addr == ip)
    }

    /// List the static address assignments bound to a host.
    pub fn list_assignments_for_host(&self, host_id: &str) -> StateResult<Vec<AddressAssignment>> {
        self.scan_records(ADDRESS_ASSIGNMENTS, |a: &AddressAssignment| {
            a.host_id.as_deref() == Some(host_id)
        })
    }

    /// List the address assignments using a port, on any IP.
    pub fn list_assignments_for_port(&self, port: u16) -> StateResult<Vec<AddressAssignment>> {
        self.scan_records(ADDRESS_ASSIGNMENTS, |a: &AddressAssignment| a.port == port)
    }

    /// Find the assignment occupying an IP:port, if any.
    pub fn find_assignment_by_address(&self, ip: &str, port: u16) -> StateResult<Option<AddressAssignment>> {
        match self.lookup_index(ASSIGNMENTS_BY_ADDRESS, &address_key(ip, port))? {
            Some(id) => self.get_assignment(&id),
            None => Ok(None),
        }
    }

    /// Find the assignment bound to a service endpoint, if any.
    pub fn find_assignment_by_endpoint(
        &self,
        service_id: &str,
        endpoint_name: &str,
    ) -> StateResult<Option<AddressAssignment>> {
        match self.lookup_index(ASSIGNMENTS_BY_ENDPOINT, &endpoint_key(service_id, endpoint_name))? {
            Some(id) => self.get_assignment(&id),
            None => Ok(None),
        }
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// Insert or update a host, indexing its static IPs.
    pub fn put_host(&self, host: &Host) -> StateResult<()> {
        let value = serde_json::to_vec(host).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut hosts = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            let mut host_ips = txn.open_table(HOST_IPS).map_err(map_err!(Table))?;

            for ip in &host.ips {
                let owner = host_ips
                    .get(ip.ip_address.as_str())
                    .map_err(map_err!(Storage))?
                    .map(|guard| guard.value().to_string());
                if let Some(host_id) = owner.filter(|owner| *owner != host.id) {
                    return Err(StateError::HostIpExists {
                        ip: ip.ip_address.clone(),
                        host_id,
                    });
                }
            }

            let old_ips: Vec<String> = match hosts.get(host.id.as_str()).map_err(map_err!(Storage))? {
                Some(guard) => {
                    let old: Host =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                    old.ips.into_iter().map(|ip| ip.ip_address).collect()
                }
                None => Vec::new(),
            };
            for ip in &old_ips {
                host_ips.remove(ip.as_str()).map_err(map_err!(Storage))?;
            }
            for ip in &host.ips {
                host_ips
                    .insert(ip.ip_address.as_str(), host.id.as_str())
                    .map_err(map_err!(Storage))?;
            }
            hosts
                .insert(host.id.as_str(), value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(host_id = %host.id, pool_id = %host.pool_id, "host stored");
        Ok(())
    }

    /// Get a host by ID.
    pub fn get_host(&self, id: &str) -> StateResult<Option<Host>> {
        self.get_record(HOSTS, id)
    }

    /// Find the host owning a static IP.
    pub fn get_host_by_ip(&self, ip: &str) -> StateResult<Option<Host>> {
        match self.lookup_index(HOST_IPS, ip)? {
            Some(id) => self.get_host(&id),
            None => Ok(None),
        }
    }

    /// List the hosts belonging to a pool.
    pub fn list_hosts_in_pool(&self, pool_id: &str) -> StateResult<Vec<Host>> {
        self.scan_records(HOSTS, |h: &Host| h.pool_id == pool_id)
    }

    /// Delete a host by ID. Returns true if it existed.
    pub fn delete_host(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut hosts = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            let mut host_ips = txn.open_table(HOST_IPS).map_err(map_err!(Table))?;
            let removed = match hosts.remove(id).map_err(map_err!(Storage))? {
                Some(guard) => {
                    let old: Host =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                    Some(old)
                }
                None => None,
            };
            existed = removed.is_some();
            if let Some(old) = removed {
                for ip in &old.ips {
                    remove_index_entry(&mut host_ips, &ip.ip_address, id)?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Pools ──────────────────────────────────────────────────────

    /// Insert or update a resource pool.
    pub fn put_pool(&self, pool: &ResourcePool) -> StateResult<()> {
        let value = serde_json::to_vec(pool).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POOLS).map_err(map_err!(Table))?;
            table
                .insert(pool.id.as_str(), value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool_id = %pool.id, "pool stored");
        Ok(())
    }

    /// Get a resource pool by ID.
    pub fn get_pool(&self, id: &str) -> StateResult<Option<ResourcePool>> {
        self.get_record(POOLS, id)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Upsert the record for one instance of a service.
    pub fn put_instance(&self, state: &InstanceState) -> StateResult<()> {
        let key = state.table_key();
        let value = serde_json::to_vec(state).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List all instances of a service.
    pub fn list_instances_for_service(&self, service_id: &str) -> StateResult<Vec<InstanceState>> {
        self.scan_records(INSTANCES, |s: &InstanceState| s.service_id == service_id)
    }

    /// List all instances placed on a host.
    pub fn list_instances_for_host(&self, host_id: &str) -> StateResult<Vec<InstanceState>> {
        self.scan_records(INSTANCES, |s: &InstanceState| s.host_id == host_id)
    }

}

/// Remove an index entry only if it still points at `id`.
fn remove_index_entry(
    table: &mut redb::Table<&str, &str>,
    key: &str,
    id: &str,
) -> StateResult<()> {
    let points_here = table
        .get(key)
        .map_err(map_err!(Storage))?
        .is_some_and(|guard| guard.value() == id);
    if points_here {
        table.remove(key).map_err(map_err!(Storage))?;
    }
    Ok(())
}

/// A fresh, time-ordered assignment ID.
fn new_assignment_id() -> AssignmentId {
    format!("aa_{}", Ulid::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn test_service(id: &str, parent: Option<&str>, name: &str) -> Service {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Service {
            id: id.to_string(),
            name: name.to_string(),
            deployment_id: "dep".to_string(),
            parent_service_id: parent.map(str::to_string),
            pool_id: "default".to_string(),
            desired_state: DesiredState::Stop,
            launch: LaunchMode::Auto,
            endpoints: Vec::new(),
            health_checks: BTreeMap::new(),
            instances: 1,
            image_id: String::new(),
            created_at: at,
            updated_at: at,
        }
    }

    fn test_assignment(ip: &str, port: u16, service_id: &str, endpoint: &str) -> AddressAssignment {
        AddressAssignment {
            id: String::new(),
            assignment_type: AssignmentType::Virtual,
            host_id: None,
            pool_id: "default".to_string(),
            ip_addr: ip.to_string(),
            port,
            service_id: service_id.to_string(),
            endpoint_name: endpoint.to_string(),
        }
    }

    fn test_host(id: &str, pool: &str, ips: &[&str]) -> Host {
        Host {
            id: id.to_string(),
            name: format!("{id}.local"),
            pool_id: pool.to_string(),
            ips: ips
                .iter()
                .map(|ip| HostIpResource {
                    host_id: id.to_string(),
                    ip_address: ip.to_string(),
                    interface_name: "eth0".to_string(),
                })
                .collect(),
        }
    }

    fn test_instance(service_id: &str, instance_id: u32, host_id: &str) -> InstanceState {
        InstanceState {
            service_id: service_id.to_string(),
            instance_id,
            host_id: host_id.to_string(),
            desired_state: DesiredState::Run,
            scheduled: None,
            started: None,
            terminated: None,
            paused: false,
            container_id: String::new(),
            image_id: String::new(),
        }
    }

    // ── Service CRUD ───────────────────────────────────────────────

    #[test]
    fn service_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let svc = test_service("s1", None, "tenant");

        store.put_service(&svc).unwrap();
        assert_eq!(store.get_service("s1").unwrap(), Some(svc));
    }

    #[test]
    fn service_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_service("nope").unwrap().is_none());
    }

    #[test]
    fn service_children_listed_by_parent() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_service(&test_service("root", None, "tenant")).unwrap();
        store.put_service(&test_service("a", Some("root"), "a")).unwrap();
        store.put_service(&test_service("b", Some("root"), "b")).unwrap();
        store.put_service(&test_service("c", Some("a"), "c")).unwrap();

        let mut children: Vec<_> = store
            .list_child_services("root")
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        children.sort();
        assert_eq!(children, vec!["a", "b"]);
        assert!(store.list_child_services("b").unwrap().is_empty());
    }

    #[test]
    fn duplicate_service_path_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_service(&test_service("root", None, "tenant")).unwrap();
        store.put_service(&test_service("a", Some("root"), "web")).unwrap();

        let err = store
            .put_service(&test_service("b", Some("root"), "web"))
            .unwrap_err();
        assert!(matches!(err, StateError::ServicePathExists { existing_id, .. } if existing_id == "a"));

        // Same name under a different parent is fine.
        store.put_service(&test_service("c", Some("a"), "web")).unwrap();
    }

    #[test]
    fn renaming_service_frees_old_path() {
        let store = StateStore::open_in_memory().unwrap();
        let mut svc = test_service("a", None, "old");
        store.put_service(&svc).unwrap();

        svc.name = "new".to_string();
        store.put_service(&svc).unwrap();

        store.put_service(&test_service("b", None, "old")).unwrap();
        let err = store.put_service(&test_service("c", None, "new")).unwrap_err();
        assert!(matches!(err, StateError::ServicePathExists { existing_id, .. } if existing_id == "a"));
    }

    #[test]
    fn service_delete_releases_path() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_service(&test_service("a", None, "tenant")).unwrap();

        assert!(store.delete_service("a").unwrap());
        assert!(!store.delete_service("a").unwrap());
        store.put_service(&test_service("b", None, "tenant")).unwrap();
    }

    // ── Address assignments ────────────────────────────────────────

    #[test]
    fn assignment_create_assigns_id() {
        let store = StateStore::open_in_memory().unwrap();
        let created = store
            .create_assignment(&test_assignment("10.0.0.1", 8080, "s1", "web"))
            .unwrap();

        assert!(created.id.starts_with("aa_"));
        assert_eq!(store.get_assignment(&created.id).unwrap(), Some(created.clone()));
        assert_eq!(
            store.find_assignment_by_address("10.0.0.1", 8080).unwrap(),
            Some(created.clone())
        );
        assert_eq!(store.find_assignment_by_endpoint("s1", "web").unwrap(), Some(created));
    }

    #[test]
    fn assignment_with_existing_id_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        let created = store
            .create_assignment(&test_assignment("10.0.0.1", 8080, "s1", "web"))
            .unwrap();

        let mut reused = test_assignment("10.0.0.2", 9090, "s2", "api");
        reused.id = created.id.clone();
        let err = store.create_assignment(&reused).unwrap_err();
        assert!(matches!(&err, StateError::AssignmentIdExists(id) if *id == created.id));
        assert!(err.is_conflict());
        assert_eq!(store.get_assignment(&created.id).unwrap(), Some(created));
        assert!(store.find_assignment_by_address("10.0.0.2", 9090).unwrap().is_none());
    }

    #[test]
    fn generated_assignment_ids_are_distinct() {
        let store = StateStore::open_in_memory().unwrap();
        let a = store
            .create_assignment(&test_assignment("10.0.0.1", 80, "s1", "web"))
            .unwrap();
        let b = store
            .create_assignment(&test_assignment("10.0.0.1", 81, "s1", "api"))
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn assignment_address_must_be_unique() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .create_assignment(&test_assignment("10.0.0.1", 8080, "s1", "web"))
            .unwrap();

        let err = store
            .create_assignment(&test_assignment("10.0.0.1", 8080, "s2", "web"))
            .unwrap_err();
        assert!(matches!(err, StateError::AddressInUse { service_id, .. } if service_id == "s1"));

        // Another port on the same IP is fine.
        store
            .create_assignment(&test_assignment("10.0.0.1", 9090, "s2", "web"))
            .unwrap();
    }

    #[test]
    fn assignment_endpoint_must_be_unique() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .create_assignment(&test_assignment("10.0.0.1", 8080, "s1", "web"))
            .unwrap();

        let err = store
            .create_assignment(&test_assignment("10.0.0.2", 8080, "s1", "web"))
            .unwrap_err();
        assert!(matches!(err, StateError::EndpointAssigned { .. }));
        assert_eq!(store.list_assignments().unwrap().len(), 1);
    }

    #[test]
    fn assignment_delete_clears_indexes() {
        let store = StateStore::open_in_memory().unwrap();
        let created = store
            .create_assignment(&test_assignment("10.0.0.1", 8080, "s1", "web"))
            .unwrap();

        assert!(store.delete_assignment(&created.id).unwrap());
        assert!(!store.delete_assignment(&created.id).unwrap());
        assert!(store.find_assignment_by_address("10.0.0.1", 8080).unwrap().is_none());
        assert!(store.find_assignment_by_endpoint("s1", "web").unwrap().is_none());

        store
            .create_assignment(&test_assignment("10.0.0.1", 8080, "s2", "api"))
            .unwrap();
    }

    #[test]
    fn assignment_lookups_by_attribute() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .create_assignment(&test_assignment("10.0.0.1", 8080, "s1", "web"))
            .unwrap();
        store
            .create_assignment(&test_assignment("10.0.0.1", 9090, "s1", "admin"))
            .unwrap();
        let mut static_assignment = test_assignment("10.0.0.2", 8080, "s2", "web");
        static_assignment.assignment_type = AssignmentType::Static;
        static_assignment.host_id = Some("h1".to_string());
        store.create_assignment(&static_assignment).unwrap();

        assert_eq!(store.list_assignments_for_service("s1").unwrap().len(), 2);
        assert_eq!(store.list_assignments_for_ip("10.0.0.1").unwrap().len(), 2);
        assert_eq!(store.list_assignments_for_host("h1").unwrap().len(), 1);
        assert_eq!(store.list_assignments_for_port(8080).unwrap().len(), 2);
        assert!(store.list_assignments_for_service("s3").unwrap().is_empty());
    }

    #[test]
    fn ipv6_address_keys_do_not_collide() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .create_assignment(&test_assignment("fd00::1", 80, "s1", "web"))
            .unwrap();
        store
            .create_assignment(&test_assignment("fd00::1:8", 0, "s2", "web"))
            .unwrap();
        assert!(store.find_assignment_by_address("fd00::1", 80).unwrap().is_some());
    }

    // ── Hosts and pools ────────────────────────────────────────────

    #[test]
    fn host_ip_index() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_host(&test_host("h1", "default", &["10.0.0.1", "10.0.0.2"])).unwrap();
        store.put_host(&test_host("h2", "other", &["10.0.1.1"])).unwrap();

        assert_eq!(store.get_host_by_ip("10.0.0.2").unwrap().unwrap().id, "h1");
        assert!(store.get_host_by_ip("10.9.9.9").unwrap().is_none());
        assert_eq!(store.list_hosts_in_pool("default").unwrap().len(), 1);
        assert_eq!(store.list_hosts_in_pool("other").unwrap().len(), 1);
    }

    #[test]
    fn host_ip_cannot_belong_to_two_hosts() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_host(&test_host("h1", "default", &["10.0.0.1"])).unwrap();

        let err = store.put_host(&test_host("h2", "default", &["10.0.0.1"])).unwrap_err();
        assert!(matches!(err, StateError::HostIpExists { host_id, .. } if host_id == "h1"));
    }

    #[test]
    fn host_update_replaces_ip_index() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_host(&test_host("h1", "default", &["10.0.0.1"])).unwrap();
        store.put_host(&test_host("h1", "default", &["10.0.0.5"])).unwrap();

        assert!(store.get_host_by_ip("10.0.0.1").unwrap().is_none());
        assert_eq!(store.get_host_by_ip("10.0.0.5").unwrap().unwrap().id, "h1");

        assert!(store.delete_host("h1").unwrap());
        assert!(store.get_host_by_ip("10.0.0.5").unwrap().is_none());
    }

    #[test]
    fn pool_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let pool = ResourcePool {
            id: "default".to_string(),
            description: String::new(),
            virtual_ips: vec![VirtualIp {
                pool_id: "default".to_string(),
                ip: "192.168.0.10".to_string(),
                netmask: "255.255.255.0".to_string(),
                bind_interface: "eth0".to_string(),
            }],
        };
        store.put_pool(&pool).unwrap();

        assert_eq!(store.get_pool("default").unwrap(), Some(pool.clone()));
        assert!(store.get_pool("other").unwrap().is_none());

        let mut emptied = pool;
        emptied.virtual_ips.clear();
        store.put_pool(&emptied).unwrap();
        assert!(store.get_pool("default").unwrap().unwrap().virtual_ips.is_empty());
    }

    // ── Instances ──────────────────────────────────────────────────

    #[test]
    fn instance_lookups() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_instance(&test_instance("s1", 0, "h1")).unwrap();
        store.put_instance(&test_instance("s1", 1, "h2")).unwrap();
        store.put_instance(&test_instance("s2", 0, "h1")).unwrap();

        assert_eq!(store.list_instances_for_service("s1").unwrap().len(), 2);
        assert_eq!(store.list_instances_for_host("h1").unwrap().len(), 2);
        assert!(store.list_instances_for_host("h3").unwrap().is_empty());

        let mut moved = test_instance("s1", 1, "h1");
        moved.paused = true;
        store.put_instance(&moved).unwrap();
        assert_eq!(store.list_instances_for_service("s1").unwrap().len(), 2);
        assert_eq!(store.list_instances_for_host("h1").unwrap().len(), 3);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_service(&test_service("s1", None, "tenant")).unwrap();
            store
                .create_assignment(&test_assignment("10.0.0.1", 8080, "s1", "web"))
                .unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_service("s1").unwrap().is_some());
        assert!(store.find_assignment_by_address("10.0.0.1", 8080).unwrap().is_some());
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_child_services("nope").unwrap().is_empty());
        assert!(store.list_assignments().unwrap().is_empty());
        assert!(store.list_hosts_in_pool("default").unwrap().is_empty());
        assert!(store.get_pool("default").unwrap().is_none());
        assert!(!store.delete_service("nope").unwrap());
        assert!(!store.delete_assignment("nope").unwrap());
        assert!(!store.delete_host("nope").unwrap());
        assert!(store.list_instances_for_service("nope").unwrap().is_empty());
    }
}
