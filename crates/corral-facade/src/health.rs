//! Health-check result cache and per-instance aggregation.
//!
//! Results are written by whatever runs the checks and expire after a TTL.
//! Aggregation only reads the cache; a missing result is reported as
//! `NotRunning` for an instance with no uptime and `Unknown` otherwise.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use corral_state::Service;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Passed,
    Failed,
    Unknown,
    NotRunning,
}

/// Cache key: one check of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HealthStatusKey {
    pub service_id: String,
    pub instance_id: u32,
    pub check_name: String,
}

impl HealthStatusKey {
    pub fn new(service_id: &str, instance_id: u32, check_name: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            instance_id,
            check_name: check_name.to_string(),
        }
    }
}

/// TTL cache of health-check results.
pub struct HealthCache {
    ttl: Duration,
    entries: RwLock<HashMap<HealthStatusKey, (HealthStatus, Instant)>>,
}

impl HealthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Record a result. Expired entries are dropped on the way in, so the
    /// cache only holds results younger than the TTL plus the newest write.
    pub fn set(&self, key: HealthStatusKey, status: HealthStatus) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let ttl = self.ttl;
        entries.retain(|_, (_, at)| at.elapsed() < ttl);
        entries.insert(key, (status, Instant::now()));
    }

    /// The cached status, unless it has expired.
    pub fn get(&self, key: &HealthStatusKey) -> Option<HealthStatus> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries
            .get(key)
            .filter(|(_, at)| at.elapsed() < self.ttl)
            .map(|(status, _)| *status)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Status of every health check configured on `svc` for one instance.
pub fn aggregate_health(
    cache: &HealthCache,
    svc: &Service,
    instance_id: u32,
    uptime: Duration,
) -> BTreeMap<String, HealthStatus> {
    svc.health_checks
        .keys()
        .map(|name| {
            let key = HealthStatusKey::new(&svc.id, instance_id, name);
            let status = cache.get(&key).unwrap_or(if uptime.is_zero() {
                HealthStatus::NotRunning
            } else {
                HealthStatus::Unknown
            });
            (name.clone(), status)
        })
        .collect()
}
