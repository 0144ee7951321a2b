//! Builders shared by the facade integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;

use corral_facade::{Facade, LocalCoordinator};
use corral_state::*;

pub struct Cluster {
    pub facade: Facade,
    pub coordinator: Arc<LocalCoordinator>,
    pub store: StateStore,
}

/// A facade over an in-memory store, seeded for repeatable IP picks.
pub fn cluster(seed: u64) -> Cluster {
    let store = StateStore::open_in_memory().unwrap();
    let coordinator = Arc::new(LocalCoordinator::new());
    let facade = Facade::new(store.clone(), coordinator.clone(), Arc::new(store.clone()))
        .with_rng(StdRng::seed_from_u64(seed));
    Cluster {
        facade,
        coordinator,
        store,
    }
}

pub fn pool(id: &str, vips: &[&str]) -> ResourcePool {
    ResourcePool {
        id: id.to_string(),
        description: format!("{id} pool"),
        virtual_ips: vips
            .iter()
            .map(|ip| VirtualIp {
                pool_id: id.to_string(),
                ip: ip.to_string(),
                netmask: "255.255.255.0".to_string(),
                bind_interface: "eth0".to_string(),
            })
            .collect(),
    }
}

pub fn host(id: &str, pool_id: &str, ips: &[&str]) -> Host {
    Host {
        id: id.to_string(),
        name: id.to_string(),
        pool_id: pool_id.to_string(),
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

pub fn service(id: &str, parent: Option<&str>, ports: &[(&str, u16)]) -> Service {
    let now = Utc::now();
    Service {
        id: id.to_string(),
        name: id.to_string(),
        deployment_id: "deploy-1".to_string(),
        parent_service_id: parent.map(str::to_string),
        pool_id: "default".to_string(),
        desired_state: DesiredState::Stop,
        launch: LaunchMode::Auto,
        endpoints: ports
            .iter()
            .map(|(name, port)| ServiceEndpoint {
                name: name.to_string(),
                application: name.to_string(),
                purpose: "export".to_string(),
                protocol: "tcp".to_string(),
                address_config: Some(AddressConfig {
                    port: *port,
                    protocol: "tcp".to_string(),
                }),
                ..Default::default()
            })
            .collect(),
        health_checks: BTreeMap::new(),
        instances: 1,
        image_id: "registry.local/app:latest".to_string(),
        created_at: now,
        updated_at: now,
    }
}

pub fn manual(mut svc: Service) -> Service {
    svc.launch = LaunchMode::Manual;
    svc
}

/// Check both store-level uniqueness rules over every assignment.
pub fn assert_unique(store: &StateStore) {
    let all = store.list_assignments().unwrap();
    for (i, a) in all.iter().enumerate() {
        for b in &all[i + 1..] {
            assert!(
                !(a.ip_addr == b.ip_addr && a.port == b.port),
                "duplicate address {}:{}",
                a.ip_addr,
                a.port
            );
            assert!(
                !(a.service_id == b.service_id && a.endpoint_name == b.endpoint_name),
                "duplicate endpoint {}/{}",
                a.service_id,
                a.endpoint_name
            );
        }
    }
}
