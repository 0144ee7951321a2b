//! Shared builders for unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;

use corral_state::*;

use crate::coordinator::LocalCoordinator;
use crate::facade::Facade;

pub(crate) fn service(id: &str, parent: Option<&str>, name: &str) -> Service {
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

pub(crate) fn with_endpoint(mut svc: Service, name: &str, port: u16) -> Service {
    svc.endpoints.push(ServiceEndpoint {
        name: name.to_string(),
        purpose: "export".to_string(),
        protocol: "tcp".to_string(),
        address_config: Some(AddressConfig {
            port,
            protocol: "tcp".to_string(),
        }),
        ..Default::default()
    });
    svc
}

pub(crate) fn with_vhost(mut svc: Service, name: &str, vhost: &str) -> Service {
    svc.endpoints.push(ServiceEndpoint {
        name: name.to_string(),
        purpose: "export".to_string(),
        protocol: "http".to_string(),
        vhosts: vec![vhost.to_string()],
        ..Default::default()
    });
    svc
}

pub(crate) fn pool(id: &str, vips: &[&str]) -> ResourcePool {
    ResourcePool {
        id: id.to_string(),
        description: String::new(),
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

pub(crate) fn host(id: &str, pool_id: &str, ips: &[&str]) -> Host {
    Host {
        id: id.to_string(),
        name: format!("{id}.local"),
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

pub(crate) fn instance(service_id: &str, instance_id: u32, host_id: &str) -> InstanceState {
    InstanceState {
        service_id: service_id.to_string(),
        instance_id,
        host_id: host_id.to_string(),
        desired_state: DesiredState::Run,
        scheduled: None,
        started: None,
        terminated: None,
        paused: false,
        container_id: format!("ctr-{service_id}-{instance_id}"),
        image_id: String::new(),
    }
}

pub(crate) struct Fixture {
    pub facade: Facade,
    pub coordinator: Arc<LocalCoordinator>,
    pub store: StateStore,
}

/// Facade over an in-memory store with a seeded RNG and a "default" pool.
pub(crate) fn fixture() -> Fixture {
    let store = StateStore::open_in_memory().unwrap();
    store.put_pool(&pool("default", &[])).unwrap();
    let coordinator = Arc::new(LocalCoordinator::new());
    let facade = Facade::new(store.clone(), coordinator.clone(), Arc::new(store.clone()))
        .with_rng(StdRng::seed_from_u64(7));
    Fixture {
        facade,
        coordinator,
        store,
    }
}
