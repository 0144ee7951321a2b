//! Subcommand definitions and their execution against a [`Facade`].

use anyhow::Context;
use clap::{Args, Subcommand};
use serde_json::{Value, json};

use corral_facade::Facade;
use corral_state::DesiredState;

#[derive(Subcommand)]
pub enum Command {
    /// Assign an IP to every configurable endpoint of a service tree.
    AssignIps {
        service_id: String,

        /// Bind to this IP instead of picking one from the pool.
        #[arg(long)]
        ip: Option<String>,
    },
    /// Remove address assignments and stop the services that held them.
    RemoveIps {
        #[command(flatten)]
        target: AssignmentTarget,
    },
    /// Delete a host, moving its services to other IPs of their pool.
    RemoveHost { host_id: String },
    /// Drop a virtual IP from a pool, moving the services bound to it.
    RemoveVip {
        #[arg(long, default_value = "default")]
        pool: String,
        ip: String,
    },
    /// List address assignments, all of them unless filtered.
    Assignments {
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Set a service (and with --auto-launch, its tree) to run.
    Start {
        service_id: String,
        #[arg(long)]
        auto_launch: bool,
    },
    /// Set a service (and with --auto-launch, its tree) to stop.
    Stop {
        service_id: String,
        #[arg(long)]
        auto_launch: bool,
    },
    /// Set a service (and with --auto-launch, its tree) to pause.
    Pause {
        service_id: String,
        #[arg(long)]
        auto_launch: bool,
    },
    /// Stop running instances and set the service back to run.
    Restart {
        service_id: String,
        #[arg(long)]
        auto_launch: bool,
    },
    /// Show instances of a service or of a host with their current state.
    Instances {
        #[command(flatten)]
        target: InstanceTarget,
    },
    /// Show a service and its descendants, parents first.
    Tree { service_id: String },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct AssignmentTarget {
    #[arg(long)]
    pub service: Option<String>,
    #[arg(long)]
    pub ip: Option<String>,
    #[arg(long)]
    pub host: Option<String>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct InstanceTarget {
    #[arg(long)]
    pub service: Option<String>,
    #[arg(long)]
    pub host: Option<String>,
}

/// Run one command and return its JSON output.
pub async fn execute(facade: &Facade, command: Command) -> anyhow::Result<Value> {
    match command {
        Command::AssignIps { service_id, ip } => {
            facade
                .assign_ips(&service_id, ip.as_deref())
                .await
                .with_context(|| format!("assigning IPs to {service_id}"))?;
            let mut assignments = Vec::new();
            for svc in facade.get_service_list(&service_id)? {
                assignments.extend(facade.get_addr_assignments_by_service(&svc.id)?);
            }
            Ok(serde_json::to_value(assignments)?)
        }

        Command::RemoveIps { target } => {
            let stopped = match (target.service, target.ip, target.host) {
                (Some(service_id), _, _) => facade.remove_addr_assignments_by_service(&service_id).await?,
                (_, Some(ip), _) => facade.remove_addr_assignments_by_ip(&ip).await?,
                (_, _, Some(host_id)) => facade.remove_addr_assignments_by_host(&host_id).await?,
                (None, None, None) => anyhow::bail!("one of --service, --ip or --host is required"),
            };
            Ok(json!({ "stopped": stopped }))
        }

        Command::RemoveHost { host_id } => {
            let removal = facade
                .remove_host(&host_id)
                .await
                .with_context(|| format!("removing host {host_id}"))?;
            Ok(serde_json::to_value(removal)?)
        }

        Command::RemoveVip { pool, ip } => {
            let removal = facade
                .remove_virtual_ip(&pool, &ip)
                .await
                .with_context(|| format!("removing virtual IP {ip} from pool {pool}"))?;
            Ok(serde_json::to_value(removal)?)
        }

        Command::Assignments {
            service,
            ip,
            host,
            port,
        } => {
            let mut assignments = match (&service, &ip, &host) {
                (Some(service_id), _, _) => facade.get_addr_assignments_by_service(service_id)?,
                (_, Some(ip), _) => facade.get_addr_assignments_by_ip(ip)?,
                (_, _, Some(host_id)) => facade.get_addr_assignments_by_host(host_id)?,
                (None, None, None) => match port {
                    Some(port) => facade.get_addr_assignments_by_port(port)?,
                    None => facade.store().list_assignments()?,
                },
            };
            if let Some(port) = port {
                assignments.retain(|a| a.port == port);
            }
            Ok(serde_json::to_value(assignments)?)
        }

        Command::Start { service_id, auto_launch } => {
            schedule(facade, service_id, auto_launch, DesiredState::Run).await
        }
        Command::Stop { service_id, auto_launch } => {
            schedule(facade, service_id, auto_launch, DesiredState::Stop).await
        }
        Command::Pause { service_id, auto_launch } => {
            schedule(facade, service_id, auto_launch, DesiredState::Pause).await
        }
        Command::Restart { service_id, auto_launch } => {
            schedule(facade, service_id, auto_launch, DesiredState::Restart).await
        }

        Command::Instances { target } => {
            let instances = match (target.service, target.host) {
                (Some(service_id), _) => facade.get_service_instances(&service_id).await?,
                (_, Some(host_id)) => facade.get_host_instances(&host_id).await?,
                (None, None) => anyhow::bail!("one of --service or --host is required"),
            };
            Ok(serde_json::to_value(instances)?)
        }

        Command::Tree { service_id } => Ok(serde_json::to_value(facade.get_service_list(&service_id)?)?),
    }
}

async fn schedule(
    facade: &Facade,
    service_id: String,
    auto_launch: bool,
    target: DesiredState,
) -> anyhow::Result<Value> {
    let affected = facade
        .schedule_service(&service_id, auto_launch, target)
        .await
        .with_context(|| format!("scheduling {service_id} to {target}"))?;
    Ok(json!({
        "service_id": service_id,
        "desired_state": target.to_string(),
        "affected": affected,
    }))
}
