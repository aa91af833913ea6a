//! Operator commands other than the reconcile step itself.
//!
//! Each flow takes the gateway, configuration and any other collaborator it
//! needs explicitly and reports what it did as a value. Prompting and printing
//! are left to the binary.

use crate::backup::{BackupRecord, BackupSource, BackupStore};
use crate::error::{OpsError, OpsResult};
use crate::runtime::{ContainerGateway, PortMapping, Protocol};
use crate::tunnel::{PublicAddress, TunnelProvisioner};
use log::{info, warn};
use probe::{Prober, QueryReply};
use shared::{ServerConfig, CONTAINER_WORLDS_PATH};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Where players can reach the server after `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub local: SocketAddrV4,
    pub public: Option<PublicAddress>,
}

/// Resolves the connection details printed after `start`. A tunnel failure
/// only costs the public address.
pub async fn connection_info(
    config: &ServerConfig,
    tunnels: &dyn TunnelProvisioner,
    local: Ipv4Addr,
) -> ConnectionInfo {
    let public = match tunnels.provision(config).await {
        Ok(address) => address,
        Err(e) => {
            warn!("Tunnel unavailable: {}", e);
            None
        }
    };

    ConnectionInfo {
        local: SocketAddrV4::new(local, config.server_port),
        public,
    }
}

#[derive(Debug, Clone)]
pub struct StopReport {
    pub backup: BackupRecord,
    pub pruned: Vec<BackupRecord>,
}

/// Stops the container, archives its worlds folder and prunes old backups.
pub async fn stop_with_backup(
    gateway: &dyn ContainerGateway,
    config: &ServerConfig,
) -> OpsResult<StopReport> {
    let name = config.container_name.as_str();

    info!("Stopping container {}...", name);
    if let Err(e) = gateway.stop(name).await {
        warn!("Container not running, continuing: {}", e);
    }

    info!("Exporting {} from {}", CONTAINER_WORLDS_PATH, name);
    let stream = gateway.copy_out(name, CONTAINER_WORLDS_PATH).await?;

    let store = BackupStore::new(&config.backup_dir);
    let world = config.world.clone();
    let retention = config.max_backups;

    let report = tokio::task::spawn_blocking(move || -> OpsResult<StopReport> {
        let backup = store.create(BackupSource::TarStream(&stream), &world)?;
        let pruned = store.prune(retention)?;
        Ok(StopReport { backup, pruned })
    })
    .await??;

    Ok(report)
}

/// Compares an entered confirmation against `REMOVAL_PASSWORD`.
pub fn check_password(config: &ServerConfig, entered: &str) -> OpsResult<()> {
    let expected = config
        .removal_password
        .as_deref()
        .ok_or(OpsError::NoRemovalPassword)?;

    if entered.trim() == expected {
        Ok(())
    } else {
        Err(OpsError::ConfirmationRejected)
    }
}

/// Stops and deletes the container. The password must already have been
/// checked with [`check_password`].
pub async fn remove_container(gateway: &dyn ContainerGateway, config: &ServerConfig) -> OpsResult<()> {
    let name = config.container_name.as_str();

    if !gateway.exists(name).await? {
        return Err(OpsError::ContainerNotFound(name.to_string()));
    }

    info!("Stopping and removing container {}...", name);
    if gateway.is_running(name).await? {
        gateway.stop(name).await?;
    }
    gateway.remove(name, false).await?;
    Ok(())
}

/// Deletes every backup. Returns `false` when there was nothing to delete.
pub fn reset_backups(config: &ServerConfig) -> OpsResult<bool> {
    Ok(BackupStore::new(&config.backup_dir).clear()?)
}

/// Summary printed by `info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub container_name: String,
    pub server_name: String,
    pub port: u16,
    pub local: Ipv4Addr,
    /// Set when remote access is enabled; `None` inside means `PUBLIC_IP` is missing.
    pub remote: Option<Option<String>>,
}

impl ServerInfo {
    pub fn new(config: &ServerConfig, local: Ipv4Addr) -> Self {
        Self {
            container_name: config.container_name.clone(),
            server_name: config.world.server_name.clone(),
            port: config.server_port,
            local,
            remote: config
                .allow_remote_access
                .then(|| config.public_ip.clone()),
        }
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Minecraft Bedrock Server Info")?;
        writeln!(f, "-----------------------------------")?;
        writeln!(f, "Container Name: {}", self.container_name)?;
        writeln!(f, "Server Name: {}", self.server_name)?;
        writeln!(f, "Port: {}", self.port)?;
        writeln!(f, "Local Connect: {}:{}", self.local, self.port)?;

        match &self.remote {
            Some(Some(ip)) => {
                writeln!(f, "Remote Connect: {}:{}", ip, self.port)?;
                writeln!(f, "Make sure UDP {} is port-forwarded on your router.", self.port)?;
            }
            Some(None) => writeln!(f, "Remote Connect: PUBLIC_IP is not set")?,
            None => {}
        }

        write!(f, "-----------------------------------")
    }
}

#[derive(Debug, Clone)]
pub struct PortCheck {
    pub mapping: PortMapping,
    pub target: SocketAddr,
    /// Round trip of the raw ping, `None` when nothing answered.
    pub latency: Option<Duration>,
}

impl PortCheck {
    pub fn reachable(&self) -> bool {
        self.latency.is_some()
    }
}

/// Raw-pings the host port Docker mapped for the container's UDP port.
pub async fn port_check(
    gateway: &dyn ContainerGateway,
    config: &ServerConfig,
    prober: &Prober,
    local: Ipv4Addr,
) -> OpsResult<PortCheck> {
    let name = config.container_name.as_str();

    if !gateway.is_running(name).await? {
        return Err(OpsError::ContainerNotRunning(name.to_string()));
    }

    let mapping = gateway
        .port_mapping(name, Protocol::Udp)
        .await?
        .ok_or_else(|| OpsError::NoUdpMapping(name.to_string()))?;
    info!("Docker port mapping: {}", mapping);

    let target = SocketAddr::from((local, mapping.host_port));
    info!("Testing {}...", target);

    let latency = match prober.ping_raw(target).await {
        Ok(latency) => Some(latency),
        Err(e) => {
            warn!("No UDP response from {}: {}", target, e);
            None
        }
    };

    Ok(PortCheck {
        mapping,
        target,
        latency,
    })
}

#[derive(Debug, Clone)]
pub struct ConnectivityReport {
    pub target: SocketAddr,
    pub reply: Option<QueryReply>,
}

impl ConnectivityReport {
    pub fn is_bedrock(&self) -> bool {
        self.reply.as_ref().map_or(false, QueryReply::is_bedrock)
    }

    /// First 200 characters of the advertisement.
    pub fn excerpt(&self) -> Option<String> {
        self.reply
            .as_ref()
            .map(|r| r.advertisement.chars().take(200).collect())
    }
}

/// Sends a RakNet ping to the configured port on the local address.
pub async fn connectivity_test(
    gateway: &dyn ContainerGateway,
    config: &ServerConfig,
    prober: &Prober,
    local: Ipv4Addr,
) -> OpsResult<ConnectivityReport> {
    let name = config.container_name.as_str();

    let active = gateway.list(false).await?;
    if !active.iter().any(|n| n == name) {
        let listed = if active.is_empty() {
            "(none)".to_string()
        } else {
            active.join(", ")
        };
        info!("Active containers: {}", listed);
        return Err(OpsError::ContainerNotRunning(name.to_string()));
    }

    let target = SocketAddr::from((local, config.server_port));
    info!("Checking joinability at {} (UDP)...", target);

    let reply = match prober.query(target).await {
        Ok(reply) => Some(reply),
        Err(e) => {
            warn!("Could not reach server UDP {}: {}", target, e);
            None
        }
    };

    Ok(ConnectivityReport { target, reply })
}

/// Adds an inbound Windows Firewall rule for a UDP port.
#[cfg(windows)]
pub fn add_firewall_rule(port: u16) -> OpsResult<bool> {
    let status = std::process::Command::new("netsh")
        .args([
            "advfirewall",
            "firewall",
            "add",
            "rule",
            &format!("name=Minecraft Bedrock UDP {}", port),
            "dir=in",
            "protocol=UDP",
            &format!("localport={}", port),
            "action=allow",
        ])
        .status()?;
    Ok(status.success())
}
