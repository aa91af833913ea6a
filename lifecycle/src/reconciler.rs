//! Brings the container in line with the configuration file.
//!
//! The fingerprint of the last configuration a container was built from is
//! kept in a marker file. When the current fingerprint differs from it, or
//! there is no container at all, the container is torn down and rebuilt from
//! the compose definition, with the newest backup of the configured world
//! restored into the data directory first. Otherwise the existing container
//! is started if needed and left alone.

use crate::backup::{BackupFilter, BackupRecord, BackupStore};
use crate::error::OpsResult;
use crate::runtime::ContainerGateway;
use log::{info, warn};
use shared::{EnvFingerprint, ServerConfig};
use std::fs;
use std::io;

/// What [`Reconciler::reconcile`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Container was (re)created; `restored` is the backup unpacked first.
    Rebuilt { restored: Option<BackupRecord> },
    /// Configuration unchanged, stopped container was started.
    Started,
    /// Configuration unchanged and the container was already up.
    AlreadyRunning,
}

pub struct Reconciler<'a> {
    gateway: &'a dyn ContainerGateway,
    config: &'a ServerConfig,
    backups: BackupStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(gateway: &'a dyn ContainerGateway, config: &'a ServerConfig) -> Self {
        Self {
            gateway,
            config,
            backups: BackupStore::new(&config.backup_dir),
        }
    }

    /// Fingerprint recorded by the last rebuild, if any.
    pub fn read_marker(&self) -> io::Result<Option<EnvFingerprint>> {
        match fs::read_to_string(&self.config.hash_file) {
            Ok(contents) => Ok(EnvFingerprint::from_marker(&contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn write_marker(&self, fingerprint: &EnvFingerprint) -> io::Result<()> {
        fs::write(&self.config.hash_file, fingerprint.as_str())
    }

    pub async fn reconcile(&self, fingerprint: &EnvFingerprint) -> OpsResult<Reconciliation> {
        let name = self.config.container_name.as_str();
        let previous = self.read_marker()?;
        let exists = self.gateway.exists(name).await?;

        if previous.as_ref() == Some(fingerprint) && exists {
            if self.gateway.is_running(name).await? {
                info!("Container {} is already running", name);
                return Ok(Reconciliation::AlreadyRunning);
            }

            info!("Starting existing container {}...", name);
            self.gateway.start(name).await?;
            return Ok(Reconciliation::Started);
        }

        if previous.is_none() {
            info!("No previous configuration recorded, building container");
        } else if previous.as_ref() != Some(fingerprint) {
            info!("Configuration changed, rebuilding container");
        } else {
            info!("Container {} is missing, recreating it", name);
        }

        if exists {
            self.teardown().await?;
        }

        let restored = self.restore_latest().await?;

        let compose_file = self.config.active_compose_file();
        info!("Creating container from {}", compose_file.display());
        self.gateway.compose_up(compose_file).await?;

        self.write_marker(fingerprint)?;

        Ok(Reconciliation::Rebuilt { restored })
    }

    async fn teardown(&self) -> OpsResult<()> {
        let name = self.config.container_name.as_str();
        info!("Removing container {}...", name);

        if let Err(e) = self
            .gateway
            .compose_down(self.config.active_compose_file())
            .await
        {
            warn!("compose down failed: {}", e);
        }

        if self.gateway.exists(name).await? {
            self.gateway.remove(name, true).await?;
        }
        Ok(())
    }

    async fn restore_latest(&self) -> OpsResult<Option<BackupRecord>> {
        let hash = self.config.world.hash();
        let Some(record) = self.backups.latest(BackupFilter::WorldHash(&hash))? else {
            info!("No backup found for world {}, starting fresh", hash);
            return Ok(None);
        };

        info!("Restoring backup {}", record.file_name);
        let store = self.backups.clone();
        let destination = self.config.data_dir.clone();
        let unpacked = record.clone();
        tokio::task::spawn_blocking(move || store.restore(&unpacked, &destination)).await??;

        Ok(Some(record))
    }
}
