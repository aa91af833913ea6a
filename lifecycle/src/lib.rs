//! # Bedrock Server Lifecycle Library
//!
//! Operator tooling for a Minecraft Bedrock dedicated server that runs in a
//! container managed through Docker Compose. It keeps the container in step
//! with the configuration file, snapshots worlds into local backups and tells
//! players where to connect.
//!
//! ## Core Responsibilities
//!
//! ### Reconciliation
//! Every `start` compares a fingerprint of the configuration file with the
//! one recorded by the last rebuild. Any change, however small, replaces the
//! container: the old one is removed, the newest backup of the configured
//! world is unpacked into the data directory and the compose definition is
//! brought up again. An unchanged configuration only starts a stopped
//! container.
//!
//! ### World Backups
//! Stopping the server exports the container's worlds folder into a
//! timestamped archive tagged with a short hash of the world-defining
//! settings (server name, level name, seed, game mode, difficulty). Only the
//! newest `MAX_BACKUPS` archives are kept.
//!
//! ### Connection Details
//! The local IPv4 address players on the same network should use is picked
//! from the host's adapters. When tunneling is enabled, an ngrok,
//! localtunnel or playit client is started and its public address reported.
//!
//! ## Failure Model
//!
//! Commands run once and never retry. A missing configuration file, a failed
//! runtime command or a rejected confirmation password ends the command with
//! exit status 1. A tunnel that cannot report an address, a probe timeout or
//! a missing backup are logged and the command carries on.
//!
//! ## Module Organization
//!
//! - `runtime`: [`ContainerGateway`] and its docker CLI implementation
//! - `backup`: archive naming, listing, creation, restore and pruning
//! - `reconciler`: the fingerprint driven rebuild decision
//! - `tunnel`: tunnel client processes and public address parsing
//! - `netinfo`: local address selection
//! - `operations`: stop, remove, reset, info, portcheck and test flows
//! - `error`: [`OpsError`], the error every command returns
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use lifecycle::{DockerCli, Reconciler};
//! use shared::{ConfigSource, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = ConfigSource::load(".env")?;
//!     let config = ServerConfig::from_source(&source)?;
//!     let runtime = DockerCli::new(config.runtime_binary.clone());
//!
//!     let outcome = Reconciler::new(&runtime, &config)
//!         .reconcile(&source.fingerprint())
//!         .await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod backup;
pub mod error;
pub mod netinfo;
pub mod operations;
pub mod reconciler;
pub mod runtime;
pub mod tunnel;

#[cfg(test)]
mod testing;

pub use backup::{BackupFilter, BackupRecord, BackupSource, BackupStore};
pub use error::{OpsError, OpsResult};
pub use reconciler::{Reconciler, Reconciliation};
pub use runtime::{ContainerGateway, DockerCli, LogStream, PortMapping, Protocol};
pub use tunnel::{ProcessTunnels, PublicAddress, TunnelKind, TunnelProvisioner};
