use crate::backup::BackupError;
use crate::runtime::RuntimeError;
use crate::tunnel::TunnelError;
use probe::ProbeError;
use shared::ConfigError;
use thiserror::Error;

pub type OpsResult<T> = Result<T, OpsError>;

/// Everything an operator command can fail with. Any of these ends the
/// command with exit status 1.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("confirmation password did not match")]
    ConfirmationRejected,

    #[error("REMOVAL_PASSWORD is not set in the configuration")]
    NoRemovalPassword,

    #[error("container '{0}' does not exist")]
    ContainerNotFound(String),

    #[error("container '{0}' is not running")]
    ContainerNotRunning(String),

    #[error("container '{0}' has no UDP port mapping")]
    NoUdpMapping(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
