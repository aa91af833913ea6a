//! Public addresses through third-party tunnel clients.
//!
//! The tunnel clients themselves are external programs. For ngrok and
//! localtunnel the public address is scraped from the client's log file;
//! playit is started in the background and its address comes from
//! configuration. Started clients run detached and keep running after the
//! address is known.

use async_trait::async_trait;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use shared::ServerConfig;
use std::ffi::OsStr;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};

static NGROK_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"tcp://[^\s\x22]+:\d+").expect("Invalid ngrok address pattern"));

static LOCALTUNNEL_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s\x22]+").expect("Invalid localtunnel address pattern"));

const LOG_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} printed no address within {after:?}")]
    Timeout { program: String, after: Duration },

    #[error("{program} exited before printing an address")]
    Exited { program: String },

    #[error("tunnel agent not found at {0}")]
    MissingAgent(PathBuf),

    #[error("reading tunnel output failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelKind {
    None,
    Ngrok,
    LocalTunnel,
    Playit,
    Unknown(String),
}

impl TunnelKind {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return TunnelKind::None;
        };

        match raw.to_ascii_lowercase().as_str() {
            "none" => TunnelKind::None,
            "ngrok" => TunnelKind::Ngrok,
            "localtunnel" | "lt" => TunnelKind::LocalTunnel,
            "playit" | "playit.gg" => TunnelKind::Playit,
            _ => TunnelKind::Unknown(raw.to_string()),
        }
    }
}

/// Address players outside the local network connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicAddress {
    pub raw: String,
    pub host: String,
    pub port: Option<u16>,
}

impl PublicAddress {
    /// Splits `scheme://host:port`. Without a scheme the text is kept as is,
    /// with a trailing `:port` split off when present.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let rest = raw.split_once("://").map(|(_, rest)| rest).unwrap_or(raw);
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => match port.parse() {
                Ok(port) => (host, Some(port)),
                Err(_) => (rest, None),
            },
            None => (rest, None),
        };

        Self {
            raw: raw.to_string(),
            host: host.to_string(),
            port,
        }
    }

    pub fn or_port(mut self, port: u16) -> Self {
        if self.port.is_none() {
            self.port = Some(port);
        }
        self
    }
}

impl fmt::Display for PublicAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

#[async_trait]
pub trait TunnelProvisioner: Send + Sync {
    /// Public address for the server port, or `None` when tunneling is off or
    /// the configured tunnel cannot report one.
    async fn provision(&self, config: &ServerConfig) -> Result<Option<PublicAddress>, TunnelError>;
}

/// [`TunnelProvisioner`] that spawns the real tunnel clients.
///
/// Clients run in their own process group with output going to a log file,
/// so they outlive the invoking command and ignore its Ctrl+C.
#[derive(Debug, Clone)]
pub struct ProcessTunnels {
    ngrok: String,
    npx: String,
    log_dir: PathBuf,
}

impl ProcessTunnels {
    pub fn new(ngrok: impl Into<String>, npx: impl Into<String>) -> Self {
        Self {
            ngrok: ngrok.into(),
            npx: npx.into(),
            log_dir: std::env::temp_dir(),
        }
    }

    /// Directory for the `bedrock-<client>.log` files.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    fn log_file(&self, client: &str) -> PathBuf {
        self.log_dir.join(format!("bedrock-{}.log", client))
    }

    async fn ngrok(&self, config: &ServerConfig) -> Result<PublicAddress, TunnelError> {
        let mut args = vec![
            "tcp".to_string(),
            config.server_port.to_string(),
            "--log".to_string(),
            "stdout".to_string(),
        ];
        if let Some(token) = &config.tunnel.auth_token {
            args.push("--authtoken".to_string());
            args.push(token.clone());
        }
        if let Some(region) = &config.tunnel.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }

        spawn_and_watch(
            &self.ngrok,
            &args,
            &self.log_file("ngrok"),
            &NGROK_ADDRESS,
            config.tunnel.timeout,
        )
        .await
    }

    async fn localtunnel(&self, config: &ServerConfig) -> Result<PublicAddress, TunnelError> {
        let args = vec![
            "localtunnel".to_string(),
            "--port".to_string(),
            config.server_port.to_string(),
        ];
        spawn_and_watch(
            &self.npx,
            &args,
            &self.log_file("localtunnel"),
            &LOCALTUNNEL_ADDRESS,
            config.tunnel.timeout,
        )
        .await
    }

    fn playit(&self, config: &ServerConfig) -> Result<Option<PublicAddress>, TunnelError> {
        let Some(url) = &config.tunnel.playit_url else {
            warn!("PLAYIT_TUNNEL_URL is not set; claim a tunnel in the playit dashboard first");
            return Ok(None);
        };

        let agent = &config.tunnel.playit_agent;
        if !agent.exists() {
            return Err(TunnelError::MissingAgent(agent.clone()));
        }

        detached(agent)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| TunnelError::Spawn {
                program: agent.display().to_string(),
                source,
            })?;
        info!("playit agent started in the background");

        Ok(Some(PublicAddress::parse(url).or_port(config.server_port)))
    }
}

impl Default for ProcessTunnels {
    fn default() -> Self {
        Self::new("ngrok", "npx")
    }
}

#[async_trait]
impl TunnelProvisioner for ProcessTunnels {
    async fn provision(&self, config: &ServerConfig) -> Result<Option<PublicAddress>, TunnelError> {
        if !config.tunnel.enabled {
            return Ok(None);
        }

        match TunnelKind::parse(config.tunnel.kind.as_deref()) {
            TunnelKind::None => {
                warn!("ENABLE_TUNNEL is set but TUNNEL_TYPE is empty");
                Ok(None)
            }
            TunnelKind::Ngrok => {
                info!("Starting ngrok tunnel...");
                self.ngrok(config).await.map(Some)
            }
            TunnelKind::LocalTunnel => {
                info!("Starting localtunnel...");
                self.localtunnel(config).await.map(Some)
            }
            TunnelKind::Playit => self.playit(config),
            TunnelKind::Unknown(kind) => {
                warn!("Unknown tunnel type: {}", kind);
                Ok(None)
            }
        }
    }
}

/// Command for a client that must survive the current process.
fn detached(program: impl AsRef<OsStr>) -> Command {
    let mut command = Command::new(program);
    command.stdin(Stdio::null());
    #[cfg(unix)]
    command.process_group(0);
    command
}

/// Starts a client with stdout and stderr in `log` and waits for `pattern`
/// to appear there. The client is killed if no address shows up.
async fn spawn_and_watch(
    program: &str,
    args: &[String],
    log: &Path,
    pattern: &Regex,
    wait: Duration,
) -> Result<PublicAddress, TunnelError> {
    let output = File::create(log).await?.into_std().await;
    let errors = output.try_clone()?;

    let mut child = detached(program)
        .args(args)
        .stdout(Stdio::from(output))
        .stderr(Stdio::from(errors))
        .spawn()
        .map_err(|source| TunnelError::Spawn {
            program: program.to_string(),
            source,
        })?;

    match watch_log(&mut child, log, pattern, wait, program).await {
        Ok(address) => {
            info!("{} output continues in {}", program, log.display());
            Ok(PublicAddress::parse(&address))
        }
        Err(e) => {
            if let Err(kill) = child.kill().await {
                debug!("Could not stop {}: {}", program, kill);
            }
            Err(e)
        }
    }
}

/// Polls `log` until it contains `pattern`, for at most `wait`.
pub async fn watch_log(
    child: &mut Child,
    log: &Path,
    pattern: &Regex,
    wait: Duration,
    program: &str,
) -> Result<String, TunnelError> {
    match timeout(wait, poll_log(child, log, pattern)).await {
        Ok(Ok(Some(address))) => Ok(address),
        Ok(Ok(None)) => Err(TunnelError::Exited {
            program: program.to_string(),
        }),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(TunnelError::Timeout {
            program: program.to_string(),
            after: wait,
        }),
    }
}

async fn poll_log(child: &mut Child, log: &Path, pattern: &Regex) -> io::Result<Option<String>> {
    loop {
        // Checked before reading so the final output of an exited client is seen
        let exited = child.try_wait()?.is_some();
        let output = tokio::fs::read(log).await?;
        if let Some(address) = find_address(&String::from_utf8_lossy(&output), pattern) {
            return Ok(Some(address));
        }
        if exited {
            return Ok(None);
        }
        sleep(LOG_POLL).await;
    }
}

/// First match of `pattern` in client output.
pub fn find_address(output: &str, pattern: &Regex) -> Option<String> {
    pattern.find(output).map(|found| found.as_str().to_string())
}
