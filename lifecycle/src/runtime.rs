//! Container runtime gateway.
//!
//! Every operation is one invocation of the runtime CLI (`docker` by default).
//! A non-zero exit becomes [`RuntimeError::CommandFailed`] carrying the tool's
//! stderr; nothing is retried.

use async_trait::async_trait;
use log::debug;
use std::ffi::OsStr;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime command ran but reported failure.
    #[error("container {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("invalid container name: {0}")]
    InvalidName(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// One line of `docker port` output, e.g. `19132/udp -> 0.0.0.0:19132`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub protocol: Protocol,
    pub host_ip: String,
    pub host_port: u16,
}

impl PortMapping {
    pub fn parse(line: &str) -> Option<Self> {
        let (container, host) = line.trim().split_once(" -> ")?;

        let (port, protocol) = container.trim().split_once('/')?;
        let protocol = match protocol {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            _ => return None,
        };

        let (host_ip, host_port) = host.trim().rsplit_once(':')?;

        Some(Self {
            container_port: port.parse().ok()?,
            protocol,
            host_ip: host_ip.trim_matches(|c| c == '[' || c == ']').to_string(),
            host_port: host_port.parse().ok()?,
        })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} -> {}:{}",
            self.container_port, self.protocol, self.host_ip, self.host_port
        )
    }
}

/// Lines of container log output.
///
/// Yields until the container stops or the stream is dropped; dropping it
/// kills the underlying `logs -f` process.
pub struct LogStream {
    lines: mpsc::Receiver<String>,
    _child: Option<Child>,
}

impl LogStream {
    /// A finite stream over fixed lines.
    pub fn from_lines(lines: impl IntoIterator<Item = String>) -> Self {
        let lines: Vec<String> = lines.into_iter().collect();
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            let _ = tx.try_send(line);
        }
        Self {
            lines: rx,
            _child: None,
        }
    }

    fn from_child(mut child: Child) -> Self {
        let (tx, rx) = mpsc::channel(256);
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, tx);
        }
        Self {
            lines: rx,
            _child: Some(child),
        }
    }

    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }
}

fn spawn_line_reader<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
}

/// Operations the lifecycle flows need from a container runtime.
#[async_trait]
pub trait ContainerGateway: Send + Sync {
    /// Container names; running ones only unless `all` is set.
    async fn list(&self, all: bool) -> RuntimeResult<Vec<String>>;
    async fn start(&self, name: &str) -> RuntimeResult<()>;
    async fn stop(&self, name: &str) -> RuntimeResult<()>;
    async fn remove(&self, name: &str, force: bool) -> RuntimeResult<()>;
    async fn compose_up(&self, file: &Path) -> RuntimeResult<()>;
    async fn compose_down(&self, file: &Path) -> RuntimeResult<()>;
    async fn port_mappings(&self, name: &str) -> RuntimeResult<Vec<PortMapping>>;
    /// Tar stream of `path` inside the container.
    async fn copy_out(&self, name: &str, path: &str) -> RuntimeResult<Vec<u8>>;
    async fn stream_logs(&self, name: &str) -> RuntimeResult<LogStream>;

    async fn exists(&self, name: &str) -> RuntimeResult<bool> {
        Ok(self.list(true).await?.iter().any(|n| n == name))
    }

    async fn is_running(&self, name: &str) -> RuntimeResult<bool> {
        Ok(self.list(false).await?.iter().any(|n| n == name))
    }

    async fn port_mapping(
        &self,
        name: &str,
        protocol: Protocol,
    ) -> RuntimeResult<Option<PortMapping>> {
        Ok(self
            .port_mappings(name)
            .await?
            .into_iter()
            .find(|m| m.protocol == protocol))
    }
}

/// Validate a container name.
///
/// Names are passed straight to the runtime CLI, so only the characters the
/// runtime itself accepts are allowed.
pub fn validate_container_name(name: &str) -> RuntimeResult<()> {
    if name.is_empty() {
        return Err(RuntimeError::InvalidName(
            "container name cannot be empty".to_string(),
        ));
    }

    if name.len() > 128 {
        return Err(RuntimeError::InvalidName(
            "container name exceeds maximum length".to_string(),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.';
    if !name.chars().all(valid_chars) {
        return Err(RuntimeError::InvalidName(format!(
            "'{}' contains invalid characters",
            name
        )));
    }

    Ok(())
}

/// Parses `ps --format {{.Names}}` output. Some shells leave the quotes of
/// the format string in the output, so they are stripped.
pub fn parse_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim().trim_matches(|c| c == '\'' || c == '"'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// [`ContainerGateway`] backed by the docker (or compatible) CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run<I, S>(&self, command: &str, args: I) -> RuntimeResult<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        debug!("Running {:?}", cmd.as_std());

        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RuntimeError::CommandFailed {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::CommandFailed {
                command: command.to_string(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new(shared::DEFAULT_RUNTIME)
    }
}

#[async_trait]
impl ContainerGateway for DockerCli {
    async fn list(&self, all: bool) -> RuntimeResult<Vec<String>> {
        let mut args = vec!["ps"];
        if all {
            args.push("-a");
        }
        args.extend(["--format", "{{.Names}}"]);

        let stdout = self.run("ps", &args).await?;
        Ok(parse_names(&String::from_utf8_lossy(&stdout)))
    }

    async fn start(&self, name: &str) -> RuntimeResult<()> {
        validate_container_name(name)?;
        self.run("start", ["start", name]).await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> RuntimeResult<()> {
        validate_container_name(name)?;
        self.run("stop", ["stop", name]).await?;
        Ok(())
    }

    async fn remove(&self, name: &str, force: bool) -> RuntimeResult<()> {
        validate_container_name(name)?;
        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(name);
        self.run("rm", &args).await?;
        Ok(())
    }

    async fn compose_up(&self, file: &Path) -> RuntimeResult<()> {
        let args: [&OsStr; 5] = [
            "compose".as_ref(),
            "-f".as_ref(),
            file.as_os_str(),
            "up".as_ref(),
            "-d".as_ref(),
        ];
        self.run("compose up", args).await?;
        Ok(())
    }

    async fn compose_down(&self, file: &Path) -> RuntimeResult<()> {
        let args: [&OsStr; 4] = [
            "compose".as_ref(),
            "-f".as_ref(),
            file.as_os_str(),
            "down".as_ref(),
        ];
        self.run("compose down", args).await?;
        Ok(())
    }

    async fn port_mappings(&self, name: &str) -> RuntimeResult<Vec<PortMapping>> {
        validate_container_name(name)?;
        let stdout = self.run("port", ["port", name]).await?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .filter_map(PortMapping::parse)
            .collect())
    }

    async fn copy_out(&self, name: &str, path: &str) -> RuntimeResult<Vec<u8>> {
        validate_container_name(name)?;
        let source = format!("{}:{}", name, path);
        self.run("cp", ["cp", source.as_str(), "-"]).await
    }

    async fn stream_logs(&self, name: &str) -> RuntimeResult<LogStream> {
        validate_container_name(name)?;
        let child = Command::new(&self.binary)
            .args(["logs", "-f", "--tail", "50", name])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::CommandFailed {
                command: "logs".to_string(),
                message: e.to_string(),
            })?;
        Ok(LogStream::from_child(child))
    }
}
