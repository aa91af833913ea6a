//! Typed view over the dotenv-style configuration file.
//!
//! The file is read exactly once per invocation. Its raw bytes feed the
//! environment fingerprint and its parsed key/value pairs become a
//! [`ServerConfig`] that every other component receives explicitly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::identity::{EnvFingerprint, WorldIdentity};
use crate::{
    DEFAULT_BACKUP_DIR, DEFAULT_COMPOSE_FILE, DEFAULT_DATA_DIR, DEFAULT_HASH_FILE,
    DEFAULT_MAX_BACKUPS, DEFAULT_PLAYIT_AGENT, DEFAULT_RUNTIME, DEFAULT_SEED_COMPOSE_FILE,
    DEFAULT_SERVER_PORT, DEFAULT_TUNNEL_TIMEOUT_SECS,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    MissingFile(PathBuf),

    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration file: {0}")]
    Parse(#[from] dotenvy::Error),

    #[error("required key {0} is not set")]
    MissingKey(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Raw configuration file: the bytes as read plus the parsed pairs.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    path: PathBuf,
    contents: Vec<u8>,
    values: HashMap<String, String>,
}

impl ConfigSource {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match std::fs::read(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::MissingFile(path.to_path_buf()));
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        Self::from_bytes(path, contents)
    }

    /// Builds a source from in-memory contents. `path` only anchors relative
    /// paths found in the values.
    pub fn from_bytes(path: impl Into<PathBuf>, contents: Vec<u8>) -> Result<Self, ConfigError> {
        let literal = escape_substitutions(&contents);
        let mut values = HashMap::new();
        for item in dotenvy::from_read_iter(literal.as_slice()) {
            let (key, value) = item?;
            values.insert(key, value);
        }

        Ok(Self {
            path: path.into(),
            contents,
            values,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fingerprint(&self) -> EnvFingerprint {
        EnvFingerprint::of(&self.contents)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Directory relative paths are resolved against.
    pub fn root(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Escapes every `$` that dotenvy would treat as a variable reference.
///
/// Values are taken literally: dotenvy expands `$VAR` and `${VAR}` from the
/// process environment everywhere except inside single quotes.
fn escape_substitutions(contents: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(contents.len());
    let mut single = false;
    let mut double = false;
    let mut escaped = false;
    let mut comment = false;
    let mut after_space = true;

    for &byte in contents {
        if escaped {
            escaped = false;
        } else if comment {
            if byte == b'$' {
                out.push(b'\\');
            }
            comment = byte != b'\n';
        } else {
            match byte {
                b'\\' if !single => escaped = true,
                b'\'' if !double => single = !single,
                b'"' if !single => double = !double,
                b'$' if !single => out.push(b'\\'),
                b'#' if !single && !double && after_space => comment = true,
                _ => {}
            }
        }
        out.push(byte);
        after_space = byte.is_ascii_whitespace();
    }

    out
}

/// Tunnel related settings. `kind` is kept as written; the lifecycle crate
/// decides which backends it recognises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSettings {
    pub enabled: bool,
    pub kind: Option<String>,
    pub auth_token: Option<String>,
    pub region: Option<String>,
    pub playit_url: Option<String>,
    pub playit_agent: PathBuf,
    pub timeout: Duration,
}

/// Immutable configuration snapshot for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub container_name: String,
    pub world: WorldIdentity,
    pub server_port: u16,
    pub backup_dir: PathBuf,
    pub hash_file: PathBuf,
    pub data_dir: PathBuf,
    pub compose_file: PathBuf,
    pub seed_compose_file: PathBuf,
    pub runtime_binary: String,
    pub tunnel: TunnelSettings,
    pub max_backups: usize,
    pub removal_password: Option<String>,
    pub allow_remote_access: bool,
    pub public_ip: Option<String>,
    pub debug_network: bool,
}

impl ServerConfig {
    pub fn from_source(source: &ConfigSource) -> Result<Self, ConfigError> {
        let root = source.root();
        let text = |key: &str| source.get(key).map(str::to_string);
        let path_or = |key: &str, default: &str| root.join(source.get(key).unwrap_or(default));

        let container_name =
            text("CONTAINER_NAME").ok_or(ConfigError::MissingKey("CONTAINER_NAME"))?;

        let port_key = if source.get("SERVER_PORT").is_some() {
            "SERVER_PORT"
        } else {
            "BEDROCK_PORT"
        };
        let server_port = match source.get(port_key) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: port_key,
                value: raw.to_string(),
            })?,
            None => DEFAULT_SERVER_PORT,
        };

        let max_backups = parse_or(source, "MAX_BACKUPS", DEFAULT_MAX_BACKUPS)?;
        let timeout_secs = parse_or(source, "TUNNEL_TIMEOUT_SECS", DEFAULT_TUNNEL_TIMEOUT_SECS)?;

        Ok(Self {
            container_name,
            world: WorldIdentity {
                server_name: text("SERVER_NAME").unwrap_or_default(),
                level_name: text("LEVEL_NAME").unwrap_or_default(),
                seed: text("SEED").unwrap_or_default(),
                game_mode: text("GAMEMODE").unwrap_or_default(),
                difficulty: text("DIFFICULTY").unwrap_or_default(),
            },
            server_port,
            backup_dir: path_or("BACKUP_DIR", DEFAULT_BACKUP_DIR),
            hash_file: path_or("ENV_HASH_FILE", DEFAULT_HASH_FILE),
            data_dir: path_or("DATA_DIR", DEFAULT_DATA_DIR),
            compose_file: path_or("COMPOSE_FILE", DEFAULT_COMPOSE_FILE),
            seed_compose_file: path_or("COMPOSE_SEED_FILE", DEFAULT_SEED_COMPOSE_FILE),
            runtime_binary: text("CONTAINER_RUNTIME")
                .unwrap_or_else(|| DEFAULT_RUNTIME.to_string()),
            tunnel: TunnelSettings {
                enabled: flag(source, "ENABLE_TUNNEL"),
                kind: text("TUNNEL_TYPE"),
                auth_token: text("TUNNEL_AUTH_TOKEN").or_else(|| text("NGROK_AUTHTOKEN")),
                region: text("TUNNEL_REGION"),
                playit_url: text("PLAYIT_TUNNEL_URL"),
                playit_agent: path_or("PLAYIT_AGENT_PATH", DEFAULT_PLAYIT_AGENT),
                timeout: Duration::from_secs(timeout_secs),
            },
            max_backups,
            removal_password: text("REMOVAL_PASSWORD"),
            allow_remote_access: flag(source, "ALLOW_REMOTE_ACCESS"),
            public_ip: text("PUBLIC_IP"),
            debug_network: flag(source, "DEBUG_NETWORK"),
        })
    }

    /// Compose definition used when (re)creating the container.
    pub fn active_compose_file(&self) -> &Path {
        if self.world.has_seed() {
            &self.seed_compose_file
        } else {
            &self.compose_file
        }
    }
}

fn flag(source: &ConfigSource, key: &str) -> bool {
    source
        .get(key)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn parse_or<T: std::str::FromStr>(
    source: &ConfigSource,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match source.get(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
        }),
        None => Ok(default),
    }
}
