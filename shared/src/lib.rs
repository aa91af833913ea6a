mod config;
mod identity;

pub use config::{ConfigError, ConfigSource, ServerConfig, TunnelSettings};
pub use identity::{EnvFingerprint, WorldHash, WorldIdentity};

pub const DEFAULT_ENV_FILE: &str = ".env";
pub const DEFAULT_HASH_FILE: &str = ".env.hash";
pub const DEFAULT_BACKUP_DIR: &str = "./backups";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_COMPOSE_FILE: &str = "docker-compose.yml";
pub const DEFAULT_SEED_COMPOSE_FILE: &str = "docker-compose.seed.yml";
pub const DEFAULT_RUNTIME: &str = "docker";
pub const DEFAULT_PLAYIT_AGENT: &str = "scripts/lib/playit/playit-agent";
pub const DEFAULT_SERVER_PORT: u16 = 19132;
pub const DEFAULT_MAX_BACKUPS: usize = 5;
pub const DEFAULT_TUNNEL_TIMEOUT_SECS: u64 = 30;

/// Path inside the server container that holds the world folders.
pub const CONTAINER_WORLDS_PATH: &str = "/data/worlds";

/// Length of the hex prefix kept for a world hash.
pub const WORLD_HASH_LEN: usize = 8;
