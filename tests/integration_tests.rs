//! Integration tests for the operator toolkit
//!
//! These tests exercise the crates together: configuration files on disk,
//! backup archives, UDP probing against a local socket and the reconcile
//! flow against an in-memory container runtime.

use async_trait::async_trait;
use bincode::Options;
use lifecycle::runtime::RuntimeResult;
use lifecycle::{
    BackupFilter, BackupSource, BackupStore, ContainerGateway, LogStream, PortMapping, Reconciler,
    Reconciliation,
};
use probe::raknet::{OFFLINE_MAGIC, UNCONNECTED_PING, UNCONNECTED_PONG};
use probe::Prober;
use shared::{ConfigSource, ServerConfig};
use std::fs;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const ENV: &str = "\
CONTAINER_NAME=bedrock
SERVER_NAME=Friends
LEVEL_NAME=world
GAMEMODE=survival
DIFFICULTY=normal
ENABLE_TUNNEL=true
TUNNEL_TYPE=ngrok
MAX_BACKUPS=2
";

fn write_env(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join(".env");
    fs::write(&path, contents).unwrap();
    path
}

fn load(path: &Path) -> (ConfigSource, ServerConfig) {
    let source = ConfigSource::load(path).unwrap();
    let config = ServerConfig::from_source(&source).unwrap();
    (source, config)
}

/// CONFIGURATION TESTS
mod config_tests {
    use super::*;

    /// Same bytes give the same fingerprint, any edit gives a new one
    #[test]
    fn fingerprint_tracks_file_bytes() {
        let temp = TempDir::new().unwrap();
        let path = write_env(temp.path(), ENV);

        let (first, _) = load(&path);
        let (second, _) = load(&path);
        assert_eq!(first.fingerprint(), second.fingerprint());

        write_env(temp.path(), &format!("{}# comment\n", ENV));
        let (edited, _) = load(&path);
        assert_ne!(first.fingerprint(), edited.fingerprint());
    }

    /// Tunnel settings are not part of the world identity
    #[test]
    fn world_hash_ignores_tunnel_settings() {
        let temp = TempDir::new().unwrap();
        let (ngrok_source, ngrok) = load(&write_env(temp.path(), ENV));
        let (playit_source, playit) = load(&write_env(
            temp.path(),
            &ENV.replace("TUNNEL_TYPE=ngrok", "TUNNEL_TYPE=playit"),
        ));

        assert_ne!(ngrok_source.fingerprint(), playit_source.fingerprint());
        assert_eq!(ngrok.world.hash(), playit.world.hash());
        assert_eq!(ngrok.world.hash().as_str().len(), 8);
    }

    /// Relative paths resolve against the directory holding the file
    #[test]
    fn paths_resolve_against_config_directory() {
        let temp = TempDir::new().unwrap();
        let (_, config) = load(&write_env(temp.path(), ENV));
        assert!(config.backup_dir.starts_with(temp.path()));
        assert!(config.hash_file.starts_with(temp.path()));
        assert!(config.data_dir.starts_with(temp.path()));
    }
}

/// BACKUP STORE TESTS
mod backup_tests {
    use super::*;

    fn worlds(root: &Path) -> PathBuf {
        let dir = root.join("worlds");
        fs::create_dir_all(dir.join("world/db")).unwrap();
        fs::write(dir.join("world/levelname.txt"), "world").unwrap();
        fs::write(dir.join("world/db/CURRENT"), "MANIFEST-000002\n").unwrap();
        dir
    }

    /// Restoring a backup yields the data it was created from
    #[test]
    fn backup_restore_roundtrip() {
        let temp = TempDir::new().unwrap();
        let (_, config) = load(&write_env(temp.path(), ENV));
        let source = worlds(temp.path());
        let store = BackupStore::new(&config.backup_dir);

        let record = store
            .create(BackupSource::Directory(&source), &config.world)
            .unwrap();
        let found = store
            .latest(BackupFilter::WorldHash(&config.world.hash()))
            .unwrap()
            .unwrap();
        assert_eq!(found, record);

        let target = temp.path().join("restored");
        store.restore(&record, &target).unwrap();
        assert_eq!(
            fs::read_to_string(target.join("worlds/world/db/CURRENT")).unwrap(),
            "MANIFEST-000002\n"
        );
        assert_eq!(record.read_metadata().unwrap().level_name, "world");
    }

    /// Pruning keeps min(N, total) records
    #[test]
    fn prune_keeps_requested_count() {
        let temp = TempDir::new().unwrap();
        let (_, config) = load(&write_env(temp.path(), ENV));
        let source = worlds(temp.path());
        let store = BackupStore::new(&config.backup_dir);

        for _ in 0..4 {
            store
                .create(BackupSource::Directory(&source), &config.world)
                .unwrap();
            thread::sleep(Duration::from_millis(5));
        }

        let removed = store.prune(config.max_backups).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.list().unwrap().len(), 2);
        assert!(store.prune(10).unwrap().is_empty());
    }
}

/// UDP PROBE TESTS
mod probe_tests {
    use super::*;

    fn pong(advertisement: &str) -> Vec<u8> {
        let codec = bincode::DefaultOptions::new()
            .with_big_endian()
            .with_fixint_encoding();
        let mut out = codec
            .serialize(&(UNCONNECTED_PONG, 1u64, 2u64, OFFLINE_MAGIC))
            .unwrap();
        out.extend_from_slice(&(advertisement.len() as u16).to_be_bytes());
        out.extend_from_slice(advertisement.as_bytes());
        out
    }

    /// Answers the first datagram with `reply` and hands back what it received
    fn responder(reply: Vec<u8>) -> (std::net::SocketAddr, thread::JoinHandle<Vec<u8>>) {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind responder socket");
        let addr = socket.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let mut buf = [0u8; 1024];
            let (size, from) = socket.recv_from(&mut buf).unwrap();
            socket.send_to(&reply, from).unwrap();
            buf[..size].to_vec()
        });
        (addr, handle)
    }

    /// A RakNet ping against a Bedrock-like responder parses the status
    #[tokio::test]
    async fn query_reads_server_status() {
        let (addr, handle) =
            responder(pong("MCPE;Friends;748;1.21.44;2;10;123456;world;Survival;1;19132;19133;"));

        let reply = Prober::new(Duration::from_secs(1)).query(addr).await.unwrap();
        assert!(reply.is_bedrock());

        let status = reply.status.unwrap();
        assert_eq!(status.motd, "Friends");
        assert_eq!(status.players_online, 2);
        assert_eq!(status.max_players, 10);

        let sent = handle.join().unwrap();
        assert_eq!(sent[0], UNCONNECTED_PING);
        assert_eq!(&sent[9..25], &OFFLINE_MAGIC);
    }

    /// The raw check only needs any answer at all
    #[tokio::test]
    async fn raw_ping_accepts_any_reply() {
        let (addr, handle) = responder(vec![0x00]);
        tokio_test::assert_ok!(Prober::new(Duration::from_secs(1)).ping_raw(addr).await);
        assert_eq!(handle.join().unwrap(), vec![0x01]);
    }
}

/// RECONCILE FLOW TESTS
mod lifecycle_tests {
    use super::*;

    #[derive(Default)]
    struct MemoryRuntime {
        container: Mutex<Option<bool>>,
        calls: Mutex<Vec<String>>,
    }

    impl MemoryRuntime {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl ContainerGateway for MemoryRuntime {
        async fn list(&self, all: bool) -> RuntimeResult<Vec<String>> {
            Ok(match *self.container.lock().unwrap() {
                Some(running) if running || all => vec!["bedrock".to_string()],
                _ => Vec::new(),
            })
        }

        async fn start(&self, name: &str) -> RuntimeResult<()> {
            self.log(format!("start {}", name));
            *self.container.lock().unwrap() = Some(true);
            Ok(())
        }

        async fn stop(&self, name: &str) -> RuntimeResult<()> {
            self.log(format!("stop {}", name));
            *self.container.lock().unwrap() = Some(false);
            Ok(())
        }

        async fn remove(&self, name: &str, _force: bool) -> RuntimeResult<()> {
            self.log(format!("remove {}", name));
            *self.container.lock().unwrap() = None;
            Ok(())
        }

        async fn compose_up(&self, _file: &Path) -> RuntimeResult<()> {
            self.log("compose_up".to_string());
            *self.container.lock().unwrap() = Some(true);
            Ok(())
        }

        async fn compose_down(&self, _file: &Path) -> RuntimeResult<()> {
            self.log("compose_down".to_string());
            *self.container.lock().unwrap() = None;
            Ok(())
        }

        async fn port_mappings(&self, _name: &str) -> RuntimeResult<Vec<PortMapping>> {
            Ok(Vec::new())
        }

        async fn copy_out(&self, _name: &str, _path: &str) -> RuntimeResult<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn stream_logs(&self, _name: &str) -> RuntimeResult<LogStream> {
            Ok(LogStream::from_lines(Vec::new()))
        }
    }

    /// First start builds, a repeat start is a no-op, an edit rebuilds
    #[tokio::test]
    async fn start_stop_edit_cycle() {
        let temp = TempDir::new().unwrap();
        let path = write_env(temp.path(), ENV);
        let runtime = MemoryRuntime::default();

        let (source, config) = load(&path);
        let outcome = Reconciler::new(&runtime, &config)
            .reconcile(&source.fingerprint())
            .await
            .unwrap();
        assert_eq!(outcome, Reconciliation::Rebuilt { restored: None });
        assert_eq!(
            fs::read_to_string(&config.hash_file).unwrap(),
            source.fingerprint().as_str()
        );

        let outcome = Reconciler::new(&runtime, &config)
            .reconcile(&source.fingerprint())
            .await
            .unwrap();
        assert_eq!(outcome, Reconciliation::AlreadyRunning);

        runtime.stop("bedrock").await.unwrap();
        let outcome = Reconciler::new(&runtime, &config)
            .reconcile(&source.fingerprint())
            .await
            .unwrap();
        assert_eq!(outcome, Reconciliation::Started);

        write_env(temp.path(), &ENV.replace("MAX_BACKUPS=2", "MAX_BACKUPS=3"));
        let (edited_source, edited) = load(&path);
        let outcome = Reconciler::new(&runtime, &edited)
            .reconcile(&edited_source.fingerprint())
            .await
            .unwrap();
        assert!(matches!(outcome, Reconciliation::Rebuilt { .. }));

        assert_eq!(
            runtime.calls(),
            vec![
                "compose_up",
                "stop bedrock",
                "start bedrock",
                "compose_down",
                "compose_up"
            ]
        );
    }
}
