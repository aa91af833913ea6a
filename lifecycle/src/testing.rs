//! In-memory container runtime for unit tests.

use crate::runtime::{
    ContainerGateway, LogStream, PortMapping, Protocol, RuntimeError, RuntimeResult,
};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    exists: bool,
    running: bool,
}

/// Tracks one named container and records every call made against it.
pub struct FakeGateway {
    name: String,
    state: Mutex<State>,
    calls: Mutex<Vec<String>>,
    pub world_tar: Vec<u8>,
    pub udp_port: Option<u16>,
    pub fail_stop: bool,
}

impl FakeGateway {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(State::default()),
            calls: Mutex::new(Vec::new()),
            world_tar: Vec::new(),
            udp_port: None,
            fail_stop: false,
        }
    }

    pub fn with_container(self, running: bool) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.exists = true;
            state.running = running;
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that change runtime state, leaving out queries.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("list") && !c.starts_with("port"))
            .collect()
    }

    pub fn container_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    pub fn container_exists(&self) -> bool {
        self.state.lock().unwrap().exists
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, name: &str, command: &str) -> RuntimeResult<()> {
        if name == self.name && self.state.lock().unwrap().exists {
            Ok(())
        } else {
            Err(RuntimeError::CommandFailed {
                command: command.to_string(),
                message: format!("No such container: {}", name),
            })
        }
    }
}

#[async_trait]
impl ContainerGateway for FakeGateway {
    async fn list(&self, all: bool) -> RuntimeResult<Vec<String>> {
        self.record(format!("list {}", all));
        let state = self.state.lock().unwrap();
        if state.exists && (all || state.running) {
            Ok(vec![self.name.clone()])
        } else {
            Ok(Vec::new())
        }
    }

    async fn start(&self, name: &str) -> RuntimeResult<()> {
        self.record(format!("start {}", name));
        self.check(name, "start")?;
        self.state.lock().unwrap().running = true;
        Ok(())
    }

    async fn stop(&self, name: &str) -> RuntimeResult<()> {
        self.record(format!("stop {}", name));
        if self.fail_stop {
            return Err(RuntimeError::CommandFailed {
                command: "stop".to_string(),
                message: "is not running".to_string(),
            });
        }
        self.check(name, "stop")?;
        self.state.lock().unwrap().running = false;
        Ok(())
    }

    async fn remove(&self, name: &str, force: bool) -> RuntimeResult<()> {
        self.record(format!("remove {} {}", name, force));
        self.check(name, "rm")?;
        let mut state = self.state.lock().unwrap();
        if state.running && !force {
            return Err(RuntimeError::CommandFailed {
                command: "rm".to_string(),
                message: "container is running".to_string(),
            });
        }
        *state = State::default();
        Ok(())
    }

    async fn compose_up(&self, file: &Path) -> RuntimeResult<()> {
        self.record(format!("compose_up {}", file.display()));
        let mut state = self.state.lock().unwrap();
        state.exists = true;
        state.running = true;
        Ok(())
    }

    async fn compose_down(&self, file: &Path) -> RuntimeResult<()> {
        self.record(format!("compose_down {}", file.display()));
        *self.state.lock().unwrap() = State::default();
        Ok(())
    }

    async fn port_mappings(&self, name: &str) -> RuntimeResult<Vec<PortMapping>> {
        self.record(format!("port {}", name));
        self.check(name, "port")?;
        Ok(self
            .udp_port
            .map(|port| PortMapping {
                container_port: 19132,
                protocol: Protocol::Udp,
                host_ip: "0.0.0.0".to_string(),
                host_port: port,
            })
            .into_iter()
            .collect())
    }

    async fn copy_out(&self, name: &str, path: &str) -> RuntimeResult<Vec<u8>> {
        self.record(format!("copy_out {} {}", name, path));
        self.check(name, "cp")?;
        Ok(self.world_tar.clone())
    }

    async fn stream_logs(&self, name: &str) -> RuntimeResult<LogStream> {
        self.record(format!("logs {}", name));
        self.check(name, "logs")?;
        Ok(LogStream::from_lines(vec!["Server started.".to_string()]))
    }
}
