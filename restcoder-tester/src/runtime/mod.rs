//! Container runtime layer
//!
//! The pipeline talks to the container engine and the host firewall only
//! through [`ContainerRuntime`]. The production implementation shells out to
//! the docker and iptables binaries; tests substitute an in-memory double.

pub mod command;
pub mod docker;
pub mod firewall;
pub mod ports;

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

use crate::config::ContainerLimits;
use crate::error::OperationError;
use crate::service::log_collector::LogPair;

pub use docker::DockerRuntime;
pub use firewall::FirewallRule;
pub use ports::{PortAllocator, RotatingPortAllocator};

/// Placeholder command keeping a container alive until real work is exec'd
pub const IDLE_COMMAND: &str = "while true; do sleep 1; done";

/// Everything needed to start one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub limits: Option<ContainerLimits>,
    /// `(host_port, container_port)` pairs
    pub ports: Vec<(u16, u16)>,
    /// Replace the image's command with [`IDLE_COMMAND`]
    pub idle: bool,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            limits: None,
            ports: Vec::new(),
            idle: false,
        }
    }

    pub fn limits(mut self, limits: &ContainerLimits) -> Self {
        self.limits = Some(limits.clone());
        self
    }

    pub fn publish(mut self, host_port: u16, container_port: u16) -> Self {
        self.ports.push((host_port, container_port));
        self
    }

    pub fn idle(mut self) -> Self {
        self.idle = true;
        self
    }
}

/// Fixed command surface of the container engine and firewall
///
/// Every operation is bounded by the runtime's own timeouts except `exec`,
/// which takes its budget from the caller.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Starts a detached container
    async fn start_container(&self, spec: &ContainerSpec) -> Result<(), OperationError>;

    /// Resolves the container's bridge-network IP
    async fn container_ip(&self, name: &str) -> Result<String, OperationError>;

    /// Runs a shell script inside a running container to completion
    async fn exec(
        &self,
        container: &str,
        script: &str,
        timeout: Duration,
        step: &str,
        logs: &LogPair,
    ) -> Result<(), OperationError>;

    /// Commits a container's filesystem to a new image
    async fn commit(&self, container: &str, image: &str) -> Result<(), OperationError>;

    async fn remove_container(&self, name: &str) -> Result<(), OperationError>;

    async fn remove_image(&self, name: &str) -> Result<(), OperationError>;

    async fn insert_rule(&self, rule: &FirewallRule) -> Result<(), OperationError>;

    async fn delete_rule(&self, rule: &FirewallRule) -> Result<(), OperationError>;

    /// Builds, without running, the command that executes `script` inside
    /// `container` for as long as it lives
    fn exec_command(&self, container: &str, script: &str) -> Command;

    /// Builds, without running, the command that follows a container's output
    fn logs_command(&self, container: &str) -> Command;
}

/// Quotes a value for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
