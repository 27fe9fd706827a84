//! Docker and iptables backed runtime
//!
//! Handles the container lifecycle of one submission:
//! - Starting detached containers under resource limits
//! - Resolving container IPs
//! - Executing commands in running containers
//! - Committing, removing containers and images
//! - Inserting and deleting forward-chain firewall rules

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::command::{run_captured, run_streaming};
use super::firewall::{FirewallRule, RuleOp};
use super::{ContainerRuntime, ContainerSpec, IDLE_COMMAND};
use crate::config::{Config, Timeouts};
use crate::error::OperationError;
use crate::service::log_collector::LogPair;

/// Checks that the docker binary is installed and answers
pub async fn check_docker_available(docker_bin: &str) -> Result<()> {
    let output = Command::new(docker_bin)
        .arg("--version")
        .output()
        .await
        .with_context(|| format!("Failed to execute '{} --version'. Is docker installed?", docker_bin))?;

    if !output.status.success() {
        anyhow::bail!("Docker is not working correctly");
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("Docker is available: {}", version.trim());

    Ok(())
}

/// Runtime issuing plain docker and iptables commands
pub struct DockerRuntime {
    docker_bin: String,
    iptables_bin: String,
    timeouts: Timeouts,
}

impl DockerRuntime {
    pub fn new(docker_bin: impl Into<String>, iptables_bin: impl Into<String>, timeouts: Timeouts) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            iptables_bin: iptables_bin.into(),
            timeouts,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.docker_bin.clone(),
            config.iptables_bin.clone(),
            config.timeouts.clone(),
        )
    }

    fn docker(&self) -> Command {
        Command::new(&self.docker_bin)
    }

    /// `docker run` arguments for a container
    pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];

        if let Some(limits) = &spec.limits {
            args.push("-m".to_string());
            args.push(limits.memory.clone());
            args.push("--cpu-quota".to_string());
            args.push(limits.cpu_quota.to_string());
        }

        for (host, container) in &spec.ports {
            args.push("-p".to_string());
            args.push(format!("{}:{}", host, container));
        }

        if spec.idle {
            // Override entrypoint so images with custom entrypoints still idle
            args.push("--entrypoint".to_string());
            args.push("/bin/sh".to_string());
            args.push(spec.image.clone());
            args.push("-c".to_string());
            args.push(IDLE_COMMAND.to_string());
        } else {
            args.push(spec.image.clone());
        }

        args
    }

    async fn iptables(&self, rule: &FirewallRule, op: RuleOp, step: &str) -> Result<(), OperationError> {
        let mut cmd = Command::new(&self.iptables_bin);
        cmd.args(rule.args(op));
        run_captured(cmd, self.timeouts.command, step).await?;
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start_container(&self, spec: &ContainerSpec) -> Result<(), OperationError> {
        info!("Starting container {} from image {}", spec.name, spec.image);

        let mut cmd = self.docker();
        cmd.args(Self::run_args(spec));
        let output = run_captured(cmd, self.timeouts.command, &format!("start container {}", spec.name)).await?;

        debug!("Container {} started with ID: {}", spec.name, output.stdout.trim());
        Ok(())
    }

    async fn container_ip(&self, name: &str) -> Result<String, OperationError> {
        let step = format!("inspect container {}", name);
        let mut cmd = self.docker();
        cmd.arg("inspect")
            .arg("--format")
            .arg("{{.NetworkSettings.IPAddress}}")
            .arg(name);

        let output = run_captured(cmd, self.timeouts.command, &step).await?;
        let ip = output.stdout.trim().to_string();
        if ip.is_empty() {
            return Err(OperationError::new(step, format!("Container {} has no IP address", name)));
        }

        debug!("Container {} has IP {}", name, ip);
        Ok(ip)
    }

    async fn exec(
        &self,
        container: &str,
        script: &str,
        timeout: Duration,
        step: &str,
        logs: &LogPair,
    ) -> Result<(), OperationError> {
        debug!("Executing in container {}: {}", container, script);
        run_streaming(self.exec_command(container, script), timeout, step, logs).await
    }

    async fn commit(&self, container: &str, image: &str) -> Result<(), OperationError> {
        info!("Committing container {} to image {}", container, image);

        let mut cmd = self.docker();
        cmd.arg("commit").arg(container).arg(image);
        run_captured(cmd, self.timeouts.commit, "commit image").await?;
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<(), OperationError> {
        debug!("Removing container {}", name);

        let mut cmd = self.docker();
        cmd.arg("rm").arg("-f").arg("-v").arg(name);
        run_captured(cmd, self.timeouts.command, &format!("remove container {}", name)).await?;
        Ok(())
    }

    async fn remove_image(&self, name: &str) -> Result<(), OperationError> {
        debug!("Removing image {}", name);

        let mut cmd = self.docker();
        cmd.arg("rmi").arg("-f").arg(name);
        run_captured(cmd, self.timeouts.command, &format!("remove image {}", name)).await?;
        Ok(())
    }

    async fn insert_rule(&self, rule: &FirewallRule) -> Result<(), OperationError> {
        debug!("Inserting firewall rule: {}", rule);
        self.iptables(rule, RuleOp::Insert, &format!("insert rule {}", rule)).await
    }

    async fn delete_rule(&self, rule: &FirewallRule) -> Result<(), OperationError> {
        debug!("Deleting firewall rule: {}", rule);
        self.iptables(rule, RuleOp::Delete, &format!("delete rule {}", rule)).await
    }

    fn exec_command(&self, container: &str, script: &str) -> Command {
        let mut cmd = self.docker();
        cmd.arg("exec").arg(container).arg("/bin/bash").arg("-c").arg(script);
        cmd
    }

    fn logs_command(&self, container: &str) -> Command {
        let mut cmd = self.docker();
        cmd.arg("logs").arg("-f").arg(container);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerLimits;

    fn runtime() -> DockerRuntime {
        DockerRuntime::new("docker", "iptables", Timeouts::default())
    }

    #[test]
    fn test_run_args_for_idle_container() {
        let limits = ContainerLimits {
            memory: "256m".to_string(),
            cpu_quota: 50_000,
        };
        let spec = ContainerSpec::new("app-p-web-0", "app-image-p")
            .limits(&limits)
            .publish(40_000, 8080)
            .idle();

        assert_eq!(
            DockerRuntime::run_args(&spec).join(" "),
            "run -d --name app-p-web-0 -m 256m --cpu-quota 50000 -p 40000:8080 \
             --entrypoint /bin/sh app-image-p -c while true; do sleep 1; done"
        );
    }

    #[test]
    fn test_run_args_for_service() {
        let spec = ContainerSpec::new("service-p-db", "mongo").publish(40_002, 27017);
        assert_eq!(
            DockerRuntime::run_args(&spec),
            vec!["run", "-d", "--name", "service-p-db", "-p", "40002:27017", "mongo"]
        );
    }

    #[test]
    fn test_exec_command_shape() {
        let cmd = runtime().exec_command("app-1", "echo READY");
        let std = cmd.as_std();
        assert_eq!(std.get_program(), "docker");
        let args: Vec<_> = std.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(args, vec!["exec", "app-1", "/bin/bash", "-c", "echo READY"]);
    }

    #[test]
    fn test_logs_command_follows() {
        let cmd = runtime().logs_command("service-1");
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(args, vec!["logs", "-f", "service-1"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_failure() {
        let runtime = DockerRuntime::new(
            "/nonexistent/docker",
            "/nonexistent/iptables",
            Timeouts::default(),
        );
        let err = runtime.remove_container("x").await.unwrap_err();
        assert!(matches!(err.cause, crate::error::FailureCause::Spawn(_)));

        let err = runtime.insert_rule(&FirewallRule::isolate("1.2.3.4")).await.unwrap_err();
        assert!(err.step.starts_with("insert rule"));
    }
}
