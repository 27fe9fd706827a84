//! Worker configuration
//!
//! Defines all configurable parameters for the grading worker: how the
//! submission queue is polled, where logs are stored, which binaries drive
//! containers and firewall rules, and the timeouts and resource limits of
//! every pipeline step.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::pipeline::rollback::CleanupOrder;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this worker instance (used in logs)
    pub worker_id: String,

    /// Grading API base URL (e.g., "http://localhost:3500")
    pub api_url: String,

    /// Address under which published container ports are reachable from
    /// the test runner
    pub host_ip: String,

    /// How often to poll the submission queue
    pub poll_interval: Duration,

    /// Max submissions processed concurrently
    pub max_parallel_tests: usize,

    /// Object storage receiving captured logs
    pub storage: StorageConfig,

    /// Directory holding one sub-directory per test case
    pub test_cases_dir: PathBuf,

    /// Byte cap of each process stdout/stderr collector
    pub log_max_bytes: usize,

    /// Byte cap of the per-run operator log
    pub run_log_max_bytes: usize,

    /// First host port handed out to published container ports
    pub port_base: u16,

    pub docker_bin: String,
    pub iptables_bin: String,

    /// Container port every `web` process must listen on
    pub app_http_port: u16,

    /// Directory the source archive is unpacked into inside containers
    pub app_dir: String,

    /// Ordering of non-image rollback steps
    pub cleanup_order: CleanupOrder,

    pub timeouts: Timeouts,
    pub limits: ResourceLimits,
}

/// Object storage settings
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Write endpoint of the S3-compatible store
    pub url: String,
    pub bucket: String,
    /// Public base URL of the bucket
    pub public_url: String,
}

/// Timeout of every external step
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Lightweight provisioning commands (run, inspect, rm, iptables)
    pub command: Duration,
    /// Source archive download inside the setup container
    pub download: Duration,
    /// Dependency installation
    pub install: Duration,
    /// Image commit
    pub commit: Duration,
    /// User process readiness ("READY" line)
    pub ready: Duration,
    /// Service done-marker
    pub service_ready: Duration,
    /// A single test inside the test runner
    pub test: Duration,
    /// The whole test-runner exchange
    pub test_run: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(10),
            download: Duration::from_secs(60),
            install: Duration::from_secs(180),
            commit: Duration::from_secs(60),
            ready: Duration::from_secs(3),
            service_ready: Duration::from_secs(5),
            test: Duration::from_secs(5),
            test_run: Duration::from_secs(300),
        }
    }
}

/// Memory and CPU limits applied to a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLimits {
    /// Docker memory limit, e.g. "512m"
    pub memory: String,
    /// CPU quota in microseconds per 100ms period
    pub cpu_quota: u32,
}

/// Limits of the containers a run creates
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Setup container (download + install)
    pub setup: ContainerLimits,
    /// User process containers
    pub user: ContainerLimits,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            setup: ContainerLimits {
                memory: "1g".to_string(),
                cpu_quota: 100_000,
            },
            user: ContainerLimits {
                memory: "256m".to_string(),
                cpu_quota: 50_000,
            },
        }
    }
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(worker_id: String, api_url: String) -> Self {
        Self {
            worker_id,
            api_url,
            host_ip: "127.0.0.1".to_string(),
            poll_interval: Duration::from_secs(5),
            max_parallel_tests: 1,
            storage: StorageConfig {
                url: "http://localhost:9000".to_string(),
                bucket: "restcoder-logs".to_string(),
                public_url: "http://localhost:9000/restcoder-logs".to_string(),
            },
            test_cases_dir: PathBuf::from("test-cases"),
            log_max_bytes: 1024 * 1024,
            run_log_max_bytes: 5 * 1024 * 1024,
            port_base: 40_000,
            docker_bin: "docker".to_string(),
            iptables_bin: "iptables".to_string(),
            app_http_port: 8080,
            app_dir: "/app".to_string(),
            cleanup_order: CleanupOrder::default(),
            timeouts: Timeouts::default(),
            limits: ResourceLimits::default(),
        }
    }

    /// Loads the configuration from a variable lookup, usually the environment
    ///
    /// Expected environment variables:
    /// - API_URL (defaults apply to everything when unset)
    /// - WORKER_ID (optional, default: random)
    /// - HOST_IP (optional, default: 127.0.0.1)
    /// - POLL_INTERVAL (optional, seconds, default: 5)
    /// - MAX_PARALLEL_TESTS (optional, default: 1)
    /// - STORAGE_URL, STORAGE_BUCKET, STORAGE_PUBLIC_URL (optional)
    /// - TEST_CASES_DIR (optional, default: test-cases)
    /// - LOG_MAX_BYTES, RUN_LOG_MAX_BYTES (optional)
    /// - PORT_BASE (optional, default: 40000)
    /// - DOCKER_BIN, IPTABLES_BIN (optional)
    /// - APP_HTTP_PORT (optional, default: 8080)
    /// - APP_DIR (optional, default: /app)
    /// - READY_TIMEOUT_MS (optional, default: 3000)
    /// - TEST_RUN_TIMEOUT (optional, seconds, default: 300)
    /// - CLEANUP_ORDER (optional, `insertion` or `type-strict`)
    ///
    /// Falls back to defaults when API_URL is unset. Any other variable that
    /// is set but malformed is an error.
    pub fn load<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = if var("API_URL").is_some() {
            Self::from_vars(var)?
        } else {
            info!("API_URL not set, using default configuration");
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration from a variable lookup
    fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url =
            var("API_URL").ok_or_else(|| anyhow::anyhow!("API_URL environment variable not set"))?;

        let worker_id = var("WORKER_ID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut config = Self::new(worker_id, api_url);

        if let Some(host_ip) = var("HOST_IP") {
            config.host_ip = host_ip;
        }

        if let Some(secs) = parse_var::<u64, _>(&var, "POLL_INTERVAL")? {
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Some(n) = parse_var(&var, "MAX_PARALLEL_TESTS")? {
            config.max_parallel_tests = n;
        }

        if let Some(url) = var("STORAGE_URL") {
            config.storage.url = url;
        }
        if let Some(bucket) = var("STORAGE_BUCKET") {
            config.storage.bucket = bucket;
        }
        if let Some(public_url) = var("STORAGE_PUBLIC_URL") {
            config.storage.public_url = public_url;
        }

        if let Some(dir) = var("TEST_CASES_DIR") {
            config.test_cases_dir = PathBuf::from(dir);
        }

        if let Some(n) = parse_var(&var, "LOG_MAX_BYTES")? {
            config.log_max_bytes = n;
        }
        if let Some(n) = parse_var(&var, "RUN_LOG_MAX_BYTES")? {
            config.run_log_max_bytes = n;
        }

        if let Some(port) = parse_var(&var, "PORT_BASE")? {
            config.port_base = port;
        }

        if let Some(bin) = var("DOCKER_BIN") {
            config.docker_bin = bin;
        }
        if let Some(bin) = var("IPTABLES_BIN") {
            config.iptables_bin = bin;
        }

        if let Some(port) = parse_var(&var, "APP_HTTP_PORT")? {
            config.app_http_port = port;
        }

        if let Some(dir) = var("APP_DIR") {
            config.app_dir = dir;
        }

        if let Some(ms) = parse_var::<u64, _>(&var, "READY_TIMEOUT_MS")? {
            config.timeouts.ready = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64, _>(&var, "TEST_RUN_TIMEOUT")? {
            config.timeouts.test_run = Duration::from_secs(secs);
        }

        if let Some(order) = parse_var(&var, "CLEANUP_ORDER")? {
            config.cleanup_order = order;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            anyhow::bail!("worker_id cannot be empty");
        }

        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            anyhow::bail!("api_url must start with http:// or https://");
        }

        if !self.storage.url.starts_with("http://") && !self.storage.url.starts_with("https://") {
            anyhow::bail!("storage url must start with http:// or https://");
        }

        if self.storage.bucket.is_empty() {
            anyhow::bail!("storage bucket cannot be empty");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.max_parallel_tests == 0 {
            anyhow::bail!("max_parallel_tests must be greater than 0");
        }

        if self.log_max_bytes == 0 || self.run_log_max_bytes == 0 {
            anyhow::bail!("log caps must be greater than 0");
        }

        if self.port_base.checked_add(crate::runtime::ports::PORT_WINDOW).is_none() {
            anyhow::bail!(
                "port_base leaves no room for a {} port window",
                crate::runtime::ports::PORT_WINDOW
            );
        }

        if !self.app_dir.starts_with('/') {
            anyhow::bail!("app_dir must be an absolute path");
        }

        if self.timeouts.ready.is_zero() {
            anyhow::bail!("ready timeout must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "http://localhost:3500".to_string(),
        )
    }
}

fn parse_var<T, F>(var: &F, name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("Invalid value '{}' for {}: {}", value, name, e))
        })
        .transpose()
}
