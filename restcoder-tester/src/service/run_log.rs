//! Operator log of one submission run
//!
//! Every entry is emitted as a tracing event tagged with the run's refer id
//! and appended, timestamped, to a bounded collector. The collector is
//! uploaded at the end of the run so operators can look up a failed run by
//! its refer id.

use crate::repository::LogStorage;
use crate::service::log_collector::LogCollector;
use tracing::{debug, error, info, warn};

/// Per-run operator log
pub struct RunLog {
    refer_id: String,
    collector: LogCollector,
}

impl RunLog {
    /// Creates the log for a run
    ///
    /// # Arguments
    /// * `refer_id` - Identifier shown to users on internal failures
    /// * `max_bytes` - Cap on the captured log
    pub fn new(refer_id: impl Into<String>, max_bytes: usize) -> Self {
        let refer_id = refer_id.into();
        let collector = LogCollector::new(format!("run {}", refer_id), max_bytes);
        Self { refer_id, collector }
    }

    pub fn refer_id(&self) -> &str {
        &self.refer_id
    }

    fn append(&self, level: &str, message: &str) {
        let line = format!(
            "{} {:<5} {}\n",
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level,
            message
        );
        self.collector.append(line.as_bytes());
    }

    pub fn log_debug(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        debug!(refer_id = %self.refer_id, "{}", message);
        self.append("DEBUG", message);
    }

    pub fn log_info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(refer_id = %self.refer_id, "{}", message);
        self.append("INFO", message);
    }

    pub fn log_warning(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!(refer_id = %self.refer_id, "{}", message);
        self.append("WARN", message);
    }

    pub fn log_error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!(refer_id = %self.refer_id, "{}", message);
        self.append("ERROR", message);
    }

    /// Uploads the captured log
    ///
    /// # Returns
    /// The log URL, or `None` if nothing was captured or the upload failed
    pub async fn upload(&self, storage: &dyn LogStorage) -> Option<String> {
        self.collector.upload(storage).await
    }
}
