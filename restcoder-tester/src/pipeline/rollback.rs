//! Rollback ledger
//!
//! Every container, image and firewall rule a run creates is recorded here
//! the moment it is known to exist. At the end of the run the ledger is
//! drained once and replayed: firewall rules and containers first, images
//! last, since an image cannot be removed while a container derived from it
//! still exists. Individual cleanup failures are logged and skipped.

use std::str::FromStr;
use std::sync::Mutex;

use crate::runtime::{ContainerRuntime, FirewallRule};
use crate::service::run_log::RunLog;

/// One reversal action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackStep {
    RemoveContainer(String),
    RemoveImage(String),
    RevokeFirewallRule(FirewallRule),
}

impl RollbackStep {
    fn is_image(&self) -> bool {
        matches!(self, RollbackStep::RemoveImage(_))
    }

    /// Rank under [`CleanupOrder::TypeStrict`]
    fn type_rank(&self) -> u8 {
        match self {
            RollbackStep::RevokeFirewallRule(_) => 0,
            RollbackStep::RemoveContainer(_) => 1,
            RollbackStep::RemoveImage(_) => 2,
        }
    }
}

impl std::fmt::Display for RollbackStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackStep::RemoveContainer(name) => write!(f, "remove container {}", name),
            RollbackStep::RemoveImage(name) => write!(f, "remove image {}", name),
            RollbackStep::RevokeFirewallRule(rule) => write!(f, "revoke rule {}", rule),
        }
    }
}

/// How non-image steps are ordered during replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CleanupOrder {
    /// Non-image steps in the order they were recorded, then images
    #[default]
    Insertion,
    /// Firewall rules, then containers, then images
    TypeStrict,
}

impl FromStr for CleanupOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insertion" => Ok(CleanupOrder::Insertion),
            "type-strict" | "type_strict" | "typestrict" => Ok(CleanupOrder::TypeStrict),
            other => anyhow::bail!(
                "invalid cleanup order '{}', expected 'insertion' or 'type-strict'",
                other
            ),
        }
    }
}

/// Ordered record of reversal actions for one run
#[derive(Debug, Default)]
pub struct RollbackLedger {
    steps: Mutex<Vec<RollbackStep>>,
}

impl RollbackLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, step: RollbackStep) {
        self.steps.lock().unwrap().push(step);
    }

    /// Drops the most recent entry equal to `step`
    ///
    /// Used when a resource was removed during provisioning already.
    ///
    /// # Returns
    /// Whether an entry was dropped
    pub fn forget(&self, step: &RollbackStep) -> bool {
        let mut steps = self.steps.lock().unwrap();
        match steps.iter().rposition(|s| s == step) {
            Some(index) => {
                steps.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.lock().unwrap().is_empty()
    }

    /// Empties the ledger, returning its steps in replay order
    pub fn drain(&self, order: CleanupOrder) -> Vec<RollbackStep> {
        let steps = std::mem::take(&mut *self.steps.lock().unwrap());
        let (images, mut others): (Vec<_>, Vec<_>) = steps.into_iter().partition(|s| s.is_image());

        if order == CleanupOrder::TypeStrict {
            // Stable sort keeps insertion order within a type
            others.sort_by_key(|s| s.type_rank());
        }

        others.extend(images);
        others
    }

    /// Drains the ledger and executes every step
    ///
    /// # Returns
    /// Number of steps that failed
    pub async fn replay(&self, order: CleanupOrder, runtime: &dyn ContainerRuntime, log: &RunLog) -> usize {
        let steps = self.drain(order);
        log.log_info(format!("Rolling back {} resource(s)", steps.len()));

        let mut failures = 0;
        for step in steps {
            let outcome = match &step {
                RollbackStep::RemoveContainer(name) => runtime.remove_container(name).await,
                RollbackStep::RemoveImage(name) => runtime.remove_image(name).await,
                RollbackStep::RevokeFirewallRule(rule) => runtime.delete_rule(rule).await,
            };

            match outcome {
                Ok(()) => log.log_debug(format!("Rollback: {}", step)),
                Err(e) => {
                    failures += 1;
                    log.log_warning(format!("Rollback step '{}' failed: {}", step, e));
                }
            }
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(name: &str) -> RollbackStep {
        RollbackStep::RemoveContainer(name.to_string())
    }

    fn image(name: &str) -> RollbackStep {
        RollbackStep::RemoveImage(name.to_string())
    }

    fn rule(ip: &str) -> RollbackStep {
        RollbackStep::RevokeFirewallRule(FirewallRule::isolate(ip))
    }

    #[test]
    fn test_images_always_last() {
        let ledger = RollbackLedger::new();
        ledger.push(image("app-image"));
        ledger.push(container("service"));
        ledger.push(rule("10.0.0.2"));
        ledger.push(container("app"));

        assert_eq!(
            ledger.drain(CleanupOrder::Insertion),
            vec![container("service"), rule("10.0.0.2"), container("app"), image("app-image")]
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_type_strict_order() {
        let ledger = RollbackLedger::new();
        ledger.push(image("app-image"));
        ledger.push(container("service"));
        ledger.push(rule("10.0.0.2"));
        ledger.push(container("app"));
        ledger.push(rule("10.0.0.3"));

        assert_eq!(
            ledger.drain(CleanupOrder::TypeStrict),
            vec![
                rule("10.0.0.2"),
                rule("10.0.0.3"),
                container("service"),
                container("app"),
                image("app-image")
            ]
        );
    }

    #[test]
    fn test_forget_removes_single_entry() {
        let ledger = RollbackLedger::new();
        ledger.push(container("setup"));
        ledger.push(image("app-image"));

        assert!(ledger.forget(&container("setup")));
        assert!(!ledger.forget(&container("setup")));
        assert_eq!(ledger.drain(CleanupOrder::Insertion), vec![image("app-image")]);
    }

    #[test]
    fn test_cleanup_order_parsing() {
        assert_eq!("insertion".parse::<CleanupOrder>().unwrap(), CleanupOrder::Insertion);
        assert_eq!("TYPE-STRICT".parse::<CleanupOrder>().unwrap(), CleanupOrder::TypeStrict);
        assert!("random".parse::<CleanupOrder>().is_err());
    }

    #[test]
    fn test_step_display() {
        assert_eq!(container("a").to_string(), "remove container a");
        assert_eq!(rule("1.2.3.4").to_string(), "revoke rule reject new from 1.2.3.4");
    }
}
