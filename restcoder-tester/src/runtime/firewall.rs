//! Forward-chain firewall rules
//!
//! A rule is a plain value; inserting and deleting it yield argument lists
//! that differ only in the operation flag, so a rollback entry is the very
//! rule that was inserted.

/// What a rule does with matching packets
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleAction {
    /// Reject new outbound connections from the source
    RejectNew,
    /// Accept traffic from the source to the destination
    Accept,
}

/// Insert or delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    Insert,
    Delete,
}

impl RuleOp {
    fn flag(self) -> &'static str {
        match self {
            RuleOp::Insert => "-I",
            RuleOp::Delete => "-D",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FirewallRule {
    pub source: String,
    pub destination: Option<String>,
    pub action: RuleAction,
}

impl FirewallRule {
    /// Blocks every new connection a container opens
    pub fn isolate(source_ip: impl Into<String>) -> Self {
        Self {
            source: source_ip.into(),
            destination: None,
            action: RuleAction::RejectNew,
        }
    }

    /// Lets a container reach one service
    pub fn link(source_ip: impl Into<String>, destination_ip: impl Into<String>) -> Self {
        Self {
            source: source_ip.into(),
            destination: Some(destination_ip.into()),
            action: RuleAction::Accept,
        }
    }

    /// iptables arguments for the given operation
    pub fn args(&self, op: RuleOp) -> Vec<String> {
        let mut args = vec![
            op.flag().to_string(),
            "FORWARD".to_string(),
            "-s".to_string(),
            self.source.clone(),
        ];

        if let Some(destination) = &self.destination {
            args.push("-d".to_string());
            args.push(destination.clone());
        }

        match self.action {
            RuleAction::RejectNew => {
                args.extend(
                    ["-m", "conntrack", "--ctstate", "NEW", "-j", "REJECT"]
                        .iter()
                        .map(|s| s.to_string()),
                );
            }
            RuleAction::Accept => {
                args.push("-j".to_string());
                args.push("ACCEPT".to_string());
            }
        }

        args
    }
}

impl std::fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.action, &self.destination) {
            (RuleAction::RejectNew, _) => write!(f, "reject new from {}", self.source),
            (RuleAction::Accept, Some(dest)) => write!(f, "accept {} -> {}", self.source, dest),
            (RuleAction::Accept, None) => write!(f, "accept from {}", self.source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolate_args() {
        let rule = FirewallRule::isolate("172.17.0.5");
        assert_eq!(
            rule.args(RuleOp::Insert).join(" "),
            "-I FORWARD -s 172.17.0.5 -m conntrack --ctstate NEW -j REJECT"
        );
    }

    #[test]
    fn test_link_args() {
        let rule = FirewallRule::link("172.17.0.5", "172.17.0.2");
        assert_eq!(
            rule.args(RuleOp::Insert).join(" "),
            "-I FORWARD -s 172.17.0.5 -d 172.17.0.2 -j ACCEPT"
        );
    }

    #[test]
    fn test_delete_is_exact_inverse() {
        let rule = FirewallRule::link("a", "b");
        let insert = rule.args(RuleOp::Insert);
        let delete = rule.args(RuleOp::Delete);
        assert_eq!(delete[0], "-D");
        assert_eq!(insert[1..], delete[1..]);
    }

    #[test]
    fn test_display() {
        assert_eq!(FirewallRule::isolate("a").to_string(), "reject new from a");
        assert_eq!(FirewallRule::link("a", "b").to_string(), "accept a -> b");
    }
}
