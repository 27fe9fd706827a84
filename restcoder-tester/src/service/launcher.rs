//! Readiness process launcher
//!
//! Starts one long-running command and waits until it signals readiness on
//! stdout, exits, or runs out of time. Whichever happens first decides the
//! outcome; later events are ignored. stdout and stderr keep flowing into
//! the caller's collectors for as long as the process lives.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{OperationError, format_duration};
use crate::runtime::command::pump;
use crate::service::log_collector::{LogCollector, LogPair};

/// Line a user process must print once it accepts traffic
pub const READY_LINE: &str = "READY";

/// Grace period for output pumps after the process is gone
const PUMP_GRACE: Duration = Duration::from_secs(1);

/// What counts as "ready" on stdout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadySignal {
    /// A line equal to the text once trimmed; an unterminated trailing
    /// line counts as soon as it matches
    Line(String),
    /// Any line containing the text
    Contains(String),
}

impl ReadySignal {
    pub fn ready_line() -> Self {
        ReadySignal::Line(READY_LINE.to_string())
    }

    fn matches(&self, line: &str) -> bool {
        match self {
            ReadySignal::Line(expected) => line.trim() == expected,
            ReadySignal::Contains(text) => line.contains(text.as_str()),
        }
    }
}

/// Launch lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Starting,
    Ready,
    Timeout,
    ProcessError,
    ProcessExit,
}

/// One command to launch
pub struct Launch {
    /// Label used in failures, e.g. `web[0]`
    pub label: String,
    pub command: Command,
    pub signal: ReadySignal,
    pub timeout: Duration,
    pub logs: LogPair,
}

/// A process that signalled readiness
#[derive(Debug)]
pub struct RunningProcess {
    label: String,
    child: Child,
    pumps: Vec<JoinHandle<()>>,
    state: LaunchState,
}

impl RunningProcess {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    /// Kills the process and waits for its output to drain
    pub async fn stop(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("{} already stopped: {}", self.label, e);
        }
        drain(std::mem::take(&mut self.pumps)).await;
    }
}

/// Starts the command and waits for its readiness signal
///
/// # Returns
/// The running process, or an [`OperationError`] describing the timeout,
/// the spawn failure or the early exit
pub async fn launch(launch: Launch) -> Result<RunningProcess, OperationError> {
    let Launch {
        label,
        mut command,
        signal,
        timeout,
        logs,
    } = launch;
    let step = format!("start {}", label);

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut state = LaunchState::Starting;
    debug!("{} {:?}", label, state);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            state = LaunchState::ProcessError;
            debug!("{} {:?}: {}", label, state, e);
            return Err(OperationError::spawn(&step, &e));
        }
    };

    let (ready_tx, mut ready_rx) = oneshot::channel();
    let mut pumps = Vec::new();
    let watcher = child
        .stdout
        .take()
        .map(|out| watch_output(out, logs.stdout.clone(), signal.clone(), ready_tx));
    if let Some(err) = child.stderr.take() {
        pumps.push(pump(err, logs.stderr.clone()));
    }

    let outcome = tokio::select! {
        biased;
        Ok(()) = &mut ready_rx => Ok(()),
        status = child.wait() => Err(status),
        _ = tokio::time::sleep(timeout) => {
            state = LaunchState::Timeout;
            debug!("{} {:?}", label, state);
            let _ = child.kill().await;
            pumps.extend(watcher);
            drain(pumps).await;
            return Err(timeout_error(&label, &signal, timeout));
        }
    };

    match outcome {
        Ok(()) => {
            pumps.extend(watcher);
        }
        Err(status) => {
            // The signal may still be in the pipe when the exit is observed
            if let Some(watcher) = watcher {
                let _ = tokio::time::timeout(PUMP_GRACE, watcher).await;
            }
            if ready_rx.try_recv().is_err() {
                state = LaunchState::ProcessExit;
                drain(pumps).await;
                return Err(match status {
                    Ok(status) => {
                        debug!("{} {:?}: {}", label, state, status);
                        OperationError::exit(&step, status.code().unwrap_or(-1), "")
                    }
                    Err(e) => OperationError::spawn(&step, &e),
                });
            }
        }
    }

    state = LaunchState::Ready;
    debug!("{} {:?}", label, state);

    Ok(RunningProcess {
        label,
        child,
        pumps,
        state,
    })
}

fn timeout_error(label: &str, signal: &ReadySignal, timeout: Duration) -> OperationError {
    match signal {
        ReadySignal::Line(line) if line == READY_LINE => {
            OperationError::readiness_timeout(label, timeout)
        }
        ReadySignal::Line(text) | ReadySignal::Contains(text) => OperationError::new(
            format!("start {}", label),
            format!(
                "{} did not print \"{}\" within {}",
                label,
                text,
                format_duration(timeout)
            ),
        ),
    }
}

/// Tees stdout into the collector, firing `ready` on the first match
///
/// Complete lines are checked as they arrive, and so is the pending
/// unterminated line, since a process may print the signal without a
/// newline and keep running.
fn watch_output<R>(
    mut reader: R,
    collector: LogCollector,
    signal: ReadySignal,
    ready: oneshot::Sender<()>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut ready = Some(ready);
        let mut pending: Vec<u8> = Vec::new();
        let mut buf = [0u8; 8192];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!("Failed to read process output: {}", e);
                    break;
                }
            };
            collector.append(&buf[..n]);

            if ready.is_none() {
                continue;
            }
            pending.extend_from_slice(&buf[..n]);
            if scan_lines(&mut pending, &signal) {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(());
                }
                pending.clear();
            }
        }
    })
}

/// Consumes the complete lines of `pending` and reports whether any of
/// them, or the unterminated rest, matches the signal
fn scan_lines(pending: &mut Vec<u8>, signal: &ReadySignal) -> bool {
    let mut matched = false;
    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = pending.drain(..=pos).collect();
        matched |= signal.matches(&String::from_utf8_lossy(&line[..pos]));
    }
    matched || (!pending.is_empty() && signal.matches(&String::from_utf8_lossy(pending)))
}

async fn drain(pumps: Vec<JoinHandle<()>>) {
    for handle in pumps {
        let abort = handle.abort_handle();
        if tokio::time::timeout(PUMP_GRACE, handle).await.is_err() {
            abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureCause;

    fn sh_launch(script: &str, timeout: Duration) -> (Launch, LogPair) {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        let logs = LogPair::new("web[0]", 4096);
        (
            Launch {
                label: "web[0]".to_string(),
                command,
                signal: ReadySignal::ready_line(),
                timeout,
                logs: logs.clone(),
            },
            logs,
        )
    }

    #[tokio::test]
    async fn test_ready_within_timeout() {
        let (l, logs) = sh_launch("echo booting; echo ' READY '; exec sleep 10", Duration::from_secs(3));
        let running = launch(l).await.unwrap();
        assert_eq!(running.state(), LaunchState::Ready);
        assert_eq!(running.label(), "web[0]");
        running.stop().await;

        let out = String::from_utf8(logs.stdout.finish().await).unwrap();
        assert_eq!(out, "booting\n READY \n");
    }

    #[tokio::test]
    async fn test_ready_without_newline() {
        let (l, logs) = sh_launch("printf READY; exec sleep 10", Duration::from_secs(3));
        let running = launch(l).await.unwrap();
        assert_eq!(running.state(), LaunchState::Ready);
        running.stop().await;

        assert_eq!(logs.stdout.finish().await, b"READY");
    }

    #[test]
    fn test_scan_lines_checks_complete_and_pending_lines() {
        let signal = ReadySignal::ready_line();

        let mut pending = b"booting\nREA".to_vec();
        assert!(!scan_lines(&mut pending, &signal));
        assert_eq!(pending, b"REA");

        pending.extend_from_slice(b"DY");
        assert!(scan_lines(&mut pending, &signal));

        let mut pending = b"READY!\nNOT READY\n".to_vec();
        assert!(!scan_lines(&mut pending, &signal));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_ready_after_timeout_never_resolves() {
        let (l, _) = sh_launch("sleep 1; echo READY; sleep 10", Duration::from_millis(300));
        let err = launch(l).await.unwrap_err();
        assert!(err.is_readiness_timeout());
        assert!(err.message.contains("web[0]"));
    }

    #[tokio::test]
    async fn test_partial_match_is_not_ready() {
        let (l, _) = sh_launch("echo NOT READY; echo READY!; exec sleep 10", Duration::from_millis(300));
        let err = launch(l).await.unwrap_err();
        assert_eq!(err.cause, FailureCause::ReadinessTimeout);
    }

    #[tokio::test]
    async fn test_exit_before_ready() {
        let (l, logs) = sh_launch("echo crashing >&2; exit 7", Duration::from_secs(3));
        let err = launch(l).await.unwrap_err();
        assert_eq!(err.cause, FailureCause::Exit(7));
        assert_eq!(err.step, "start web[0]");
        assert_eq!(logs.stderr.finish().await, b"crashing\n");
    }

    #[tokio::test]
    async fn test_ready_then_exit_still_counts() {
        let (l, _) = sh_launch("echo READY", Duration::from_secs(3));
        let running = launch(l).await.unwrap();
        assert_eq!(running.state(), LaunchState::Ready);
        running.stop().await;
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let logs = LogPair::new("svc", 1024);
        let err = launch(Launch {
            label: "svc".to_string(),
            command: Command::new("/nonexistent/restcoder-binary"),
            signal: ReadySignal::ready_line(),
            timeout: Duration::from_secs(1),
            logs,
        })
        .await
        .unwrap_err();
        assert!(matches!(err.cause, FailureCause::Spawn(_)));
    }

    #[tokio::test]
    async fn test_contains_signal_timeout_message() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo starting; exec sleep 10");
        let err = launch(Launch {
            label: "service db".to_string(),
            command,
            signal: ReadySignal::Contains("waiting for connections".to_string()),
            timeout: Duration::from_millis(200),
            logs: LogPair::new("db", 1024),
        })
        .await
        .unwrap_err();

        assert!(!err.is_readiness_timeout());
        assert!(err.message.contains("waiting for connections"));
    }

    #[tokio::test]
    async fn test_contains_signal_matches_substring() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo '[db] waiting for connections on 27017'; exec sleep 10");
        let running = launch(Launch {
            label: "service db".to_string(),
            command,
            signal: ReadySignal::Contains("waiting for connections".to_string()),
            timeout: Duration::from_secs(3),
            logs: LogPair::new("db", 1024),
        })
        .await
        .unwrap();
        running.stop().await;
    }
}
