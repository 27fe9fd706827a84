//! Timeout-bounded external commands
//!
//! Every container-engine and firewall invocation goes through one of two
//! helpers here. Both kill the child when the budget runs out and translate
//! the outcome into an [`OperationError`] naming the step.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::OperationError;
use crate::service::log_collector::{LogCollector, LogPair};

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs a short command to completion and captures its output
///
/// # Arguments
/// * `cmd` - The command to run, arguments already set
/// * `timeout` - Budget after which the child is killed
/// * `step` - Step name used in failures
pub async fn run_captured(
    mut cmd: Command,
    timeout: Duration,
    step: &str,
) -> Result<CommandOutput, OperationError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running {:?}", cmd.as_std());

    let child = cmd.spawn().map_err(|e| OperationError::spawn(step, &e))?;

    // Dropping the wait future on timeout drops the child, which kills it
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(OperationError::spawn(step, &e)),
        Err(_) => return Err(OperationError::timeout(step, timeout)),
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        debug!(
            "{} failed: exit_code={} stderr='{}'",
            step,
            code,
            stderr.trim()
        );
        let detail = if stderr.trim().is_empty() { &stdout } else { &stderr };
        return Err(OperationError::exit(step, code, detail));
    }

    Ok(CommandOutput { stdout, stderr })
}

/// Runs a command to completion, streaming its output into `logs`
///
/// Output keeps flowing into the collectors while the command runs, so a
/// failure still leaves the partial output captured.
pub async fn run_streaming(
    mut cmd: Command,
    timeout: Duration,
    step: &str,
    logs: &LogPair,
) -> Result<(), OperationError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Streaming {:?}", cmd.as_std());

    let mut child = cmd.spawn().map_err(|e| OperationError::spawn(step, &e))?;

    let pumps = [
        child.stdout.take().map(|out| pump(out, logs.stdout.clone())),
        child.stderr.take().map(|err| pump(err, logs.stderr.clone())),
    ];

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            abort_pumps(pumps);
            return Err(OperationError::spawn(step, &e));
        }
        Err(_) => {
            let _ = child.kill().await;
            abort_pumps(pumps);
            return Err(OperationError::timeout(step, timeout));
        }
    };

    for handle in pumps.into_iter().flatten() {
        let _ = handle.await;
    }

    if !status.success() {
        return Err(OperationError::exit(step, status.code().unwrap_or(-1), ""));
    }

    Ok(())
}

/// Copies a child stream into a collector chunk by chunk until EOF
pub(crate) fn pump<R>(mut reader: R, collector: LogCollector) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => collector.append(&buf[..n]),
            }
        }
    })
}

fn abort_pumps(pumps: [Option<JoinHandle<()>>; 2]) {
    for handle in pumps.into_iter().flatten() {
        handle.abort();
    }
}
