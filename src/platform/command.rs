use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "platform";

use crate::log_debug;

/// Default ceiling for a single OS tool invocation.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs an external automation tool and returns its trimmed stdout.
///
/// `stdin` is written in full before the process is awaited, which is how
/// clipboard writers (`pbcopy`, `xclip -i`) receive their payload.
pub async fn run_tool(
    program: &str,
    args: &[&str],
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<String> {
    log_debug!("exec {} {:?}", program, args);

    let mut command = Command::new(program);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    if let Some(payload) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("{program} stdin unavailable"))?;
        pipe.write_all(payload.as_bytes())
            .await
            .with_context(|| format!("failed to write to {program} stdin"))?;
        // Closing stdin lets the tool see EOF.
        drop(pipe);
    }

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| anyhow!("{program} timed out after {timeout:?}"))?
        .with_context(|| format!("failed to wait for {program}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .trim_end_matches(['\r', '\n'])
        .to_string())
}

/// Pipes `payload` into a tool that is only run for its side effect.
///
/// Stdout is discarded rather than captured: clipboard owners such as
/// `xclip -i` fork a child that keeps serving the selection, and a captured
/// stdout would never reach EOF.
pub async fn write_to_tool(
    program: &str,
    args: &[&str],
    payload: &str,
    timeout: Duration,
) -> Result<()> {
    log_debug!("exec {} {:?} <{} bytes>", program, args, payload.len());

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    let mut pipe = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("{program} stdin unavailable"))?;
    pipe.write_all(payload.as_bytes())
        .await
        .with_context(|| format!("failed to write to {program} stdin"))?;
    drop(pipe);

    let status = tokio::time::timeout(timeout, child.wait())
        .await
        .map_err(|_| anyhow!("{program} timed out after {timeout:?}"))?
        .with_context(|| format!("failed to wait for {program}"))?;
    if !status.success() {
        bail!("{program} exited with {status}");
    }
    Ok(())
}

/// Whether `program` resolves to an executable on `PATH`.
pub fn tool_available(program: &str) -> bool {
    which::which(program).is_ok()
}
