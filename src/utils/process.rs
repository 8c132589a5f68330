//! Bounded execution of external tools.
//!
//! Commands are built as argument vectors and never pass through a shell.

use std::io;
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::warn;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to start process: {0}")]
    Spawn(#[source] io::Error),

    #[error("process did not finish within {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("failed while waiting for process: {0}")]
    Wait(#[source] io::Error),
}

/// Runs `cmd` to completion, capturing stdout and stderr.
///
/// When `limit` elapses first the child is killed and reaped before
/// [`CommandError::TimedOut`] is returned.
pub async fn run_with_timeout(mut cmd: Command, limit: Duration) -> Result<Output, CommandError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(CommandError::Spawn)?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let finished = tokio::time::timeout(limit, async {
        let (status, stdout, stderr) = tokio::join!(child.wait(), drain(stdout), drain(stderr));
        Ok::<_, io::Error>(Output {
            status: status?,
            stdout: stdout?,
            stderr: stderr?,
        })
    })
    .await;

    match finished {
        Ok(output) => output.map_err(CommandError::Wait),
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill timed-out process");
            }
            Err(CommandError::TimedOut(limit))
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Last few lines of stderr, for logs only.
pub fn stderr_tail(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = text.lines().rev().take(10).collect();
    lines.into_iter().rev().collect::<Vec<_>>().join(" | ")
}
