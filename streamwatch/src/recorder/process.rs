//! Recorder process ownership.
//!
//! Wraps one external recorder invocation: spawn with piped output, pump
//! stdout/stderr lines into a channel, wait for exit on a detached task, and
//! terminate the whole process tree on demand.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{Error, Result};

/// Build the recorder argument vector.
///
/// `options` is user-configured free text split on whitespace, followed by
/// the output file, a force-overwrite flag, and the positional target and
/// quality the recorder expects.
pub fn build_recorder_args(
    options: &str,
    output: &Path,
    target: &str,
    quality: &str,
) -> Vec<String> {
    let mut args: Vec<String> = options.split_whitespace().map(str::to_string).collect();
    args.push("-o".to_string());
    args.push(output.to_string_lossy().into_owned());
    args.push("-f".to_string());
    args.push(target.to_string());
    args.push(quality.to_string());
    args
}

/// A running recorder process.
///
/// Output lines arrive on `lines`; the exit code arrives on `exit` once.
/// `terminate` kills the full process tree without going through `exit`, so
/// a deliberate stop never looks like a self-exit to the caller.
pub struct RecorderProcess {
    pid: u32,
    pub lines: Option<mpsc::UnboundedReceiver<String>>,
    pub exit: oneshot::Receiver<Option<i32>>,
    cancel: CancellationToken,
}

impl RecorderProcess {
    /// Spawn the recorder with piped output.
    pub fn spawn(program: &Path, args: &[String]) -> Result<Self> {
        let mut child = process_utils::tokio_command(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::process(format!("failed to start {}: {}", program.display(), e)))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::process("recorder exited before it could be tracked"))?;

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_pump(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_pump(stderr, line_tx);
        }

        let cancel = CancellationToken::new();
        let exit = spawn_process_waiter(child, cancel.clone());

        debug!(pid, program = %program.display(), "recorder started");

        Ok(Self {
            pid,
            lines: Some(line_rx),
            exit,
            cancel,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Kill the recorder and all of its children, then let the waiter reap
    /// the root. Dropping `self` discards the exit notification.
    pub async fn terminate(self) {
        let pid = self.pid;
        let done = tokio::task::spawn_blocking(move || process_utils::kill_process_tree(pid)).await;
        if let Err(e) = done {
            warn!(pid, error = %e, "process tree kill task failed");
        }
        // Fallback for the root in case the snapshot missed it.
        self.cancel.cancel();
    }
}

fn spawn_line_pump(reader: impl AsyncRead + Unpin + Send + 'static, tx: mpsc::UnboundedSender<String>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

/// Wait for the child on a detached task, delivering the exit code once.
///
/// Cancelling the token kills the root process and sends `None`.
fn spawn_process_waiter(
    mut child: Child,
    cancellation_token: CancellationToken,
) -> oneshot::Receiver<Option<i32>> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let exit_code = tokio::select! {
            _ = cancellation_token.cancelled() => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                None
            }
            status = child.wait() => {
                match status {
                    Ok(exit_status) => {
                        let code = exit_status.code();
                        if let Some(c) = code
                            && c != 0
                        {
                            warn!("recorder exited with code: {}", c);
                        }
                        code
                    }
                    Err(e) => {
                        error!("error waiting for recorder: {}", e);
                        Some(-1)
                    }
                }
            }
        };
        let _ = tx.send(exit_code);
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_recorder_args() {
        let args = build_recorder_args(
            "--hls-timeout 120",
            Path::new("/tmp/out.ts"),
            "https://example.com/alpha",
            "best",
        );
        assert_eq!(
            args,
            [
                "--hls-timeout",
                "120",
                "-o",
                "/tmp/out.ts",
                "-f",
                "https://example.com/alpha",
                "best"
            ]
        );
    }

    #[test]
    fn test_build_recorder_args_empty_options() {
        let args = build_recorder_args("", Path::new("out.ts"), "alpha", "720p");
        assert_eq!(args, ["-o", "out.ts", "-f", "alpha", "720p"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_collects_output_and_exit_code() {
        let mut process = RecorderProcess::spawn(
            Path::new("/bin/sh"),
            &["-c".to_string(), "echo one; echo two >&2; exit 3".to_string()],
        )
        .unwrap();

        let code = process.exit.await.unwrap();
        assert_eq!(code, Some(3));

        let mut collected = Vec::new();
        let mut lines = process.lines.take().unwrap();
        while let Some(line) = lines.recv().await {
            collected.push(line);
        }
        collected.sort();
        assert_eq!(collected, ["one", "two"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_missing_binary_errors() {
        let result = RecorderProcess::spawn(Path::new("/nonexistent/recorder-binary"), &[]);
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_kills_long_running_process() {
        let process = RecorderProcess::spawn(
            Path::new("/bin/sh"),
            &["-c".to_string(), "sleep 300".to_string()],
        )
        .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(10), process.terminate())
            .await
            .expect("terminate should not hang");
    }
}
