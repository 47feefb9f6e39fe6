//! Dump-and-pipe
//!
//! Streams the stdout of a source process into the stdin of a sink process.
//! Both are spawned together and connected by two tasks sharing a bounded
//! channel, so a slow sink applies backpressure to the source. Both exit
//! codes are always collected, also when one side dies early.

use std::io;
use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Bytes read from the source per chunk
pub const PIPE_CHUNK_SIZE: usize = 8 * 1024;

/// Chunks buffered between source and sink
pub const PIPE_CAPACITY: usize = 16;

/// Exit codes of both ends; `None` when a process was killed by a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeStatus {
    pub source: Option<i32>,
    pub sink: Option<i32>,
}

impl PipeStatus {
    pub fn success(&self) -> bool {
        self.source == Some(0) && self.sink == Some(0)
    }

    /// 0 when both processes succeeded, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }
}

/// Run `source | sink` and wait for both
pub async fn pipe(mut source: Command, mut sink: Command) -> io::Result<PipeStatus> {
    source
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    sink.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut source_child = source.spawn()?;
    let mut sink_child = match sink.spawn() {
        Ok(child) => child,
        Err(e) => {
            // Nobody will ever read the source's output
            if let Err(kill_err) = source_child.kill().await {
                warn!("Failed to stop pipe source: {}", kill_err);
            }
            return Err(e);
        }
    };

    let mut reader = source_child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "source stdout not captured"))?;
    let mut writer = sink_child
        .stdin
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "sink stdin not captured"))?;

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(PIPE_CAPACITY);

    let pump = tokio::spawn(async move {
        let mut buf = vec![0u8; PIPE_CHUNK_SIZE];
        let mut total = 0usize;
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        debug!("Pipe sink stopped reading after {} bytes", total);
                        break;
                    }
                }
                Err(e) => {
                    warn!("Reading pipe source failed: {}", e);
                    break;
                }
            }
        }
        total
    });

    let feed = tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            if let Err(e) = writer.write_all(&chunk).await {
                debug!("Pipe sink closed its input: {}", e);
                return;
            }
        }
        if let Err(e) = writer.shutdown().await {
            debug!("Closing pipe sink input: {}", e);
        }
    });

    let (pumped, fed, source_status, sink_output) =
        tokio::join!(pump, feed, source_child.wait(), sink_child.wait_with_output());

    match pumped {
        Ok(total) => debug!("Piped {} bytes", total),
        Err(e) => error!("Pipe reader task failed: {}", e),
    }
    if let Err(e) = fed {
        error!("Pipe writer task failed: {}", e);
    }

    let sink_output = sink_output?;
    for line in String::from_utf8_lossy(&sink_output.stdout).lines() {
        debug!("{}", line);
    }
    for line in String::from_utf8_lossy(&sink_output.stderr).lines() {
        error!("{}", line);
    }

    Ok(PipeStatus {
        source: source_status?.code(),
        sink: sink_output.status.code(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn test_both_succeed() {
        let status = pipe(sh("printf hello"), sh(r#"test "$(cat)" = hello"#))
            .await
            .unwrap();
        assert_eq!(status, PipeStatus { source: Some(0), sink: Some(0) });
        assert!(status.success());
        assert_eq!(status.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_failing_source_fails_pipe() {
        let status = pipe(sh("echo partial dump; exit 1"), sh("cat > /dev/null"))
            .await
            .unwrap();
        assert_eq!(status.source, Some(1));
        assert_eq!(status.sink, Some(0));
        assert!(!status.success());
        assert_eq!(status.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_failing_sink_fails_pipe() {
        let status = pipe(sh("printf data"), sh("cat > /dev/null; exit 3"))
            .await
            .unwrap();
        assert_eq!(status.sink, Some(3));
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_sink_exiting_early_does_not_hang() {
        // `yes` never ends on its own; it must be stopped by the closed pipe
        let status = pipe(sh("yes"), sh("head -c 1 > /dev/null"))
            .await
            .unwrap();
        assert_eq!(status.sink, Some(0));
        assert_ne!(status.source, Some(0));
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_large_stream() {
        // Well above PIPE_CAPACITY * PIPE_CHUNK_SIZE
        let status = pipe(
            sh("head -c 1048576 /dev/zero"),
            sh(r#"test "$(wc -c)" -eq 1048576"#),
        )
        .await
        .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_missing_sink_binary() {
        let result = pipe(sh("yes"), Command::new("/nonexistent/restic")).await;
        assert!(result.is_err());
    }
}
