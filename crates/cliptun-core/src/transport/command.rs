//! A spawned command's stdio as the shared slot.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use super::{read_accumulated, Transport};
use crate::error::{Error, Result};

/// Transport over a child process: `write` feeds its stdin, `read` pulls
/// whatever has accumulated on its stdout.
pub struct CommandTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    buffer_size: usize,
    chunk_timeout: Duration,
    overall_timeout: Duration,
}

impl CommandTransport {
    /// Spawn `command` (split shell-style) with piped stdio.
    pub fn spawn(command: &str, buffer_size: usize, interval: Duration) -> Result<CommandTransport> {
        let args = shell_words::split(command)
            .map_err(|e| Error::config(format!("cannot parse transport command: {e}")))?;
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| Error::config("empty transport command"))?;

        let mut child = Command::new(program)
            .args(rest)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::transport(format!("cannot execute transport command: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::transport("cannot open stdin for transport command"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::transport("cannot open stdout for transport command"))?;

        debug!(command, "transport command spawned");
        Ok(CommandTransport {
            child,
            stdin,
            stdout,
            buffer_size,
            chunk_timeout: interval / 2,
            overall_timeout: interval * 4 / 5,
        })
    }
}

#[async_trait]
impl Transport for CommandTransport {
    async fn read(&mut self) -> Result<String> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Err(Error::transport(format!(
                "transport command exited: {status}"
            )));
        }
        read_accumulated(
            &mut self.stdout,
            self.buffer_size,
            self.chunk_timeout,
            self.overall_timeout,
        )
        .await
    }

    async fn write(&mut self, text: &str) -> Result<()> {
        self.stdin.write_all(text.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    // A stream has no stale state to clear.
    async fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cat_roundtrip() {
        let mut t = CommandTransport::spawn("cat", 1024, Duration::from_millis(100)).unwrap();
        t.write("hello slot").await.unwrap();
        let text = t.read().await.unwrap();
        assert_eq!(text, "hello slot");
    }

    #[tokio::test]
    async fn silent_command_reads_empty() {
        let mut t =
            CommandTransport::spawn("sleep 5", 1024, Duration::from_millis(50)).unwrap();
        let text = t.read().await.unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn empty_command_rejected() {
        assert!(CommandTransport::spawn("", 1024, Duration::from_millis(50)).is_err());
    }
}
