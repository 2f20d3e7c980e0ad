//! Transport abstractions: a single read-latest/write-latest slot.
//!
//! All realizations expose the same small capability set:
//! - `read` returns the current slot content, non-blocking up to a short
//!   inactivity timeout; empty text is normal
//! - `write` overwrites the slot
//! - `reset` forces the slot to a value the peer cannot mistake for a
//!   legitimate packet (only meaningful where the slot has stale state)
//!
//! No transport guarantees that a `read` after a `write` returns what was
//! written; only eventual visibility of the last `write` to the peer.

mod clipboard;
mod command;
mod memory;
mod tcp;

pub use clipboard::ClipboardTransport;
pub use command::CommandTransport;
pub use memory::{MemorySlot, MemoryTransport};
pub use tcp::TcpTransport;

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout, Instant};

use crate::config::TransportSpec;
use crate::error::{Error, Result};

/// The slot capability set.
#[async_trait]
pub trait Transport: Send {
    /// Current slot content. Empty text means "nothing new".
    async fn read(&mut self) -> Result<String>;

    /// Overwrite the slot.
    async fn write(&mut self, text: &str) -> Result<()>;

    /// Force the slot to a non-packet value. No-op where the slot carries no
    /// stale state (stream transports).
    async fn reset(&mut self);
}

/// Build a transport from its config spec.
pub async fn connect(
    spec: &TransportSpec,
    block_size: usize,
    interval: Duration,
) -> Result<Box<dyn Transport>> {
    match spec {
        TransportSpec::Clipboard => Ok(Box::new(ClipboardTransport::new()?)),
        TransportSpec::Exec(cmd) => Ok(Box::new(CommandTransport::spawn(
            cmd,
            block_size * 2,
            interval,
        )?)),
        TransportSpec::Tcp(addr) => {
            Ok(Box::new(TcpTransport::dial(addr, block_size * 2, interval).await?))
        }
        TransportSpec::TcpListen(addr) => Ok(Box::new(
            TcpTransport::listen(addr, block_size * 2, interval).await?,
        )),
    }
}

/// Read whatever bytes have accumulated on `reader`.
///
/// Waits up to `overall` for the first bytes; once data starts flowing, keeps
/// pulling chunks until none arrives within `chunk`, the buffer reaches
/// `capacity`, or the overall deadline passes. Timeouts with no data yield an
/// empty string; a closed stream is a hard error.
pub(crate) async fn read_accumulated<R>(
    reader: &mut R,
    capacity: usize,
    chunk: Duration,
    overall: Duration,
) -> Result<String>
where
    R: AsyncRead + Unpin + Send,
{
    let deadline = Instant::now() + overall;
    let mut collected: Vec<u8> = Vec::new();
    let mut buf = vec![0u8; capacity];

    loop {
        let budget = if collected.is_empty() {
            deadline.saturating_duration_since(Instant::now())
        } else {
            chunk.min(deadline.saturating_duration_since(Instant::now()))
        };
        if budget.is_zero() || collected.len() >= capacity {
            break;
        }

        let space = capacity - collected.len();
        match timeout(budget, reader.read(&mut buf[..space])).await {
            Ok(Ok(0)) => {
                if collected.is_empty() {
                    return Err(Error::transport("stream closed"));
                }
                break;
            }
            Ok(Ok(n)) => collected.extend_from_slice(&buf[..n]),
            Ok(Err(e)) => {
                if collected.is_empty() {
                    return Err(Error::Io(e));
                }
                break;
            }
            // Inactivity; return what we have (possibly nothing).
            Err(_) => break,
        }
    }

    Ok(String::from_utf8_lossy(&collected).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn read_accumulated_returns_empty_on_silence() {
        let (_tx, rx) = tokio::io::duplex(64);
        let mut rx = rx;
        let text = read_accumulated(
            &mut rx,
            64,
            Duration::from_millis(5),
            Duration::from_millis(20),
        )
        .await
        .unwrap();
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn read_accumulated_collects_available_bytes() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut tx, b"abcdef")
            .await
            .unwrap();
        let text = read_accumulated(
            &mut rx,
            64,
            Duration::from_millis(10),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        assert_eq!(text, "abcdef");
    }

    #[tokio::test]
    async fn read_accumulated_errors_on_closed_stream() {
        let (tx, mut rx) = tokio::io::duplex(64);
        drop(tx);
        let res = read_accumulated(
            &mut rx,
            64,
            Duration::from_millis(5),
            Duration::from_millis(20),
        )
        .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn read_accumulated_respects_capacity() {
        let (mut tx, mut rx) = tokio::io::duplex(256);
        tokio::io::AsyncWriteExt::write_all(&mut tx, &[b'x'; 100])
            .await
            .unwrap();
        let text = read_accumulated(
            &mut rx,
            32,
            Duration::from_millis(10),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        assert_eq!(text.len(), 32);
    }
}
