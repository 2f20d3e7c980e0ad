//! A raw TCP socket as the shared slot.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use super::{read_accumulated, Transport};
use crate::error::{Error, Result};

/// Transport over a single TCP connection, either dialed or accepted once.
pub struct TcpTransport {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    buffer_size: usize,
    chunk_timeout: Duration,
    overall_timeout: Duration,
}

impl TcpTransport {
    /// Dial `addr`.
    pub async fn dial(addr: &str, buffer_size: usize, interval: Duration) -> Result<TcpTransport> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::transport(format!("cannot dial connection: {e}")))?;
        debug!(addr, "tcp transport connected");
        Ok(Self::from_stream(stream, buffer_size, interval))
    }

    /// Bind `addr` and accept exactly one peer.
    pub async fn listen(addr: &str, buffer_size: usize, interval: Duration) -> Result<TcpTransport> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::transport(format!("cannot start listener: {e}")))?;
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| Error::transport(format!("cannot accept tcp connection: {e}")))?;
        debug!(addr, peer = %peer, "tcp transport accepted");
        Ok(Self::from_stream(stream, buffer_size, interval))
    }

    fn from_stream(stream: TcpStream, buffer_size: usize, interval: Duration) -> TcpTransport {
        let (reader, writer) = stream.into_split();
        TcpTransport {
            reader,
            writer,
            buffer_size,
            chunk_timeout: interval / 2,
            overall_timeout: interval * 4 / 5,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read(&mut self) -> Result<String> {
        read_accumulated(
            &mut self.reader,
            self.buffer_size,
            self.chunk_timeout,
            self.overall_timeout,
        )
        .await
    }

    async fn write(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    // A stream has no stale state to clear.
    async fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dial_listen_pair_exchanges_text() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let interval = Duration::from_millis(100);
        let server = tokio::spawn({
            let addr = addr.to_string();
            async move { TcpTransport::listen(&addr, 1024, interval).await.unwrap() }
        });
        // The listener task may not have re-bound yet; retry briefly.
        let mut client = loop {
            match TcpTransport::dial(&addr.to_string(), 1024, interval).await {
                Ok(t) => break t,
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        };
        let mut server = server.await.unwrap();

        client.write("ping").await.unwrap();
        assert_eq!(server.read().await.unwrap(), "ping");
        server.write("pong").await.unwrap();
        assert_eq!(client.read().await.unwrap(), "pong");
    }
}
