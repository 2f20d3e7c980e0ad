//! Minimal in-process SOCKS5 server (RFC 1928).
//!
//! Supports no-authentication CONNECT with IPv4, IPv6 and domain addresses.
//! Runs on an ephemeral loopback port on the peer that received
//! `START-SOCKS`; the requesting side reaches it through a local forward.

use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const SOCKS_VERSION: u8 = 0x05;
const AUTH_NO_AUTH: u8 = 0x00;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ADDR_IPV4: u8 = 0x01;
const ADDR_DOMAIN: u8 = 0x03;
const ADDR_IPV6: u8 = 0x04;
const REPLY_SUCCESS: u8 = 0x00;
const REPLY_CONNECTION_REFUSED: u8 = 0x05;
const REPLY_CMD_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ADDR_NOT_SUPPORTED: u8 = 0x08;

/// Bind an ephemeral loopback port, serve SOCKS5 on it, return the port.
pub(super) async fn serve_ephemeral() -> Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|e| Error::Forward {
            message: format!("cannot create SOCKS listener: {e}"),
        })?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Forward {
            message: format!("cannot retrieve SOCKS port: {e}"),
        })?
        .port();

    debug!(port, "SOCKS5 server listening");
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "SOCKS5 connection accepted");
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream).await {
                            debug!(error = %e, "SOCKS5 connection failed");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "SOCKS5 accept failed");
                    break;
                }
            }
        }
    });

    Ok(port)
}

async fn handle_connection(mut stream: TcpStream) -> Result<()> {
    // Method negotiation.
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    if head[0] != SOCKS_VERSION {
        return Err(Error::Forward {
            message: format!("unsupported SOCKS version {}", head[0]),
        });
    }
    let mut methods = vec![0u8; head[1] as usize];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&AUTH_NO_AUTH) {
        stream
            .write_all(&[SOCKS_VERSION, AUTH_NO_ACCEPTABLE])
            .await?;
        return Err(Error::Forward {
            message: "no acceptable SOCKS auth method".to_string(),
        });
    }
    stream.write_all(&[SOCKS_VERSION, AUTH_NO_AUTH]).await?;

    // Request.
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    if request[1] != CMD_CONNECT {
        reply(&mut stream, REPLY_CMD_NOT_SUPPORTED).await?;
        return Err(Error::Forward {
            message: format!("unsupported SOCKS command {}", request[1]),
        });
    }

    let target = match request[3] {
        ADDR_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            let port = read_port(&mut stream).await?;
            format!("{}:{}", Ipv4Addr::from(addr), port)
        }
        ADDR_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            let port = read_port(&mut stream).await?;
            format!("[{}]:{}", Ipv6Addr::from(addr), port)
        }
        ADDR_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            let port = read_port(&mut stream).await?;
            format!("{}:{}", String::from_utf8_lossy(&name), port)
        }
        other => {
            reply(&mut stream, REPLY_ADDR_NOT_SUPPORTED).await?;
            return Err(Error::Forward {
                message: format!("unsupported SOCKS address type {other}"),
            });
        }
    };

    debug!(target = %target, "SOCKS5 connect");
    let mut upstream = match TcpStream::connect(&target).await {
        Ok(upstream) => upstream,
        Err(e) => {
            reply(&mut stream, REPLY_CONNECTION_REFUSED).await?;
            return Err(Error::Forward {
                message: format!("cannot connect to '{target}': {e}"),
            });
        }
    };
    reply(&mut stream, REPLY_SUCCESS).await?;

    let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
    Ok(())
}

async fn read_port(stream: &mut TcpStream) -> Result<u16> {
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok(u16::from_be_bytes(port))
}

async fn reply(stream: &mut TcpStream, code: u8) -> Result<()> {
    // Bound address is reported as 0.0.0.0:0; clients use the proxied pipe.
    stream
        .write_all(&[
            SOCKS_VERSION,
            code,
            0x00,
            ADDR_IPV4,
            0,
            0,
            0,
            0,
            0,
            0,
        ])
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run a CONNECT handshake against the server and verify bytes flow to a
    /// local echo listener.
    #[tokio::test]
    async fn connect_to_local_echo() {
        // Echo target.
        let echo = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let echo_port = echo.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = echo.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(&buf[..n]).await.unwrap();
        });

        let port = serve_ephemeral().await.unwrap();
        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        // Greeting: version 5, one method, no-auth.
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut resp = [0u8; 2];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp, [0x05, 0x00]);

        // CONNECT 127.0.0.1:echo_port.
        let mut req = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
        req.extend_from_slice(&echo_port.to_be_bytes());
        client.write_all(&req).await.unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0x00);

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn rejects_clients_without_no_auth() {
        let port = serve_ephemeral().await.unwrap();
        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        // Only username/password auth offered.
        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        let mut resp = [0u8; 2];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp, [0x05, 0xFF]);
    }
}
