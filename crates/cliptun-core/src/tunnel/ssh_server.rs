//! In-process SSH server for the tunnel's server peer.
//!
//! Listens on an ephemeral loopback port, accepts a single connection (the
//! bridged channel traffic), and serves `exec` requests, the `sftp`
//! subsystem, `direct-tcpip` channel opens and `tcpip-forward` global
//! requests. Authentication is the fixed internal credential pair; the real
//! confidentiality boundary is the channel's authenticated encryption.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use russh::server::{self, Auth, Msg, Session};
use russh::{Channel as SshChannel, ChannelId, CryptoVec};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, warn};

use super::sftp_server::SftpHandler;
use crate::constants::{SSH_PASSWORD, SSH_USER};
use crate::error::Result;

/// Start the internal SSH server; returns the loopback address it listens on.
pub(super) async fn start() -> Result<SocketAddr> {
    let host_key = russh_keys::key::KeyPair::generate_ed25519();

    let config = Arc::new(server::Config {
        keys: vec![host_key],
        auth_rejection_time: Duration::from_millis(100),
        ..Default::default()
    });

    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = listener.local_addr()?;
    debug!(%addr, "started internal ssh server");

    tokio::spawn(async move {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "failed to accept internal ssh connection");
                return;
            }
        };
        debug!(peer = %peer, "internal ssh connection accepted");
        match server::run_stream(config, stream, ServerHandler::default()).await {
            Ok(session) => {
                if let Err(e) = session.await {
                    debug!(error = %e, "internal ssh session ended");
                }
            }
            Err(e) => error!(error = %e, "failed to run internal ssh session"),
        }
    });

    Ok(addr)
}

/// Per-connection server state: session channels awaiting an exec or
/// subsystem request.
#[derive(Default)]
struct ServerHandler {
    channels: HashMap<ChannelId, SshChannel<Msg>>,
}

#[async_trait::async_trait]
impl server::Handler for ServerHandler {
    type Error = russh::Error;

    async fn auth_password(
        &mut self,
        user: &str,
        password: &str,
    ) -> std::result::Result<Auth, Self::Error> {
        if user == SSH_USER && password == SSH_PASSWORD {
            Ok(Auth::Accept)
        } else {
            warn!(user, "internal ssh password rejected");
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: SshChannel<Msg>,
        _session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        debug!(command = %command, "exec request");
        let handle = session.handle();

        let Some(channel) = self.channels.remove(&channel_id) else {
            let _ = handle.channel_failure(channel_id).await;
            return Ok(());
        };

        let args = match shell_words::split(&command) {
            Ok(args) if !args.is_empty() => args,
            Ok(_) => {
                let _ = handle.channel_failure(channel_id).await;
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "cannot parse command");
                let _ = handle.channel_failure(channel_id).await;
                return Ok(());
            }
        };

        let mut child = match tokio::process::Command::new(&args[0])
            .args(&args[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!(error = %e, "cannot start command");
                let _ = handle.channel_failure(channel_id).await;
                return Ok(());
            }
        };

        let _ = handle.channel_success(channel_id).await;

        let mut stdin = child.stdin.take();
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        tokio::spawn(async move {
            let (mut from_client, mut to_client) = tokio::io::split(channel.into_stream());

            // Channel data feeds the command's stdin.
            let stdin_task = tokio::spawn(async move {
                if let Some(stdin) = stdin.as_mut() {
                    let _ = tokio::io::copy(&mut from_client, stdin).await;
                }
            });

            if let Some(stdout) = stdout.as_mut() {
                let _ = tokio::io::copy(stdout, &mut to_client).await;
            }
            if let Some(stderr) = stderr.as_mut() {
                let mut buf = vec![0u8; 32 * 1024];
                while let Ok(n) = stderr.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    if handle
                        .extended_data(channel_id, 1, CryptoVec::from_slice(&buf[..n]))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }

            let status = child.wait().await.ok().and_then(|s| s.code()).unwrap_or(0);
            let _ = handle.exit_status_request(channel_id, status as u32).await;
            let _ = handle.eof(channel_id).await;
            let _ = handle.close(channel_id).await;
            stdin_task.abort();
        });

        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        let handle = session.handle();
        if name == "sftp" {
            debug!("sftp subsystem request accepted");
            if let Some(channel) = self.channels.remove(&channel_id) {
                let _ = handle.channel_success(channel_id).await;
                tokio::spawn(async move {
                    russh_sftp::server::run(channel.into_stream(), SftpHandler::default()).await;
                });
            } else {
                let _ = handle.channel_failure(channel_id).await;
            }
        } else {
            debug!(name, "unknown subsystem rejected");
            let _ = handle.channel_failure(channel_id).await;
        }
        Ok(())
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: SshChannel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        debug!(
            origin = %format!("{originator_address}:{originator_port}"),
            target = %format!("{host_to_connect}:{port_to_connect}"),
            "connection forward request"
        );
        let target = format!("{host_to_connect}:{port_to_connect}");
        tokio::spawn(async move {
            let mut upstream = match TcpStream::connect(&target).await {
                Ok(upstream) => upstream,
                Err(e) => {
                    error!(target = %target, error = %e, "cannot create forwarding connection");
                    return;
                }
            };
            let mut stream = channel.into_stream();
            let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
        });
        Ok(true)
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        debug!(address, port = *port, "remote forward request");
        let listener = match TcpListener::bind((address, *port as u16)).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, "listen failed for remote forwarding");
                return Ok(false);
            }
        };
        if *port == 0 {
            if let Ok(addr) = listener.local_addr() {
                *port = addr.port() as u32;
            }
        }

        let handle = session.handle();
        let address = address.to_string();
        let bound_port = *port;
        tokio::spawn(async move {
            loop {
                let (mut inbound, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "accept failed on remote forward listener");
                        break;
                    }
                };
                debug!(peer = %peer, "accepted connection for remote forwarding");
                let channel = match handle
                    .channel_open_forwarded_tcpip(
                        address.clone(),
                        bound_port,
                        peer.ip().to_string(),
                        peer.port() as u32,
                    )
                    .await
                {
                    Ok(channel) => channel,
                    Err(e) => {
                        error!(error = %e, "cannot open forwarded-tcpip channel");
                        continue;
                    }
                };
                tokio::spawn(async move {
                    let mut stream = channel.into_stream();
                    let _ = tokio::io::copy_bidirectional(&mut stream, &mut inbound).await;
                });
            }
        });

        Ok(true)
    }
}
