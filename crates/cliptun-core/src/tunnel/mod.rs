//! The tunnel layer: an internal SSH session over the channel.
//!
//! One peer runs an in-process SSH server, the other an in-process SSH
//! client; both are wired to the channel through a loopback socket bridge.
//! The SSH session then carries port forwards, SOCKS, remote execution and
//! SFTP with standard SSH framing — the channel only sees opaque bytes.

mod bridge;
mod sftp_server;
mod socks;
mod ssh_server;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use russh::client;
use russh::ChannelMsg;
use russh_sftp::client::SftpSession;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error};

use crate::channel::{Channel, ControlEvents};
use crate::config::ChannelConfig;
use crate::constants::{SSH_PASSWORD, SSH_USER};
use crate::error::{Error, Result};
use crate::packet::Peer;
use crate::transport::Transport;

/// One port forwarding rule: listen on `port`, deliver to `host:host_port`
/// on the far side (local forward) or near side (remote forward).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    pub port: u16,
    pub host: String,
    pub host_port: u16,
}

impl FromStr for ForwardSpec {
    type Err = Error;

    /// Parse `PORT:HOST:HOSTPORT`.
    fn from_str(s: &str) -> Result<ForwardSpec> {
        let bad = || Error::InvalidForwardSpec {
            message: format!("bad port forwarding format: '{s}'"),
        };
        let mut parts = s.split(':');
        let port = parts
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(bad)?;
        let host = parts.next().filter(|h| !h.is_empty()).ok_or_else(bad)?;
        let host_port = parts
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(bad)?;
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(ForwardSpec {
            port,
            host: host.to_string(),
            host_port,
        })
    }
}

/// Targets of requested remote forwards, keyed by the remote listen port;
/// consulted when the peer opens a `forwarded-tcpip` channel back to us.
type RemoteTargets = Arc<Mutex<HashMap<u16, (String, u16)>>>;

struct Shared {
    channel: Channel,
    ssh: tokio::sync::Mutex<Option<client::Handle<ClientHandler>>>,
    /// Local port a pending `socks <port>` command wants served, consumed
    /// when the peer answers `SOCKS-AT`.
    socks_port: Mutex<Option<u16>>,
    remote_targets: RemoteTargets,
}

/// A channel with an SSH session across it.
#[derive(Clone)]
pub struct Tunnel {
    shared: Arc<Shared>,
}

impl Tunnel {
    /// Build the channel named by the config and attach the tunnel's control
    /// command handling.
    pub async fn new(role: Peer, config: ChannelConfig) -> Result<Tunnel> {
        let (channel, events) = Channel::connect(role, config).await?;
        Ok(Self::attach(channel, events))
    }

    /// Like [`Tunnel::new`] over an already-built transport.
    pub async fn with_transport(
        role: Peer,
        config: ChannelConfig,
        transport: Box<dyn Transport>,
    ) -> Result<Tunnel> {
        let (channel, events) = Channel::with_transport(role, config, transport).await?;
        Ok(Self::attach(channel, events))
    }

    fn attach(channel: Channel, events: ControlEvents) -> Tunnel {
        let shared = Arc::new(Shared {
            channel,
            ssh: tokio::sync::Mutex::new(None),
            socks_port: Mutex::new(None),
            remote_targets: Arc::new(Mutex::new(HashMap::new())),
        });
        tokio::spawn(control_loop(shared.clone(), events));
        Tunnel { shared }
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Channel {
        &self.shared.channel
    }

    /// Orderly shutdown of the underlying channel.
    pub async fn close(&self) {
        self.shared.channel.close().await;
    }

    /// Wait until the underlying channel has torn down.
    pub async fn closed(&self) {
        self.shared.channel.closed().await;
    }

    /// Server peer: start the internal SSH server and bridge it to the
    /// channel. Returns once the bridge is running.
    pub async fn start_server(&self) -> Result<()> {
        let addr = ssh_server::start().await?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::transport(format!("cannot connect to local ssh server: {e}")))?;
        bridge::spawn(self.shared.channel.clone(), stream);
        Ok(())
    }

    /// Client peer: bridge a loopback listener to the channel, then open the
    /// internal SSH client session through it.
    pub async fn start_client(&self) -> Result<()> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        debug!(%addr, "listening for internal ssh traffic");

        let channel = self.shared.channel.clone();
        tokio::spawn(async move {
            match listener.accept().await {
                Ok((stream, _)) => bridge::spawn(channel, stream),
                Err(e) => error!(error = %e, "failed to accept internal ssh client"),
            }
        });

        let config = Arc::new(client::Config::default());
        let handler = ClientHandler {
            remote_targets: self.shared.remote_targets.clone(),
        };
        let mut handle = client::connect(config, addr, handler).await?;
        let authenticated = handle.authenticate_password(SSH_USER, SSH_PASSWORD).await?;
        if !authenticated {
            return Err(Error::transport("internal ssh authentication failed"));
        }
        debug!("ssh connection established");

        *self.shared.ssh.lock().await = Some(handle);
        Ok(())
    }

    /// Accept connections on `localhost:spec.port` and forward each through
    /// a `direct-tcpip` channel to `spec.host:spec.host_port` on the peer.
    pub async fn add_local_forward(&self, spec: ForwardSpec) -> Result<()> {
        let listener = TcpListener::bind(("127.0.0.1", spec.port))
            .await
            .map_err(|e| Error::Forward {
                message: format!("listen failed for local port forwarding: {e}"),
            })?;
        debug!(
            port = spec.port,
            target = %format!("{}:{}", spec.host, spec.host_port),
            "local port forwarding established"
        );

        let shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                let (mut local, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "accept failed on local forward listener");
                        break;
                    }
                };
                debug!(peer = %peer, "connection accepted on local listener, forwarding");
                let channel = {
                    let mut guard = shared.ssh.lock().await;
                    let Some(handle) = guard.as_mut() else {
                        error!("tunnel not connected, dropping forwarded connection");
                        continue;
                    };
                    handle
                        .channel_open_direct_tcpip(
                            spec.host.clone(),
                            spec.host_port as u32,
                            peer.ip().to_string(),
                            peer.port() as u32,
                        )
                        .await
                };
                match channel {
                    Ok(channel) => {
                        tokio::spawn(async move {
                            let mut stream = channel.into_stream();
                            let _ = tokio::io::copy_bidirectional(&mut stream, &mut local).await;
                        });
                    }
                    Err(e) => error!(error = %e, "cannot open direct-tcpip channel"),
                }
            }
        });
        Ok(())
    }

    /// Ask the peer to listen on `localhost:spec.port`; connections it
    /// accepts come back as `forwarded-tcpip` channels which we splice onto
    /// `spec.host:spec.host_port` locally.
    pub async fn add_remote_forward(&self, spec: ForwardSpec) -> Result<()> {
        self.shared
            .remote_targets
            .lock()
            .expect("remote target table poisoned")
            .insert(spec.port, (spec.host.clone(), spec.host_port));

        let mut guard = self.shared.ssh.lock().await;
        let handle = guard
            .as_mut()
            .ok_or_else(|| Error::transport("tunnel not connected"))?;
        handle
            .tcpip_forward("localhost", spec.port as u32)
            .await
            .map_err(|_| Error::Forward {
                message: format!("peer rejected remote forward on port {}", spec.port),
            })?;
        debug!(
            port = spec.port,
            target = %format!("{}:{}", spec.host, spec.host_port),
            "remote port forwarding established"
        );
        Ok(())
    }

    /// Ask the peer to start its SOCKS5 server; once it answers
    /// `SOCKS-AT:<port>` the control loop installs the local forward from
    /// `port` to it.
    pub async fn start_socks(&self, port: u16) {
        *self
            .shared
            .socks_port
            .lock()
            .expect("socks port poisoned") = Some(port);
        self.shared.channel.send_control("START-SOCKS").await;
    }

    /// Run `command` on the peer and return its combined output.
    pub async fn execute_command(&self, command: &str) -> Result<String> {
        let mut channel = {
            let mut guard = self.shared.ssh.lock().await;
            let handle = guard
                .as_mut()
                .ok_or_else(|| Error::transport("tunnel not connected"))?;
            handle.channel_open_session().await?
        };
        channel.exec(true, command).await?;

        let mut output = Vec::new();
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => output.extend_from_slice(&data),
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    output.extend_from_slice(&data)
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Open an SFTP session on the peer.
    pub async fn start_sftp(&self) -> Result<SftpSession> {
        let channel = {
            let mut guard = self.shared.ssh.lock().await;
            let handle = guard
                .as_mut()
                .ok_or_else(|| Error::transport("tunnel not connected"))?;
            handle.channel_open_session().await?
        };
        channel.request_subsystem(true, "sftp").await?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| Error::Sftp {
                message: format!("cannot start sftp session: {e}"),
            })
    }
}

/// Consume control commands the channel does not understand.
async fn control_loop(shared: Arc<Shared>, mut events: ControlEvents) {
    while let Some(event) = events.recv().await {
        debug!(cmd = %event.cmd, arg = %event.arg, "control command received");
        match event.cmd.as_str() {
            "START-SOCKS" => match socks::serve_ephemeral().await {
                Ok(port) => {
                    shared
                        .channel
                        .send_control(&format!("SOCKS-AT:{port}"))
                        .await;
                }
                Err(e) => error!(error = %e, "cannot start SOCKS server"),
            },
            "SOCKS-AT" => {
                let local_port = shared
                    .socks_port
                    .lock()
                    .expect("socks port poisoned")
                    .take();
                let (Some(local_port), Ok(peer_port)) = (local_port, event.arg.parse::<u16>())
                else {
                    error!(arg = %event.arg, "unexpected SOCKS-AT control command");
                    continue;
                };
                let tunnel = Tunnel {
                    shared: shared.clone(),
                };
                let spec = ForwardSpec {
                    port: local_port,
                    host: "localhost".to_string(),
                    host_port: peer_port,
                };
                if let Err(e) = tunnel.add_local_forward(spec).await {
                    error!(error = %e, "cannot install SOCKS forward");
                }
            }
            other => debug!(cmd = other, "unhandled control command"),
        }
    }
}

/// Handler for the internal SSH client. Host key verification is disabled:
/// the key is ephemeral and the outer authenticated encryption is the real
/// confidentiality boundary.
struct ClientHandler {
    remote_targets: RemoteTargets,
}

#[async_trait::async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: russh::Channel<client::Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> std::result::Result<(), Self::Error> {
        debug!(
            origin = %format!("{originator_address}:{originator_port}"),
            listener = %format!("{connected_address}:{connected_port}"),
            "forwarded connection from peer"
        );
        let target = self
            .remote_targets
            .lock()
            .expect("remote target table poisoned")
            .get(&(connected_port as u16))
            .cloned();
        let Some((host, port)) = target else {
            error!(port = connected_port, "no target for forwarded connection");
            return Ok(());
        };
        tokio::spawn(async move {
            let mut local = match TcpStream::connect((host.as_str(), port)).await {
                Ok(local) => local,
                Err(e) => {
                    error!(target = %format!("{host}:{port}"), error = %e, "cannot dial forward target");
                    return;
                }
            };
            let mut stream = channel.into_stream();
            let _ = tokio::io::copy_bidirectional(&mut stream, &mut local).await;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_spec_parses() {
        let spec: ForwardSpec = "9000:example:80".parse().unwrap();
        assert_eq!(
            spec,
            ForwardSpec {
                port: 9000,
                host: "example".to_string(),
                host_port: 80,
            }
        );
    }

    #[test]
    fn forward_spec_rejects_malformed_input() {
        assert!("".parse::<ForwardSpec>().is_err());
        assert!("9000".parse::<ForwardSpec>().is_err());
        assert!("9000:host".parse::<ForwardSpec>().is_err());
        assert!("port:host:80".parse::<ForwardSpec>().is_err());
        assert!("9000::80".parse::<ForwardSpec>().is_err());
        assert!("9000:host:80:extra".parse::<ForwardSpec>().is_err());
        assert!("99999:host:80".parse::<ForwardSpec>().is_err());
    }
}
