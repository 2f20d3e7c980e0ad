//! `cliptun server`: tunnel server peer.

use cliptun_core::config::ChannelConfig;
use cliptun_core::packet::Peer;
use cliptun_core::tunnel::Tunnel;
use cliptun_core::Result;

use crate::signals;

pub async fn run(config: ChannelConfig) -> Result<()> {
    let tunnel = Tunnel::new(Peer::Server, config).await?;
    signals::install(tunnel.channel().clone());

    tunnel.start_server().await?;
    tunnel.closed().await;
    Ok(())
}
