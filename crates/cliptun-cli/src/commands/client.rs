//! `cliptun client`: tunnel client with port forwardings and the
//! interactive prompt.

use cliptun_core::config::ChannelConfig;
use cliptun_core::packet::Peer;
use cliptun_core::tunnel::{ForwardSpec, Tunnel};
use cliptun_core::Result;

use crate::{shell, signals};

pub async fn run(
    config: ChannelConfig,
    fwd_local: Vec<String>,
    fwd_remote: Vec<String>,
    socks: Option<u16>,
) -> Result<()> {
    // Forward specs are configuration; reject them before touching the slot.
    let fwd_local = fwd_local
        .iter()
        .map(|s| s.parse::<ForwardSpec>())
        .collect::<Result<Vec<_>>>()?;
    let fwd_remote = fwd_remote
        .iter()
        .map(|s| s.parse::<ForwardSpec>())
        .collect::<Result<Vec<_>>>()?;

    let tunnel = Tunnel::new(Peer::Client, config).await?;
    signals::install(tunnel.channel().clone());

    tunnel.start_client().await?;

    if let Some(port) = socks {
        tunnel.start_socks(port).await;
    }
    for spec in fwd_local {
        tunnel.add_local_forward(spec).await?;
    }
    for spec in fwd_remote {
        tunnel.add_remote_forward(spec).await?;
    }

    println!("Connected, type 'help' for a list of commands.");
    shell::run(&tunnel).await;

    tunnel.close().await;
    Ok(())
}
