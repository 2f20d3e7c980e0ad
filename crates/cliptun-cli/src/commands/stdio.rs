//! `cliptun stdin` and `cliptun stdout`: raw byte endpoints.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use cliptun_core::config::ChannelConfig;
use cliptun_core::packet::Peer;
use cliptun_core::Channel;
use cliptun_core::Result;

use crate::signals;

/// Read all data from STDIN and send it; EOF closes the channel.
pub async fn run_stdin(config: ChannelConfig) -> Result<()> {
    let block_size = config.block_size;
    let (channel, _events) = Channel::connect(Peer::Client, config).await?;
    signals::install(channel.clone());

    // Drain inbound so the peer's acks keep flowing.
    let drain = channel.clone();
    tokio::spawn(async move { while drain.receive().await.is_some() {} });

    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; block_size];
    loop {
        match stdin.read(&mut buf).await {
            Ok(0) | Err(_) => {
                channel.close().await;
                break;
            }
            Ok(n) => channel.send(buf[..n].to_vec()).await,
        }
    }
    channel.closed().await;
    Ok(())
}

/// Write every received payload to STDOUT.
pub async fn run_stdout(config: ChannelConfig) -> Result<()> {
    let (channel, _events) = Channel::connect(Peer::Server, config).await?;
    signals::install(channel.clone());

    let mut stdout = tokio::io::stdout();
    while let Some(data) = channel.receive().await {
        stdout.write_all(&data).await?;
        stdout.flush().await?;
    }
    Ok(())
}
