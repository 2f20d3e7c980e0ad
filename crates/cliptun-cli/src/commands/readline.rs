//! `cliptun readline`: line-oriented endpoint.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use cliptun_core::config::ChannelConfig;
use cliptun_core::packet::Peer;
use cliptun_core::Channel;
use cliptun_core::Result;

use crate::signals;

pub async fn run(config: ChannelConfig) -> Result<()> {
    let (channel, _events) = Channel::connect(Peer::Client, config).await?;
    signals::install(channel.clone());

    // Print everything the peer sends.
    let inbound = channel.clone();
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(data) = inbound.receive().await {
            if stdout.write_all(&data).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(mut line)) = lines.next_line().await {
        line.push('\n');
        channel.send(line.into_bytes()).await;
    }

    channel.close().await;
    channel.closed().await;
    Ok(())
}
