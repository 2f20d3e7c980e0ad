//! `cliptun exec`: wire a spawned command's stdio to a plain channel.

use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use cliptun_core::config::ChannelConfig;
use cliptun_core::error::Error;
use cliptun_core::packet::Peer;
use cliptun_core::Channel;
use cliptun_core::Result;

use crate::signals;

pub async fn run(config: ChannelConfig, command: String) -> Result<()> {
    if command.is_empty() {
        return Err(Error::Config {
            message: "no command given".to_string(),
        });
    }

    let block_size = config.block_size;
    let read_deadline = config.interval * 4 / 5;
    let (channel, _events) = Channel::connect(Peer::Server, config).await?;
    signals::install(channel.clone());

    let args = shell_words_split(&command)?;
    let mut child = tokio::process::Command::new(&args[0])
        .args(&args[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Config {
            message: format!("cannot start command: {e}"),
        })?;

    let mut stdin = child.stdin.take().ok_or_else(|| Error::Config {
        message: "cannot access stdin of command".to_string(),
    })?;
    let mut stdout = child.stdout.take().ok_or_else(|| Error::Config {
        message: "cannot access stdout of command".to_string(),
    })?;

    // channel -> command stdin
    let inbound = channel.clone();
    tokio::spawn(async move {
        while let Some(data) = inbound.receive().await {
            debug!(bytes = data.len(), "got data");
            if stdin.write_all(&data).await.is_err() {
                break;
            }
        }
    });

    // command stdout -> channel
    let outbound = channel.clone();
    tokio::spawn(async move {
        let mut buf = vec![0u8; block_size];
        loop {
            match timeout(read_deadline, stdout.read(&mut buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) => break,
                Ok(Ok(n)) => outbound.send(buf[..n].to_vec()).await,
                Err(_) => {
                    if outbound.is_closed() {
                        break;
                    }
                }
            }
        }
    });

    // Command exit closes the channel.
    let closer = channel.clone();
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => debug!(%status, "program terminated"),
            Err(e) => debug!(error = %e, "program terminated with error"),
        }
        closer.close().await;
    });

    channel.closed().await;
    Ok(())
}

fn shell_words_split(command: &str) -> Result<Vec<String>> {
    let args = shell_words::split(command).map_err(|e| Error::Config {
        message: format!("cannot parse command: {e}"),
    })?;
    if args.is_empty() {
        return Err(Error::Config {
            message: "no command given".to_string(),
        });
    }
    Ok(args)
}
