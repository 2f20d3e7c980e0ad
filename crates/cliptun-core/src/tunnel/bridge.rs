//! Byte shuttle between the channel and the local internal-SSH socket.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::channel::Channel;

/// Spawn the two forwarder tasks that splice `stream` onto `channel`.
///
/// The socket side is read in block-sized chunks under a `4/5 · interval`
/// deadline; silence just loops. Either side failing or reaching EOF closes
/// the channel, which in turn ends the partner task.
pub(super) fn spawn(channel: Channel, stream: TcpStream) {
    let (mut read_half, mut write_half) = stream.into_split();
    let block_size = channel.block_size();
    let deadline = channel.interval() * 4 / 5;

    // socket -> channel
    let outbound = channel.clone();
    tokio::spawn(async move {
        let mut buf = vec![0u8; block_size];
        loop {
            match timeout(deadline, read_half.read(&mut buf)).await {
                Ok(Ok(0)) => {
                    debug!("ssh socket closed, closing channel");
                    outbound.close().await;
                    break;
                }
                Ok(Ok(n)) => outbound.send(buf[..n].to_vec()).await,
                Ok(Err(e)) => {
                    debug!(error = %e, "ssh socket read failed, closing channel");
                    outbound.close().await;
                    break;
                }
                Err(_) => {
                    if outbound.is_closed() {
                        break;
                    }
                }
            }
        }
    });

    // channel -> socket
    tokio::spawn(async move {
        while let Some(data) = channel.receive().await {
            if let Err(e) = write_half.write_all(&data).await {
                debug!(error = %e, "ssh socket write failed, closing channel");
                channel.close().await;
                break;
            }
        }
    });
}
