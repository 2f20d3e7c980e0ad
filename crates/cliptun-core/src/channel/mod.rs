//! The reliable byte-stream peer built on a [`Transport`].
//!
//! One driver task owns all protocol state (sequence numbers, acks, both
//! retransmit buffers) and ticks once per polling interval. The public
//! [`Channel`] handle talks to it only through queues: a bounded outbound
//! queue for `send`, and a waiter queue realizing the delivery rendezvous
//! for `receive`. No locks guard channel state.

mod driver;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::config::ChannelConfig;
use crate::constants::{CLOSE_FLOOR_TICKS, QUEUE_SIZE};
use crate::error::Result;
use crate::keys::derive_key;
use crate::packet::{Packet, PacketCodec, Peer};
use crate::transport::{self, Transport};

use driver::Driver;

/// A control command the channel itself does not understand, forwarded to
/// the layer above (this is how the tunnel adds its own commands).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEvent {
    pub cmd: String,
    pub arg: String,
}

/// Incoming control commands the host layer consumes.
pub type ControlEvents = mpsc::UnboundedReceiver<ControlEvent>;

/// Handle onto a running channel. Cheap to clone; all clones talk to the
/// same driver task.
#[derive(Clone)]
pub struct Channel {
    peer: Peer,
    interval: Duration,
    block_size: usize,
    send_tx: mpsc::Sender<Packet>,
    waiter_tx: mpsc::Sender<oneshot::Sender<Vec<u8>>>,
    cancel_tx: mpsc::Sender<()>,
    closed_rx: watch::Receiver<bool>,
}

impl Channel {
    /// Build the transport named by the config and start the channel over it.
    pub async fn connect(role: Peer, config: ChannelConfig) -> Result<(Channel, ControlEvents)> {
        debug!(transport = %config.transport, "using transport");
        let transport =
            transport::connect(&config.transport, config.block_size, config.interval).await?;
        Channel::with_transport(role, config, transport).await
    }

    /// Start the channel over an already-built transport.
    pub async fn with_transport(
        role: Peer,
        config: ChannelConfig,
        transport: Box<dyn Transport>,
    ) -> Result<(Channel, ControlEvents)> {
        let codec = PacketCodec::new(&derive_key(&config.password)?);

        let (send_tx, send_rx) = mpsc::channel(QUEUE_SIZE);
        let (waiter_tx, waiter_rx) = mpsc::channel(QUEUE_SIZE);
        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let driver = Driver::new(
            transport,
            codec,
            role,
            config.interval,
            send_rx,
            waiter_rx,
            cancel_rx,
            control_tx,
            closed_tx,
        );
        tokio::spawn(driver.run());

        Ok((
            Channel {
                peer: role.opposite(),
                interval: config.interval,
                block_size: config.block_size,
                send_tx,
                waiter_tx,
                cancel_tx,
                closed_rx,
            },
            control_rx,
        ))
    }

    /// Polling interval the channel was built with.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Maximum payload bytes per packet.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Enqueue application bytes for the peer.
    ///
    /// Blocks while the outbound queue is full; never waits for delivery and
    /// never fails (after shutdown the bytes are silently dropped).
    pub async fn send(&self, data: impl Into<Vec<u8>>) {
        let packet = Packet::data(self.peer, data.into());
        if self.send_tx.send(packet).await.is_err() {
            debug!("send after channel shutdown dropped");
        }
    }

    /// Enqueue a control command (`CMD` or `CMD:ARG`) for the peer, ordered
    /// with the data stream.
    pub async fn send_control(&self, command: &str) {
        debug!(command, "sending control packet");
        let packet = Packet::control(self.peer, command);
        if self.send_tx.send(packet).await.is_err() {
            debug!("control send after channel shutdown dropped");
        }
    }

    /// Next in-order non-empty payload, or `None` once the channel has shut
    /// down. Empty payloads (pure ack carriers) never surface here.
    pub async fn receive(&self) -> Option<Vec<u8>> {
        loop {
            let (tx, rx) = oneshot::channel();
            if self.waiter_tx.send(tx).await.is_err() {
                return None;
            }
            match rx.await {
                Ok(payload) if !payload.is_empty() => return Some(payload),
                // Empty handoff: an ack carrier, keep waiting.
                Ok(_) => continue,
                // The driver dropped our waiter; retry unless it is gone.
                Err(_) => {
                    if self.is_closed() {
                        return None;
                    }
                }
            }
        }
    }

    /// Orderly shutdown: send `FIN`, wait the safety floor for the peer's
    /// `FIN-ACK`, then tear down unconditionally.
    pub async fn close(&self) {
        self.send_control("FIN").await;
        tokio::time::sleep(self.interval * CLOSE_FLOOR_TICKS).await;
        // Fail safe if the FIN-ACK never arrived.
        let _ = self.cancel_tx.send(()).await;
    }

    /// Whether the channel has torn down.
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Wait until the channel has torn down.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
