//! The channel driver: one task, one tick per interval, owning all state.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, trace, warn};

use super::ControlEvent;
use crate::constants::{FIN_ACK_GRACE_TICKS, QUEUE_SIZE, RESYNC_PAUSE_TICKS, STALL_TICKS};
use crate::packet::{Packet, PacketCodec, PacketKind, Peer};
use crate::transport::Transport;

pub(super) struct Driver {
    transport: Box<dyn Transport>,
    codec: PacketCodec,
    own: Peer,
    peer: Peer,
    interval: Duration,

    send_rx: mpsc::Receiver<Packet>,
    waiter_rx: mpsc::Receiver<oneshot::Sender<Vec<u8>>>,
    cancel_rx: mpsc::Receiver<()>,
    control_tx: mpsc::UnboundedSender<ControlEvent>,
    closed_tx: watch::Sender<bool>,

    send_buffer: HashMap<i64, Packet>,
    recv_buffer: HashMap<i64, Packet>,
    last_sent_seq: i64,
    last_recv_seq: i64,
    last_ack_received: i64,
    last_ack_sent: i64,
    last_send_time: Instant,
    last_recv_time: Instant,

    /// Internally generated control packets (FIN-ACK), sent before queued
    /// application traffic.
    pending_control: VecDeque<Packet>,
    /// At-most-once latch for the post-FIN delayed teardown.
    fin_latch: bool,
    teardown_at: Option<Instant>,
    shutdown_now: bool,
}

impl Driver {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        transport: Box<dyn Transport>,
        codec: PacketCodec,
        role: Peer,
        interval: Duration,
        send_rx: mpsc::Receiver<Packet>,
        waiter_rx: mpsc::Receiver<oneshot::Sender<Vec<u8>>>,
        cancel_rx: mpsc::Receiver<()>,
        control_tx: mpsc::UnboundedSender<ControlEvent>,
        closed_tx: watch::Sender<bool>,
    ) -> Driver {
        let now = Instant::now();
        Driver {
            transport,
            codec,
            own: role,
            peer: role.opposite(),
            interval,
            send_rx,
            waiter_rx,
            cancel_rx,
            control_tx,
            closed_tx,
            send_buffer: HashMap::new(),
            recv_buffer: HashMap::new(),
            last_sent_seq: -1,
            last_recv_seq: -1,
            last_ack_received: -1,
            last_ack_sent: -1,
            last_send_time: now,
            last_recv_time: now,
            pending_control: VecDeque::new(),
            fin_latch: false,
            teardown_at: None,
            shutdown_now: false,
        }
    }

    pub(super) async fn run(mut self) {
        loop {
            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = self.cancel_rx.recv() => self.shutdown_now = true,
            }
            if self.shutdown_now {
                break;
            }
            if let Some(at) = self.teardown_at {
                if Instant::now() >= at {
                    break;
                }
            }

            match self.transport.read().await {
                Ok(content) if !content.is_empty() => self.handle_slot(&content).await,
                Ok(_) => {}
                // Non-fatal: a persistent failure simply makes no progress.
                Err(e) => debug!(error = %e, "cannot read from transport"),
            }
            if self.shutdown_now {
                break;
            }

            // Retransmit / resync decision: exactly one packet may be in
            // flight, and it must be acked before anything new goes out.
            if self.last_ack_received < self.last_sent_seq {
                if self.last_send_time.elapsed() > self.interval * STALL_TICKS {
                    self.resync().await;
                } else {
                    debug!("last packet not acknowledged, waiting and trying again");
                }
                continue;
            }

            let Some(mut packet) = self.next_outbound() else {
                continue;
            };

            self.last_sent_seq += 1;
            packet.seq = self.last_sent_seq;
            packet.ack = self.last_recv_seq;
            self.last_ack_sent = self.last_recv_seq;
            self.send_buffer.insert(packet.seq, packet.clone());
            self.transmit(&packet).await;
            self.last_send_time = Instant::now();

            self.evict();
        }
        self.teardown().await;
    }

    /// Pick the next packet to transmit: internal control first, then the
    /// application queue, then a synthesized empty ack if the peer is owed
    /// one.
    fn next_outbound(&mut self) -> Option<Packet> {
        if let Some(packet) = self.pending_control.pop_front() {
            return Some(packet);
        }
        if let Ok(packet) = self.send_rx.try_recv() {
            return Some(packet);
        }
        if self.last_ack_sent < self.last_recv_seq {
            debug!("acknowledgement outstanding, sending empty packet");
            return Some(Packet::data(self.peer, Vec::new()));
        }
        None
    }

    async fn handle_slot(&mut self, content: &str) {
        let packet = match self.codec.decode(content) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(error = %e, "cannot read packet from slot");
                return;
            }
        };
        // Our own echo, or noise for the other side.
        if packet.target != self.own {
            return;
        }

        if packet.ack > self.last_ack_received {
            self.last_ack_received = packet.ack;
        }

        if packet.seq == self.last_recv_seq + 1 {
            self.last_recv_seq += 1;
            self.recv_buffer.insert(packet.seq, packet.clone());
            self.last_recv_time = Instant::now();
            match packet.kind {
                PacketKind::Control => self.process_control(&packet),
                PacketKind::Data => self.deliver(packet.payload).await,
            }
        }
        // Out of order or duplicate: silently dropped, no state change.

        trace!(
            last_recv_seq = self.last_recv_seq,
            last_sent_seq = self.last_sent_seq,
            last_ack_received = self.last_ack_received,
            last_recv_age_ms = self.last_recv_time.elapsed().as_millis() as u64,
            slot_bytes = content.len(),
            "tick"
        );
    }

    /// Hand an accepted payload to the application.
    ///
    /// Non-empty payloads block until a consumer is waiting; this is the
    /// backpressure that stops our ack from advancing while the application
    /// stalls. Empty payloads are pure ack carriers and must never block.
    async fn deliver(&mut self, payload: Vec<u8>) {
        if payload.is_empty() {
            // Offer to an already-waiting consumer only; skip waiters whose
            // receive was cancelled in the meantime.
            while let Ok(waiter) = self.waiter_rx.try_recv() {
                if waiter.send(Vec::new()).is_ok() {
                    break;
                }
            }
            return;
        }
        let mut payload = payload;
        loop {
            tokio::select! {
                waiter = self.waiter_rx.recv() => match waiter {
                    Some(waiter) => match waiter.send(payload) {
                        Ok(()) => break,
                        // Stale waiter (cancelled receive); hand the payload
                        // to the next one.
                        Err(returned) => payload = returned,
                    },
                    // All handles dropped; nobody left to deliver to.
                    None => break,
                },
                _ = self.cancel_rx.recv() => {
                    self.shutdown_now = true;
                    break;
                }
            }
        }
    }

    fn process_control(&mut self, packet: &Packet) {
        let (cmd, arg) = packet.control_parts();
        debug!(cmd = %cmd, arg = %arg, "received control packet");
        match cmd.as_str() {
            "FIN" => {
                self.pending_control
                    .push_back(Packet::control(self.peer, "FIN-ACK"));
                if !self.fin_latch {
                    self.fin_latch = true;
                    self.teardown_at =
                        Some(Instant::now() + self.interval * FIN_ACK_GRACE_TICKS);
                }
            }
            "FIN-ACK" => self.shutdown_now = true,
            _ => {
                if self.control_tx.send(ControlEvent { cmd, arg }).is_err() {
                    error!("control packet received, but no consumer attached");
                }
            }
        }
    }

    /// Recover from a stalled slot. Both peers may be staring at their own
    /// last write; overwriting the slot with a non-packet value makes both
    /// reads return "nothing new" before the retransmit. The random sleep
    /// keeps the two sides from resetting in lockstep.
    async fn resync(&mut self) {
        warn!("out of sync, trying to resync");
        let jitter = rand::thread_rng().gen_range(0..STALL_TICKS);
        sleep(self.interval * jitter).await;
        debug!("resetting transport");
        self.transport.reset().await;
        sleep(self.interval * RESYNC_PAUSE_TICKS).await;
        self.last_send_time = Instant::now();
        if let Some(packet) = self.send_buffer.get(&self.last_sent_seq) {
            let packet = packet.clone();
            self.transmit(&packet).await;
        }
    }

    async fn transmit(&mut self, packet: &Packet) {
        match self.codec.encode(packet) {
            Ok(blob) => {
                if let Err(e) = self.transport.write(&blob).await {
                    error!(error = %e, "cannot write to transport");
                }
            }
            Err(e) => error!(error = %e, "cannot send packet"),
        }
    }

    fn evict(&mut self) {
        let window = QUEUE_SIZE as i64;
        if self.last_recv_seq >= window {
            self.recv_buffer.remove(&(self.last_recv_seq - window));
        }
        if self.last_sent_seq >= window {
            self.send_buffer.remove(&(self.last_sent_seq - window));
        }
    }

    async fn teardown(&mut self) {
        debug!("tearing down channel");
        let _ = self.transport.write("").await;
        let _ = self.closed_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive_key;
    use crate::transport::MemorySlot;

    fn test_driver(role: Peer) -> (Driver, mpsc::Sender<oneshot::Sender<Vec<u8>>>) {
        let slot = MemorySlot::new();
        let (transport, _) = slot.pair();
        let codec = PacketCodec::new(&derive_key("secret").unwrap());
        let (_send_tx, send_rx) = mpsc::channel(QUEUE_SIZE);
        let (waiter_tx, waiter_rx) = mpsc::channel(QUEUE_SIZE);
        let (_cancel_tx, cancel_rx) = mpsc::channel(1);
        let (control_tx, _control_rx) = mpsc::unbounded_channel();
        let (closed_tx, _closed_rx) = watch::channel(false);
        let driver = Driver::new(
            Box::new(transport),
            codec,
            role,
            Duration::from_millis(10),
            send_rx,
            waiter_rx,
            cancel_rx,
            control_tx,
            closed_tx,
        );
        (driver, waiter_tx)
    }

    fn encoded(driver: &Driver, packet: &Packet) -> String {
        driver.codec.encode(packet).unwrap()
    }

    fn data_packet(target: Peer, payload: &[u8], seq: i64, ack: i64) -> Packet {
        Packet {
            seq,
            ack,
            ..Packet::data(target, payload.to_vec())
        }
    }

    #[tokio::test]
    async fn accepts_only_next_in_order_seq() {
        let (mut driver, waiter_tx) = test_driver(Peer::Server);

        // seq 1 before seq 0: dropped, no state change, no delivery.
        let blob = encoded(&driver, &data_packet(Peer::Server, b"x", 1, -1));
        driver.handle_slot(&blob).await;
        assert_eq!(driver.last_recv_seq, -1);

        let (tx, rx) = oneshot::channel();
        waiter_tx.send(tx).await.unwrap();
        let blob = encoded(&driver, &data_packet(Peer::Server, b"x", 0, -1));
        driver.handle_slot(&blob).await;
        assert_eq!(driver.last_recv_seq, 0);
        assert_eq!(rx.await.unwrap(), b"x".to_vec());
    }

    #[tokio::test]
    async fn duplicate_packet_dropped_without_state_change() {
        let (mut driver, waiter_tx) = test_driver(Peer::Server);
        let blob = encoded(&driver, &data_packet(Peer::Server, b"dup", 0, -1));

        let (tx, rx) = oneshot::channel();
        waiter_tx.send(tx).await.unwrap();
        driver.handle_slot(&blob).await;
        assert_eq!(driver.last_recv_seq, 0);
        assert_eq!(rx.await.unwrap(), b"dup".to_vec());

        // Same slot value read again: rejected by the seq check.
        let (tx, mut rx) = oneshot::channel();
        waiter_tx.send(tx).await.unwrap();
        driver.handle_slot(&blob).await;
        driver.handle_slot(&blob).await;
        assert_eq!(driver.last_recv_seq, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn packets_for_the_peer_are_ignored() {
        let (mut driver, _waiter_tx) = test_driver(Peer::Server);
        // Addressed to the client, i.e. our own echo.
        let blob = encoded(&driver, &data_packet(Peer::Client, b"echo", 0, 5));
        driver.handle_slot(&blob).await;
        assert_eq!(driver.last_recv_seq, -1);
        assert_eq!(driver.last_ack_received, -1);
    }

    #[tokio::test]
    async fn ack_is_monotonic() {
        let (mut driver, waiter_tx) = test_driver(Peer::Server);
        let (tx, _rx) = oneshot::channel();
        waiter_tx.send(tx).await.unwrap();

        let blob = encoded(&driver, &data_packet(Peer::Server, b"a", 0, 7));
        driver.handle_slot(&blob).await;
        assert_eq!(driver.last_ack_received, 7);

        // An older ack on a stale packet must not move it backwards.
        let blob = encoded(&driver, &data_packet(Peer::Server, b"b", 0, 3));
        driver.handle_slot(&blob).await;
        assert_eq!(driver.last_ack_received, 7);
    }

    #[tokio::test]
    async fn undecodable_slot_content_is_dropped() {
        let (mut driver, _waiter_tx) = test_driver(Peer::Server);
        driver.handle_slot("1234567890").await;
        driver.handle_slot("!! not a packet !!").await;
        assert_eq!(driver.last_recv_seq, -1);
    }

    #[tokio::test]
    async fn fin_schedules_delayed_teardown_once() {
        let (mut driver, _waiter_tx) = test_driver(Peer::Server);
        let fin = Packet {
            seq: 0,
            ack: -1,
            ..Packet::control(Peer::Server, "FIN")
        };
        let blob = encoded(&driver, &fin);
        driver.handle_slot(&blob).await;
        assert!(driver.fin_latch);
        let first_deadline = driver.teardown_at;
        assert!(first_deadline.is_some());
        assert_eq!(driver.pending_control.len(), 1);

        // A retransmitted FIN (next seq) answers again but does not re-arm.
        let fin2 = Packet {
            seq: 1,
            ack: -1,
            ..Packet::control(Peer::Server, "FIN")
        };
        let blob = encoded(&driver, &fin2);
        driver.handle_slot(&blob).await;
        assert_eq!(driver.teardown_at, first_deadline);
    }

    #[tokio::test]
    async fn fin_ack_shuts_down_immediately() {
        let (mut driver, _waiter_tx) = test_driver(Peer::Client);
        let fin_ack = Packet {
            seq: 0,
            ack: -1,
            ..Packet::control(Peer::Client, "FIN-ACK")
        };
        let blob = encoded(&driver, &fin_ack);
        driver.handle_slot(&blob).await;
        assert!(driver.shutdown_now);
    }

    #[tokio::test]
    async fn empty_payload_never_blocks_delivery() {
        let (mut driver, _waiter_tx) = test_driver(Peer::Server);
        // No waiter parked: an empty payload must be dropped, not awaited.
        let blob = encoded(&driver, &data_packet(Peer::Server, b"", 0, -1));
        driver.handle_slot(&blob).await;
        assert_eq!(driver.last_recv_seq, 0);
    }
}
