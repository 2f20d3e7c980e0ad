//! Two-peer channel tests over an in-process shared slot.
//!
//! The memory slot behaves like a clipboard: both peers poll it, reads keep
//! returning the current value until someone overwrites it, and writes
//! clobber whatever was there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use cliptun_core::channel::Channel;
use cliptun_core::config::ChannelConfig;
use cliptun_core::packet::Peer;
use cliptun_core::transport::{MemorySlot, Transport};

const INTERVAL: Duration = Duration::from_millis(20);
const DEADLINE: Duration = Duration::from_secs(5);

fn config(password: &str) -> ChannelConfig {
    ChannelConfig {
        interval: INTERVAL,
        block_size: 64 * 1024,
        password: password.to_string(),
        ..ChannelConfig::default()
    }
}

async fn channel_pair(password_client: &str, password_server: &str) -> (Channel, Channel) {
    let slot = MemorySlot::new();
    let (client_side, server_side) = slot.pair();
    let (client, _client_events) = Channel::with_transport(
        Peer::Client,
        config(password_client),
        Box::new(client_side),
    )
    .await
    .unwrap();
    let (server, _server_events) = Channel::with_transport(
        Peer::Server,
        config(password_server),
        Box::new(server_side),
    )
    .await
    .unwrap();
    (client, server)
}

#[tokio::test(flavor = "multi_thread")]
async fn round_trip_both_directions() {
    let (client, server) = channel_pair("secret", "secret").await;

    client.send(b"hello\n".to_vec()).await;
    let got = timeout(DEADLINE, server.receive()).await.unwrap().unwrap();
    assert_eq!(got, b"hello\n");

    server.send(b"world\n".to_vec()).await;
    let got = timeout(DEADLINE, client.receive()).await.unwrap().unwrap();
    assert_eq!(got, b"world\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn byte_stream_fidelity_across_many_packets() {
    let (client, server) = channel_pair("secret", "secret").await;

    let chunks: Vec<&[u8]> = vec![b"one ", b"two ", b"three ", b"four ", b"five"];
    let expected: Vec<u8> = chunks.concat();

    let sender = {
        let client = client.clone();
        let chunks: Vec<Vec<u8>> = chunks.iter().map(|c| c.to_vec()).collect();
        tokio::spawn(async move {
            for chunk in chunks {
                client.send(chunk).await;
            }
        })
    };

    let mut delivered = Vec::new();
    while delivered.len() < expected.len() {
        let payload = timeout(DEADLINE, server.receive()).await.unwrap().unwrap();
        delivered.extend_from_slice(&payload);
    }
    sender.await.unwrap();

    // In-order, no gaps, no duplicates.
    assert_eq!(delivered, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_slot_reads_deliver_once() {
    let (client, server) = channel_pair("secret", "secret").await;

    client.send(b"only once".to_vec()).await;
    let got = timeout(DEADLINE, server.receive()).await.unwrap().unwrap();
    assert_eq!(got, b"only once");

    // The slot keeps returning the same blob every tick until the server's
    // own ack overwrites it; no second delivery may happen.
    let second = timeout(INTERVAL * 10, server.receive()).await;
    assert!(second.is_err(), "duplicate packet must not be delivered");
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_payloads_do_not_surface() {
    let (client, server) = channel_pair("secret", "secret").await;

    client.send(Vec::new()).await;
    client.send(b"visible".to_vec()).await;

    let got = timeout(DEADLINE, server.receive()).await.unwrap().unwrap();
    assert_eq!(got, b"visible");
}

#[tokio::test(flavor = "multi_thread")]
async fn key_mismatch_delivers_nothing() {
    let (client, server) = channel_pair("a", "b").await;

    client.send(b"sealed".to_vec()).await;
    let got = timeout(INTERVAL * 20, server.receive()).await;
    assert!(got.is_err(), "mismatched keys must not deliver data");
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_close_terminates_both_sides() {
    let (client, server) = channel_pair("secret", "secret").await;

    // Exchange one payload so both sides have live state.
    client.send(b"ping".to_vec()).await;
    timeout(DEADLINE, server.receive()).await.unwrap().unwrap();

    let closer = {
        let client = client.clone();
        tokio::spawn(async move { client.close().await })
    };

    // The closing side terminates within its safety floor (plus slack for
    // polling granularity); the peer follows 6 ticks after seeing the FIN.
    timeout(INTERVAL * 12, client.closed()).await.unwrap();
    timeout(INTERVAL * 16, server.closed()).await.unwrap();
    closer.await.unwrap();
    assert!(client.is_closed());
    assert!(server.is_closed());
}

/// Transport wrapper that swallows the first regular write, simulating a
/// lost transmission.
struct LossyTransport<T> {
    inner: T,
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl<T: Transport> Transport for LossyTransport<T> {
    async fn read(&mut self) -> cliptun_core::Result<String> {
        self.inner.read().await
    }

    async fn write(&mut self, text: &str) -> cliptun_core::Result<()> {
        if !text.is_empty() && !self.dropped.swap(true, Ordering::SeqCst) {
            // First packet vanishes into the void.
            return Ok(());
        }
        self.inner.write(text).await
    }

    async fn reset(&mut self) {
        self.inner.reset().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_transmission_recovers_via_resync() {
    let slot = MemorySlot::new();
    let (client_side, server_side) = slot.pair();
    let lossy = LossyTransport {
        inner: client_side,
        dropped: Arc::new(AtomicBool::new(false)),
    };

    let (client, _ce) = Channel::with_transport(Peer::Client, config("secret"), Box::new(lossy))
        .await
        .unwrap();
    let (server, _se) =
        Channel::with_transport(Peer::Server, config("secret"), Box::new(server_side))
            .await
            .unwrap();

    client.send(b"recovered".to_vec()).await;

    // Stall detection takes 4 ticks, jitter up to 3, reset pause 3, plus
    // delivery; well inside the generous deadline.
    let got = timeout(DEADLINE, server.receive()).await.unwrap().unwrap();
    assert_eq!(got, b"recovered");
}
