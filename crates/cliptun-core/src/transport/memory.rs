//! In-process shared slot for tests.
//!
//! Two handles over one mutex-guarded string behave like a clipboard shared
//! by both peers: reads return the current value (possibly unchanged since
//! the last read), writes overwrite it.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use super::Transport;
use crate::error::Result;

/// The shared slot both [`MemoryTransport`] handles poll and overwrite.
#[derive(Clone, Default)]
pub struct MemorySlot {
    value: Arc<Mutex<String>>,
}

impl MemorySlot {
    pub fn new() -> MemorySlot {
        MemorySlot::default()
    }

    /// A pair of transports over this slot, one per peer.
    pub fn pair(&self) -> (MemoryTransport, MemoryTransport) {
        (
            MemoryTransport { slot: self.clone() },
            MemoryTransport { slot: self.clone() },
        )
    }

    /// Current slot content (test inspection).
    pub fn peek(&self) -> String {
        self.value.lock().expect("slot poisoned").clone()
    }
}

/// One peer's handle onto a [`MemorySlot`].
pub struct MemoryTransport {
    slot: MemorySlot,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn read(&mut self) -> Result<String> {
        Ok(self.slot.peek())
    }

    async fn write(&mut self, text: &str) -> Result<()> {
        *self.slot.value.lock().expect("slot poisoned") = text.to_string();
        Ok(())
    }

    async fn reset(&mut self) {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let _ = self.write(&nanos.to_string()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn both_handles_see_the_same_slot() {
        let slot = MemorySlot::new();
        let (mut a, mut b) = slot.pair();
        a.write("from a").await.unwrap();
        assert_eq!(b.read().await.unwrap(), "from a");
        // Unchanged slot keeps returning the same value, like a clipboard.
        assert_eq!(b.read().await.unwrap(), "from a");
        b.write("from b").await.unwrap();
        assert_eq!(a.read().await.unwrap(), "from b");
    }

    #[tokio::test]
    async fn reset_replaces_content_with_non_packet_value() {
        let slot = MemorySlot::new();
        let (mut a, _b) = slot.pair();
        a.write("packet").await.unwrap();
        a.reset().await;
        let value = slot.peek();
        assert_ne!(value, "packet");
        assert!(value.chars().all(|c| c.is_ascii_digit()));
    }
}
