//! OS clipboard as the shared slot.

use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::Transport;
use crate::error::{Error, Result};

/// Clipboard-backed transport.
///
/// Holds the platform clipboard handle for the lifetime of the channel; on
/// X11 the written content stays available only while an owner is alive.
pub struct ClipboardTransport {
    clipboard: arboard::Clipboard,
}

impl ClipboardTransport {
    pub fn new() -> Result<ClipboardTransport> {
        let clipboard = arboard::Clipboard::new()
            .map_err(|e| Error::transport(format!("cannot open clipboard: {e}")))?;
        Ok(ClipboardTransport { clipboard })
    }
}

#[async_trait]
impl Transport for ClipboardTransport {
    async fn read(&mut self) -> Result<String> {
        // An empty or non-text clipboard is "nothing new", not an error.
        match self.clipboard.get_text() {
            Ok(text) => Ok(text),
            Err(arboard::Error::ContentNotAvailable) => Ok(String::new()),
            Err(e) => Err(Error::transport(format!("cannot read clipboard: {e}"))),
        }
    }

    async fn write(&mut self, text: &str) -> Result<()> {
        self.clipboard
            .set_text(text)
            .map_err(|e| Error::transport(format!("cannot write clipboard: {e}")))
    }

    async fn reset(&mut self) {
        // A bare timestamp cannot be mistaken for an armored packet.
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        if let Err(e) = self.clipboard.set_text(nanos.to_string()) {
            debug!(error = %e, "clipboard reset failed");
        }
    }
}
