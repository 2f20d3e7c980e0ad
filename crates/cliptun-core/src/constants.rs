//! Protocol and configuration constants for cliptun.

use std::time::Duration;

// =============================================================================
// Reliability protocol
// =============================================================================

/// Depth of the send/receive retransmit buffers and of the outbound queue.
///
/// The sender never advances its sequence number past
/// `ack_received + QUEUE_SIZE - 1`, so the retransmit buffer always still
/// holds every unacknowledged packet.
pub const QUEUE_SIZE: usize = 16;

/// Ticks without an ack before the sender declares a stall and resyncs.
pub const STALL_TICKS: u32 = 4;

/// Ticks to wait after a transport reset before retransmitting.
pub const RESYNC_PAUSE_TICKS: u32 = 3;

/// Ticks a peer waits after answering `FIN` before tearing down.
pub const FIN_ACK_GRACE_TICKS: u32 = 6;

/// Safety floor: ticks `close()` waits for a `FIN-ACK` before tearing down
/// unconditionally.
pub const CLOSE_FLOOR_TICKS: u32 = 8;

// =============================================================================
// Key derivation and sealing
// =============================================================================

/// Static KDF salt; both peers must derive the identical key.
pub const KDF_SALT: &[u8; 8] = b"cliptun\0";

/// PBKDF2-HMAC-SHA256 iteration count.
pub const KDF_ITERATIONS: u32 = 4096;

/// Symmetric key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// AEAD nonce length in bytes (192 bits), prepended to each ciphertext.
pub const NONCE_LEN: usize = 24;

// =============================================================================
// Defaults and timing
// =============================================================================

/// Default polling interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Default maximum payload carried per packet (64 KiB).
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default tunnel password.
pub const DEFAULT_PASSWORD: &str = "cliptun";

/// Read deadline for individual socket reads inside the transports.
pub const NET_TIMEOUT: Duration = Duration::from_millis(50);

// =============================================================================
// Internal SSH session
// =============================================================================

/// Fixed username of the internal SSH session. Secures nothing on its own;
/// confidentiality comes from the outer authenticated encryption.
pub const SSH_USER: &str = "cliptun";

/// Fixed password of the internal SSH session.
pub const SSH_PASSWORD: &str = "cliptun";
