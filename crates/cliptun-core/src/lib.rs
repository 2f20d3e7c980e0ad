//! cliptun-core: reliable, encrypted, duplex byte pipe over a polled shared
//! slot, and the SSH tunnel layer that rides on it.
//!
//! This crate provides:
//! - Transport abstractions over a single read-latest/write-latest slot
//!   (clipboard, child-process stdio, TCP)
//! - The packet codec (serialize, compress, seal, armor)
//! - The channel engine: sequence numbers, piggybacked acks, retransmission
//!   and resync, control packets, orderly shutdown
//! - The tunnel layer: an internal SSH session over the channel exposing
//!   port forwarding, SOCKS, remote execution and SFTP
//! - Logging setup and shared configuration types

pub mod channel;
pub mod config;
pub mod constants;
pub mod error;
pub mod keys;
pub mod logging;
pub mod packet;
pub mod transport;
pub mod tunnel;

pub use channel::{Channel, ControlEvent};
pub use config::{ChannelConfig, TransportSpec};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use packet::{Packet, PacketKind, Peer};
pub use tunnel::{ForwardSpec, Tunnel};
