//! The on-wire packet and its codec.
//!
//! Wire format of one slot value: ASCII base64 of `nonce(24) || ciphertext`.
//! The ciphertext seals (XChaCha20-Poly1305, 256-bit key) the zlib-deflated
//! bincode serialization of the packet. Both peers must agree on this
//! bit-exactly; the byte ordering inside the blob is not externally visible.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, Key, XChaCha20Poly1305, XNonce};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::constants::{KEY_LEN, NONCE_LEN};
use crate::error::{Error, Result};

/// Which peer a packet is addressed to.
///
/// Both sides poll the same shared slot, so every packet carries its
/// destination; a peer discards packets whose target is not itself. This is
/// what keeps a peer from consuming its own writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Peer {
    Client,
    Server,
}

impl Peer {
    /// The other side of the tunnel.
    pub fn opposite(self) -> Peer {
        match self {
            Peer::Client => Peer::Server,
            Peer::Server => Peer::Client,
        }
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Peer::Client => write!(f, "client"),
            Peer::Server => write!(f, "server"),
        }
    }
}

/// Packet discriminator: application bytes or a channel/tunnel command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketKind {
    Data,
    Control,
}

/// The unit carried in the shared slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Peer that should accept this packet.
    pub target: Peer,
    /// Data or control.
    pub kind: PacketKind,
    /// Opaque bytes; for control packets a printable `CMD` or `CMD:ARG`.
    pub payload: Vec<u8>,
    /// Monotonically increasing per direction, starting at 0.
    pub seq: i64,
    /// Highest consecutive seq accepted from the peer (cumulative ack).
    pub ack: i64,
}

impl Packet {
    /// A data packet addressed to `target`. Sequence and ack are assigned by
    /// the channel loop just before transmission.
    pub fn data(target: Peer, payload: Vec<u8>) -> Packet {
        Packet {
            target,
            kind: PacketKind::Data,
            payload,
            seq: 0,
            ack: 0,
        }
    }

    /// A control packet addressed to `target`.
    pub fn control(target: Peer, command: &str) -> Packet {
        Packet {
            target,
            kind: PacketKind::Control,
            payload: command.as_bytes().to_vec(),
            seq: 0,
            ack: 0,
        }
    }

    /// Split a control payload into `(cmd, arg)`; `arg` is empty when the
    /// payload carries no `:`.
    pub fn control_parts(&self) -> (String, String) {
        let text = String::from_utf8_lossy(&self.payload);
        match text.split_once(':') {
            Some((cmd, arg)) => (cmd.to_string(), arg.to_string()),
            None => (text.into_owned(), String::new()),
        }
    }
}

/// Stateless armoring codec bound to one derived key.
pub struct PacketCodec {
    cipher: XChaCha20Poly1305,
}

impl PacketCodec {
    /// Build a codec around a derived 256-bit key.
    pub fn new(key: &[u8; KEY_LEN]) -> PacketCodec {
        PacketCodec {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// serialize -> deflate -> seal -> armor.
    pub fn encode(&self, packet: &Packet) -> Result<String> {
        let body = bincode::serialize(packet)
            .map_err(|e| Error::codec(format!("cannot serialize packet: {e}")))?;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&body)
            .map_err(|e| Error::codec(format!("cannot compress packet: {e}")))?;
        let compressed = encoder
            .finish()
            .map_err(|e| Error::codec(format!("cannot compress packet: {e}")))?;

        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, compressed.as_ref())
            .map_err(|_| Error::codec("cannot encrypt packet"))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(BASE64.encode(blob))
    }

    /// de-armor -> verify+open -> inflate -> deserialize.
    ///
    /// Every failure mode (bad base64, short blob, bad MAC, bad compression,
    /// bad structure) returns an error the channel loop drops silently; there
    /// is no negative acknowledgement.
    pub fn decode(&self, text: &str) -> Result<Packet> {
        let blob = BASE64
            .decode(text.trim())
            .map_err(|e| Error::codec(format!("cannot decode base64: {e}")))?;
        if blob.len() < NONCE_LEN {
            return Err(Error::codec("blob shorter than nonce"));
        }

        let (nonce, sealed) = blob.split_at(NONCE_LEN);
        let compressed = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), sealed)
            .map_err(|_| Error::codec("cannot decrypt packet"))?;

        let mut body = Vec::new();
        ZlibDecoder::new(&compressed[..])
            .read_to_end(&mut body)
            .map_err(|e| Error::codec(format!("cannot decompress packet: {e}")))?;

        bincode::deserialize(&body)
            .map_err(|e| Error::codec(format!("cannot deserialize packet: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive_key;

    fn codec(password: &str) -> PacketCodec {
        PacketCodec::new(&derive_key(password).unwrap())
    }

    fn sample() -> Packet {
        Packet {
            target: Peer::Server,
            kind: PacketKind::Data,
            payload: b"hello\n".to_vec(),
            seq: 3,
            ack: 2,
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let c = codec("secret");
        let p = sample();
        let blob = c.encode(&p).unwrap();
        assert_eq!(c.decode(&blob).unwrap(), p);
    }

    #[test]
    fn roundtrip_control_packet() {
        let c = codec("secret");
        let p = Packet {
            seq: 9,
            ack: 8,
            ..Packet::control(Peer::Client, "SOCKS-AT:1080")
        };
        let decoded = c.decode(&c.encode(&p).unwrap()).unwrap();
        assert_eq!(decoded, p);
        assert_eq!(
            decoded.control_parts(),
            ("SOCKS-AT".to_string(), "1080".to_string())
        );
    }

    #[test]
    fn nonces_differ_between_encodings() {
        let c = codec("secret");
        let p = sample();
        assert_ne!(c.encode(&p).unwrap(), c.encode(&p).unwrap());
    }

    #[test]
    fn wrong_key_fails_to_decode() {
        let blob = codec("a").encode(&sample()).unwrap();
        assert!(codec("b").decode(&blob).is_err());
    }

    #[test]
    fn garbage_base64_rejected() {
        assert!(codec("secret").decode("not!base64!!").is_err());
    }

    #[test]
    fn short_blob_rejected() {
        // Valid base64, but shorter than a nonce.
        let short = BASE64.encode([0u8; 10]);
        assert!(codec("secret").decode(&short).is_err());
    }

    #[test]
    fn tampered_blob_rejected() {
        let c = codec("secret");
        let blob = c.encode(&sample()).unwrap();
        let mut raw = BASE64.decode(blob).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(c.decode(&BASE64.encode(raw)).is_err());
    }

    #[test]
    fn control_parts_without_arg() {
        let p = Packet::control(Peer::Server, "FIN");
        assert_eq!(p.control_parts(), ("FIN".to_string(), String::new()));
    }
}
