//! Shared configuration for the channel and tunnel layers.

use std::str::FromStr;
use std::time::Duration;

use crate::constants::{DEFAULT_BLOCK_SIZE, DEFAULT_INTERVAL, DEFAULT_PASSWORD};
use crate::error::{Error, Result};

/// Which transport realization carries the shared slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSpec {
    /// The OS clipboard.
    Clipboard,
    /// A spawned command's stdin/stdout.
    Exec(String),
    /// Dial a TCP peer.
    Tcp(String),
    /// Listen and accept a single TCP peer.
    TcpListen(String),
}

impl FromStr for TransportSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<TransportSpec> {
        if s.is_empty() || s == "clipboard" {
            Ok(TransportSpec::Clipboard)
        } else if let Some(cmd) = s.strip_prefix("exec=") {
            Ok(TransportSpec::Exec(cmd.to_string()))
        } else if let Some(addr) = s.strip_prefix("tcp=") {
            Ok(TransportSpec::Tcp(addr.to_string()))
        } else if let Some(addr) = s.strip_prefix("tcp-listen=") {
            Ok(TransportSpec::TcpListen(addr.to_string()))
        } else {
            Err(Error::config(format!("unknown transport method: {s}")))
        }
    }
}

impl std::fmt::Display for TransportSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportSpec::Clipboard => write!(f, "clipboard"),
            TransportSpec::Exec(cmd) => write!(f, "exec={cmd}"),
            TransportSpec::Tcp(addr) => write!(f, "tcp={addr}"),
            TransportSpec::TcpListen(addr) => write!(f, "tcp-listen={addr}"),
        }
    }
}

/// Parse a block size string with an optional `k`/`m` suffix (`64k`, `1m`).
pub fn parse_block_size(arg: &str) -> Result<usize> {
    let arg = arg.trim();
    let (digits, multiplier) = match arg.chars().last() {
        Some('k') | Some('K') => (&arg[..arg.len() - 1], 1024),
        Some('m') | Some('M') => (&arg[..arg.len() - 1], 1024 * 1024),
        Some(c) if c.is_ascii_digit() => (arg, 1),
        _ => {
            return Err(Error::config(format!("unknown blocksize format '{arg}'")));
        }
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::config(format!("unknown blocksize format '{arg}'")));
    }
    digits
        .parse::<usize>()
        .map(|n| n * multiplier)
        .map_err(|e| Error::config(format!("cannot parse blocksize: {e}")))
}

/// Options shared by both peers of a channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Polling interval; every protocol timeout is a multiple of it.
    pub interval: Duration,
    /// Maximum payload bytes carried per packet.
    pub block_size: usize,
    /// Shared password the symmetric key is derived from.
    pub password: String,
    /// Which transport carries the slot.
    pub transport: TransportSpec,
}

impl Default for ChannelConfig {
    fn default() -> ChannelConfig {
        ChannelConfig {
            interval: DEFAULT_INTERVAL,
            block_size: DEFAULT_BLOCK_SIZE,
            password: DEFAULT_PASSWORD.to_string(),
            transport: TransportSpec::Clipboard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_transport_specs() {
        assert_eq!(
            "clipboard".parse::<TransportSpec>().unwrap(),
            TransportSpec::Clipboard
        );
        assert_eq!(
            "exec=nc -l 4000".parse::<TransportSpec>().unwrap(),
            TransportSpec::Exec("nc -l 4000".to_string())
        );
        assert_eq!(
            "tcp=127.0.0.1:4000".parse::<TransportSpec>().unwrap(),
            TransportSpec::Tcp("127.0.0.1:4000".to_string())
        );
        assert_eq!(
            "tcp-listen=0.0.0.0:4000".parse::<TransportSpec>().unwrap(),
            TransportSpec::TcpListen("0.0.0.0:4000".to_string())
        );
    }

    #[test]
    fn empty_spec_is_clipboard() {
        assert_eq!(
            "".parse::<TransportSpec>().unwrap(),
            TransportSpec::Clipboard
        );
    }

    #[test]
    fn unknown_spec_rejected() {
        assert!("udp=1.2.3.4:5".parse::<TransportSpec>().is_err());
    }

    #[test]
    fn block_sizes() {
        assert_eq!(parse_block_size("512").unwrap(), 512);
        assert_eq!(parse_block_size("64k").unwrap(), 64 * 1024);
        assert_eq!(parse_block_size("64K").unwrap(), 64 * 1024);
        assert_eq!(parse_block_size("2m").unwrap(), 2 * 1024 * 1024);
    }

    #[test]
    fn bad_block_sizes_rejected() {
        assert!(parse_block_size("").is_err());
        assert!(parse_block_size("k").is_err());
        assert!(parse_block_size("12g").is_err());
        assert!(parse_block_size("1.5k").is_err());
    }

    #[test]
    fn default_config_matches_cli_defaults() {
        let cfg = ChannelConfig::default();
        assert_eq!(cfg.interval, Duration::from_secs(1));
        assert_eq!(cfg.block_size, 64 * 1024);
        assert_eq!(cfg.password, "cliptun");
        assert_eq!(cfg.transport, TransportSpec::Clipboard);
    }
}
