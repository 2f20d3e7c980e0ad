//! Command-line argument parsing.

use std::time::Duration;

use clap::{Parser, Subcommand};

use cliptun_core::config::{parse_block_size, ChannelConfig};
use cliptun_core::Result;

/// cliptun: create a tunnel using a synchronized clipboard.
#[derive(Debug, Parser)]
#[command(name = "cliptun", version, about)]
pub struct Cli {
    /// Interval to check for clipboard changes / interact with transport
    #[arg(
        short = 'i',
        long,
        global = true,
        default_value = "1s",
        value_parser = parse_duration
    )]
    pub interval: Duration,

    /// Max data sent per packet via transport
    #[arg(short = 'b', long, global = true, default_value = "64k")]
    pub blocksize: String,

    /// Password for encrypting the tunnel
    #[arg(short = 'p', long, global = true, default_value = "cliptun")]
    pub password: String,

    /// Transport for tunnel (clipboard|exec=<cmd>|tcp-listen=<addr>:<port>|tcp=<addr>:<port>)
    #[arg(short = 't', long, global = true, default_value = "clipboard")]
    pub transport: String,

    /// Enable debug output
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Trace packets read/written to transport
    #[arg(long, global = true)]
    pub trace: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start network client allowing to initiate port forwardings
    Client {
        /// Forward local port to remote host and port (LPORT:RHOST:RPORT)
        #[arg(long = "fwd-local", value_name = "LPORT:RHOST:RPORT")]
        fwd_local: Vec<String>,

        /// Forward remote port to local host and port (RPORT:LHOST:LPORT)
        #[arg(long = "fwd-remote", value_name = "RPORT:LHOST:LPORT")]
        fwd_remote: Vec<String>,

        /// Start SOCKS5 server on the given port
        #[arg(long, value_name = "PORT")]
        socks: Option<u16>,
    },
    /// Start network server
    Server,
    /// Execute a command and connect STDIN/STDOUT
    Exec {
        /// Command to execute
        command: String,
    },
    /// Read all data from STDIN
    Stdin,
    /// Write all received data to STDOUT
    Stdout,
    /// Read from STDIN (line by line)
    Readline,
}

impl Cli {
    /// Channel configuration from the common flags. Fatal at startup when a
    /// flag does not parse.
    pub fn channel_config(&self) -> Result<ChannelConfig> {
        Ok(ChannelConfig {
            interval: self.interval,
            block_size: parse_block_size(&self.blocksize)?,
            password: self.password.clone(),
            transport: self.transport.parse()?,
        })
    }
}

/// Parse a duration like `500ms`, `1s`, `1.5s` or `2m`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let (number, unit) = if let Some(v) = s.strip_suffix("ms") {
        (v, 1.0)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1000.0)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60_000.0)
    } else {
        return Err(format!("missing unit in duration '{s}' (ms, s, m)"));
    };

    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration '{s}'"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("invalid duration '{s}'"));
    }
    Ok(Duration::from_millis((value * unit).round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn durations_require_a_unit() {
        assert!(parse_duration("100").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn channel_config_from_defaults() {
        let cli = Cli::parse_from(["cliptun", "server"]);
        let config = cli.channel_config().unwrap();
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.block_size, 64 * 1024);
        assert_eq!(config.password, "cliptun");
    }

    #[test]
    fn client_flags_parse() {
        let cli = Cli::parse_from([
            "cliptun",
            "client",
            "-i",
            "100ms",
            "--fwd-local",
            "9000:example:80",
            "--socks",
            "1080",
        ]);
        assert_eq!(cli.interval, Duration::from_millis(100));
        match cli.command {
            Command::Client {
                fwd_local, socks, ..
            } => {
                assert_eq!(fwd_local, vec!["9000:example:80".to_string()]);
                assert_eq!(socks, Some(1080));
            }
            _ => panic!("expected client subcommand"),
        }
    }
}
