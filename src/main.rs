//! nmx - newt management client
//!
//! One-shot device management commands over UDP.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use nmx_client::{TxOptions, UdpSession, UdpSessionConfig};
use nmx_protocol::{Correlators, DEFAULT_UDP_PORT};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nmx")]
#[command(about = "Manage a device over the newt management protocol")]
#[command(version)]
struct Cli {
    /// Device address [default: 127.0.0.1:1337, env: NMX_UDP_PEER]
    #[arg(short, long)]
    peer: Option<SocketAddr>,

    /// Maximum number of attempts per transaction
    #[arg(short, long)]
    tries: Option<u32>,

    /// Per-attempt response timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Pause between attempts in milliseconds
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

fn default_peer() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_UDP_PORT))
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send text to the device and print the echoed reply
    Echo {
        /// Text to echo
        text: String,
    },

    /// Echo through the pepp group
    #[command(name = "testpep")]
    TestPep {
        /// Text to echo
        text: String,
    },

    /// Reboot the device
    Reset,

    /// Access a CoAP resource
    Res {
        #[command(subcommand)]
        cmd: ResCommands,
    },
}

#[derive(Subcommand)]
pub enum ResCommands {
    /// Read a resource
    Get {
        /// Resource path, e.g. /sensor/temp
        path: String,
    },

    /// Write a JSON object to a resource as a CBOR map
    Put {
        path: String,

        /// JSON object (or @file.json to read from file)
        value: String,
    },

    /// Post raw data to a resource
    Post {
        path: String,

        /// Data (or @file to read from file)
        data: String,
    },

    /// Delete a resource
    Delete { path: String },
}

impl Cli {
    /// Defaults, then `NMX_UDP_*` variables, then flags.
    fn udp_config(&self) -> UdpSessionConfig {
        let mut config = UdpSessionConfig::new(default_peer());
        config.apply_env_overrides();
        if let Some(peer) = self.peer {
            config.peer = peer;
        }
        config
    }

    /// Defaults, then `NMX_*` variables, then flags.
    fn tx_options(&self) -> TxOptions {
        let mut opts = TxOptions::new();
        opts.apply_env_overrides();
        if let Some(tries) = self.tries {
            opts = opts.with_tries(tries);
        }
        if let Some(ms) = self.timeout_ms {
            opts = opts.with_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.retry_delay_ms {
            opts = opts.with_retry_delay(Duration::from_millis(ms));
        }
        opts
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let opts = cli.tx_options();
    opts.validate()?;

    let config = cli.udp_config();
    tracing::debug!("peer {} tries={} timeout={:?}", config.peer, opts.tries, opts.timeout);

    let session = UdpSession::open(config, Correlators::new())
        .await
        .map_err(|e| {
            eprintln!("{}: {}", "Failed to open session".red(), e);
            e
        })?;

    let result = commands::execute(&session, &opts, cli.command).await;
    session.close();

    match result {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}
