use std::path::PathBuf;

use clap::Parser;

/// Command-line configuration for one node process. No environment variables
/// are consulted.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Host name used for the node's identity and advertised address
    #[arg(long, default_value = "localhost")]
    pub hostname: String,

    /// TCP port to listen on; part of the node's identity
    #[arg(long)]
    pub port: u16,

    /// Append diagnostics to this file instead of stderr
    #[arg(long)]
    pub logfile: Option<PathBuf>,
}

impl Config {
    /// The `host:port` identity this node hashes onto the ring and
    /// advertises to peers.
    pub fn advertised_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}
