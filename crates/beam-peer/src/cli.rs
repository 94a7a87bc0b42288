use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "beam")]
#[command(about = "Send files straight to peers found through a Beam registry", long_about = None)]
pub struct Cli {
    /// Registry server, e.g. ws://127.0.0.1:3000
    #[arg(long, env = "BEAM_SERVER", default_value = "ws://127.0.0.1:3000")]
    pub server: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the peers currently registered.
    Peers,

    /// Send a file to one or more peers.
    Send {
        file: PathBuf,

        #[arg(required = true)]
        targets: Vec<String>,

        /// Bytes per chunk (capped at 64 KiB).
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Seconds to wait for each recipient's ready. 0 waits forever.
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },

    /// Register and save every file sent to this peer.
    Receive {
        /// Address to accept transfers on.
        #[arg(long, default_value = "0.0.0.0:7400")]
        listen: String,

        /// Identifier to register under. Must be host:port reachable by
        /// senders; defaults to the listen address.
        #[arg(long)]
        name: Option<String>,

        #[arg(long, short, default_value = ".")]
        out: PathBuf,

        /// Exit after the first completed transfer.
        #[arg(long)]
        once: bool,
    },
}
