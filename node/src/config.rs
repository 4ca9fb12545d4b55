// Node configuration: CLI args and runtime configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// storagesync -- content-addressed file replication node
#[derive(Parser, Debug)]
#[command(author, version, about = "Content-addressed file replication node", long_about = None)]
pub struct Cli {
    /// Storage root directory (holds the headers/descriptors/parts tables)
    #[arg(long, global = true, default_value = "./data")]
    pub storage_root: PathBuf,

    /// Enable verbose logging (overrides RUST_LOG if set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the node: open the tables, join the gossip overlay, start the scheduler
    Run(RunArgs),

    /// Remove a file's headers, descriptor, and parts from storage
    Purge(PurgeArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// P2P listen address (multiaddr)
    #[arg(long, default_value = "/ip4/0.0.0.0/tcp/4001")]
    pub listen_addr: String,

    /// Bootstrap peers (multiaddr format), dialed once at startup
    #[arg(long)]
    pub bootnodes: Vec<String>,

    /// Scheduler tick interval override, in seconds
    #[arg(long, default_value = "1")]
    pub tick_interval_secs: u64,

    /// Header probe cadence override, in seconds
    #[arg(long, default_value = "60")]
    pub header_probe_interval_secs: u64,

    /// Part fetch cadence override, in seconds
    #[arg(long, default_value = "30")]
    pub part_fetch_interval_secs: u64,

    /// Reconcile cadence override, in seconds
    #[arg(long, default_value = "60")]
    pub reconcile_interval_secs: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct PurgeArgs {
    /// File digest to purge, as 64 hex characters
    pub file_digest: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_defaults() {
        let cli = Cli::parse_from(["storagesync", "run"]);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.listen_addr, "/ip4/0.0.0.0/tcp/4001");
                assert!(args.bootnodes.is_empty());
                assert_eq!(args.tick_interval_secs, 1);
            }
            Command::Purge(_) => panic!("expected Run"),
        }
    }

    #[test]
    fn parses_purge_with_digest() {
        let cli = Cli::parse_from([
            "storagesync",
            "purge",
            "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef",
        ]);
        match cli.command {
            Command::Purge(args) => {
                assert_eq!(
                    args.file_digest,
                    "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef"
                );
            }
            Command::Run(_) => panic!("expected Purge"),
        }
    }

    #[test]
    fn accepts_bootnodes_and_storage_root() {
        let cli = Cli::parse_from([
            "storagesync",
            "--storage-root",
            "/tmp/data",
            "run",
            "--bootnodes",
            "/ip4/1.2.3.4/tcp/4001",
            "--bootnodes",
            "/ip4/5.6.7.8/tcp/4001",
        ]);
        assert_eq!(cli.storage_root, PathBuf::from("/tmp/data"));
        match cli.command {
            Command::Run(args) => assert_eq!(args.bootnodes.len(), 2),
            Command::Purge(_) => panic!("expected Run"),
        }
    }
}
