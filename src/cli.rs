//! Command-line interfaces for the two binaries.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Metadata coordinator for a ringkv cluster.
#[derive(Parser, Debug)]
#[command(name = "coordinator", version)]
pub struct CoordinatorCli {
    /// Port for client locate requests.
    #[arg(short = 'c', long)]
    pub client_port: u16,

    /// Port the storage nodes dial back to.
    #[arg(short = 's', long)]
    pub servers_port: u16,

    /// Cluster configuration file.
    #[arg(short = 'C', long)]
    pub config: PathBuf,

    /// Heartbeat timeout in seconds.
    #[arg(short = 't', long, default_value_t = 3)]
    pub timeout: u64,

    /// Log file; stdout if not given.
    #[arg(short = 'l', long)]
    pub log: Option<PathBuf>,
}

/// ringkv storage node. Normally started by the coordinator, not by hand.
#[derive(Parser, Debug)]
#[command(name = "server", version, disable_help_flag = true)]
pub struct ServerCli {
    /// Coordinator host name.
    #[arg(short = 'h', long)]
    pub coordinator_host: String,

    /// Coordinator servers port.
    #[arg(short = 'm', long)]
    pub coordinator_port: u16,

    /// Port for client operations.
    #[arg(short = 'c', long)]
    pub client_port: u16,

    /// Port for replication-ring peers.
    #[arg(short = 's', long)]
    pub peer_port: u16,

    /// Port the coordinator controls us through.
    #[arg(short = 'M', long)]
    pub control_port: u16,

    /// This node's id.
    #[arg(short = 'S', long)]
    pub server_id: usize,

    /// Total number of nodes in the cluster.
    #[arg(short = 'n', long)]
    pub num_servers: usize,

    /// Log file; stdout if not given.
    #[arg(short = 'l', long)]
    pub log: Option<PathBuf>,

    /// Print help.
    #[arg(long, action = ArgAction::HelpLong)]
    pub help: Option<bool>,
}
