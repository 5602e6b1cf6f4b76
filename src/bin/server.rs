//! Storage node binary. Spawned by the coordinator.

use std::process::exit;

use clap::Parser;
use tokio::runtime::Builder;
use tracing::error;

use ringkv::cli::ServerCli;
use ringkv::server::{Error, Node, NodeOptions};

fn main() {
    let args = ServerCli::parse();

    if let Err(err) = ringkv::logger(args.log.as_deref()) {
        eprintln!("cannot open log file: {}", err);
        exit(1);
    }

    if args.num_servers < 3 || args.server_id >= args.num_servers {
        error!(
            "invalid cluster shape: id {} of {}",
            args.server_id, args.num_servers
        );
        exit(1);
    }

    let runtime = match Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("{}", err);
            exit(1);
        }
    };

    let result = runtime.block_on(async move {
        let node = Node::bind(NodeOptions {
            coordinator_host: args.coordinator_host,
            coordinator_port: args.coordinator_port,
            client_port: args.client_port,
            peer_port: args.peer_port,
            control_port: args.control_port,
            server_id: args.server_id,
            num_servers: args.num_servers,
        })
        .await?;

        node.run().await?;
        node.wait().await;

        Ok::<(), Error>(())
    });

    if let Err(err) = result {
        error!("{}", err);
        exit(1);
    }
}
