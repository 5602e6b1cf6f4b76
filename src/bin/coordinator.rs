//! Metadata coordinator binary.

use std::process::exit;
use std::time::Duration;

use clap::Parser;
use tokio::runtime::Builder;
use tracing::error;

use ringkv::cli::CoordinatorCli;
use ringkv::config::ClusterConfig;
use ringkv::coordinator::{Coordinator, CoordinatorOptions, Error};

fn main() {
    let args = CoordinatorCli::parse();

    if let Err(err) = ringkv::logger(args.log.as_deref()) {
        eprintln!("cannot open log file: {}", err);
        exit(1);
    }

    let config = match ClusterConfig::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {}", err);
            exit(1);
        }
    };

    let runtime = match Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("{}", err);
            exit(1);
        }
    };

    let result = runtime.block_on(async move {
        let coordinator = Coordinator::bind(CoordinatorOptions {
            client_port: args.client_port,
            servers_port: args.servers_port,
            heartbeat_timeout: Duration::from_secs(args.timeout),
            config,
        })
        .await?;

        coordinator.run().await?;

        // EOF on stdin requests clean shutdown.
        coordinator.wait_for_shutdown().await;

        Ok::<(), Error>(())
    });

    if let Err(err) = result {
        error!("{}", err);
        exit(1);
    }
}
