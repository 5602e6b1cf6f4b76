//! ringkv, a replicated, sharded, in-memory key-value service.
//!
//! The cluster is `N >= 3` storage nodes arranged in a replication ring
//! plus one metadata coordinator. Every key hashes to a primary node; the
//! next node in the ring carries the replica. The coordinator answers
//! client locate lookups, watches heartbeats, and when a node dies it
//! spawns a replacement and drives the catch-up and promotion protocol
//! that brings the shard back to full replication.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod net;
pub mod server;
pub mod sharding;
pub mod store;
pub mod util;

use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

/// Initialize logging. Output goes to the given file, or stdout when no
/// file is configured. `RUST_LOG` overrides the default `info` filter.
pub fn logger(log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            builder.with_writer(Arc::new(file)).with_ansi(false).init();
        }
        None => builder.init(),
    }

    Ok(())
}
