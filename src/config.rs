//! Cluster configuration file.
//!
//! Plain text: the first line holds the node count `N >= 3`, followed by
//! `N` lines of `host client_port peer_port control_port`. The host is
//! `localhost`, or `user@host` for nodes spawned remotely over ssh.

use std::fs::read_to_string;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::net::messages::Locator;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read `{0}`: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("missing or invalid node count")]
    NodeCount,

    #[error("need at least 3 nodes, got {0}")]
    TooFewNodes(usize),

    #[error("line {0}: malformed node entry")]
    Malformed(usize),

    #[error("line {0}: invalid port")]
    BadPort(usize),

    #[error("line {0}: host must be `localhost` or `user@host`")]
    BadHost(usize),

    #[error("expected {expected} node entries, found {found}")]
    MissingEntries { expected: usize, found: usize },
}

/// Where one storage node lives.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeAddr {
    /// `localhost`, or `user@host` for remote spawn through ssh.
    pub host: String,
    pub client_port: u16,
    pub peer_port: u16,
    pub control_port: u16,
}

impl NodeAddr {
    /// Host with any `user@` ssh prefix stripped.
    pub fn bare_host(&self) -> &str {
        self.host.rsplit('@').next().unwrap_or(&self.host)
    }

    /// Spawn happens over ssh rather than locally.
    pub fn remote(&self) -> bool {
        self.host.contains('@')
    }

    /// The node's replication listener, as sent to its peers.
    pub fn peer_locator(&self) -> Locator {
        Locator {
            host: self.bare_host().to_string(),
            port: self.peer_port,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub nodes: Vec<NodeAddr>,
}

impl ClusterConfig {
    /// Load and validate the configuration file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = read_to_string(path).map_err(|err| Error::Io(path.to_owned(), err))?;
        let config = Self::parse(&text)?;

        info!("loaded \"{}\", {} nodes", path.display(), config.len());

        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut lines = text.lines();

        let count: usize = lines
            .next()
            .and_then(|line| line.trim().parse().ok())
            .ok_or(Error::NodeCount)?;

        if count < 3 {
            return Err(Error::TooFewNodes(count));
        }

        let mut nodes = Vec::with_capacity(count);

        for (index, line) in lines.enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if nodes.len() == count {
                break;
            }

            let lineno = index + 2;
            let mut fields = line.split_whitespace();

            let host = fields.next().ok_or(Error::Malformed(lineno))?;
            if host != "localhost" && !host.contains('@') {
                return Err(Error::BadHost(lineno));
            }

            let mut port = || -> Result<u16, Error> {
                let port: u16 = fields
                    .next()
                    .ok_or(Error::Malformed(lineno))?
                    .parse()
                    .map_err(|_| Error::Malformed(lineno))?;

                if port == 0 {
                    return Err(Error::BadPort(lineno));
                }

                Ok(port)
            };

            nodes.push(NodeAddr {
                host: host.to_string(),
                client_port: port()?,
                peer_port: port()?,
                control_port: port()?,
            });
        }

        if nodes.len() != count {
            return Err(Error::MissingEntries {
                expected: count,
                found: nodes.len(),
            });
        }

        Ok(Self { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
