//! Node lifecycle states.

use std::fmt;

/// A node is `Online` unless it is assisting the reconstruction of a
/// failed neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    #[default]
    Online,
    /// This node was the failed node's secondary. It acts as primary for
    /// the failed range out of its own replica while it refills the
    /// replacement's primary shard.
    UpdatingPrimary,
    /// This node replicated through the failed node. It streams its
    /// primary shard into the replacement's replica slot.
    UpdatingSecondary,
    /// Client traffic is refused while in-flight writes drain; the
    /// replacement takes the range over once the flush is acknowledged.
    SwitchingPrimary,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Online => "online",
            NodeState::UpdatingPrimary => "updating primary",
            NodeState::UpdatingSecondary => "updating secondary",
            NodeState::SwitchingPrimary => "switching primary",
        };
        write!(f, "{}", name)
    }
}
