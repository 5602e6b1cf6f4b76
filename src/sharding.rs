//! Key type and the key → node mapping.

use std::fmt;
use std::hash::Hasher;

use fnv::FnvHasher;

/// Fixed width of every key on the wire and in the stores.
pub const KEY_SIZE: usize = 32;

/// An opaque fixed-width key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key([u8; KEY_SIZE]);

impl Key {
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// A key from a slice of exactly `KEY_SIZE` bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; KEY_SIZE] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Id of the node holding the primary copy of this key.
    pub fn server_id(&self, num_servers: usize) -> usize {
        key_server_id(&self.0, num_servers)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..")
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

/// Which node is the primary for a key.
pub fn key_server_id(key: &[u8], num_servers: usize) -> usize {
    let mut hasher = FnvHasher::default();
    hasher.write(key);
    (hasher.finish() % num_servers as u64) as usize
}

/// The ring predecessor: the node whose primary shard `server_id` replicates.
pub fn primary_server_id(server_id: usize, num_servers: usize) -> usize {
    (server_id + num_servers - 1) % num_servers
}

/// The ring successor: the node replicating `server_id`'s primary shard.
pub fn secondary_server_id(server_id: usize, num_servers: usize) -> usize {
    (server_id + 1) % num_servers
}
