//! Shard store errors.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone, Copy)]
pub enum Error {
    #[error("out of space")]
    OutOfSpace,
}
