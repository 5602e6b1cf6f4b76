//! Network plumbing: framed messages and buffered streams.

pub mod error;
pub mod messages;
pub mod stream;
pub mod tweaks;

pub use error::Error;
pub use stream::Stream;
