//! Imports shared by every message module.

pub use bytes::{Buf, BufMut, Bytes, BytesMut};

pub use super::{FromBytes, MessageCode, Protocol, ToBytes};
pub use crate::net::Error;
