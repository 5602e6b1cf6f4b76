//! Client locate lookup and its reply.

use std::str::from_utf8;

use crate::sharding::{Key, KEY_SIZE};

use super::prelude::*;

/// "Where does this key live right now?"
#[derive(Debug, Clone)]
pub struct LocateRequest {
    pub key: Key,
}

impl FromBytes for LocateRequest {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        if bytes.remaining() < KEY_SIZE {
            return Err(Error::Malformed(MessageCode::LocateRequest));
        }

        let mut key = [0u8; KEY_SIZE];
        bytes.copy_to_slice(&mut key);

        Ok(Self { key: Key::new(key) })
    }
}

impl ToBytes for LocateRequest {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        Ok(Bytes::copy_from_slice(self.key.as_bytes()))
    }
}

impl Protocol for LocateRequest {
    fn code(&self) -> MessageCode {
        MessageCode::LocateRequest
    }
}

/// The client-facing address of the node owning the key.
#[derive(Debug, Clone, PartialEq)]
pub struct LocateResponse {
    pub host: String,
    pub port: u16,
}

impl FromBytes for LocateResponse {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        if bytes.remaining() < 2 {
            return Err(Error::Malformed(MessageCode::LocateResponse));
        }

        let port = bytes.get_u16();
        let host = from_utf8(&bytes)?.to_string();

        Ok(Self { host, port })
    }
}

impl ToBytes for LocateResponse {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u16(self.port);
        payload.put(self.host.as_bytes());

        Ok(payload.freeze())
    }
}

impl Protocol for LocateResponse {
    fn code(&self) -> MessageCode {
        MessageCode::LocateResponse
    }
}
