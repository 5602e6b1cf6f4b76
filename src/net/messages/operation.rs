//! Key-value operations and their replies. Used on the client port and
//! between nodes on the replication ring.

use std::fmt;

use crate::sharding::{Key, KEY_SIZE};

use super::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// No-op; doubles as the end-of-stream sentinel on catch-up pushes.
    Noop = 0,
    Get = 1,
    Put = 2,
}

impl TryFrom<u8> for OpCode {
    type Error = Error;

    fn try_from(op: u8) -> Result<Self, Error> {
        Ok(match op {
            0 => OpCode::Noop,
            1 => OpCode::Get,
            2 => OpCode::Put,
            _ => return Err(Error::Malformed(MessageCode::OperationRequest)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success = 0,
    KeyNotFound = 1,
    OutOfSpace = 2,
    ServerFailure = 3,
}

impl TryFrom<u8> for Status {
    type Error = Error;

    fn try_from(status: u8) -> Result<Self, Error> {
        Ok(match status {
            0 => Status::Success,
            1 => Status::KeyNotFound,
            2 => Status::OutOfSpace,
            3 => Status::ServerFailure,
            _ => return Err(Error::Malformed(MessageCode::OperationResponse)),
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Success => "success",
            Status::KeyNotFound => "key not found",
            Status::OutOfSpace => "out of space",
            Status::ServerFailure => "server failure",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub op: OpCode,
    pub key: Key,
    pub value: Bytes,
}

impl OperationRequest {
    pub fn get(key: Key) -> Self {
        Self {
            op: OpCode::Get,
            key,
            value: Bytes::new(),
        }
    }

    pub fn put(key: Key, value: Bytes) -> Self {
        Self {
            op: OpCode::Put,
            key,
            value,
        }
    }

    pub fn noop() -> Self {
        Self {
            op: OpCode::Noop,
            key: Key::new([0u8; KEY_SIZE]),
            value: Bytes::new(),
        }
    }
}

impl FromBytes for OperationRequest {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        if bytes.remaining() < 1 + KEY_SIZE {
            return Err(Error::Malformed(MessageCode::OperationRequest));
        }

        let op = OpCode::try_from(bytes.get_u8())?;
        let mut key = [0u8; KEY_SIZE];
        bytes.copy_to_slice(&mut key);

        Ok(Self {
            op,
            key: Key::new(key),
            value: bytes,
        })
    }
}

impl ToBytes for OperationRequest {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::with_capacity(1 + KEY_SIZE + self.value.len());
        payload.put_u8(self.op as u8);
        payload.put(self.key.as_bytes());
        payload.put(self.value.clone());

        Ok(payload.freeze())
    }
}

impl Protocol for OperationRequest {
    fn code(&self) -> MessageCode {
        MessageCode::OperationRequest
    }
}

#[derive(Debug, Clone)]
pub struct OperationResponse {
    pub status: Status,
    pub value: Bytes,
}

impl OperationResponse {
    pub fn status(status: Status) -> Self {
        Self {
            status,
            value: Bytes::new(),
        }
    }

    pub fn value(value: Bytes) -> Self {
        Self {
            status: Status::Success,
            value,
        }
    }
}

impl FromBytes for OperationResponse {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        if bytes.remaining() < 1 {
            return Err(Error::Malformed(MessageCode::OperationResponse));
        }

        let status = Status::try_from(bytes.get_u8())?;

        Ok(Self {
            status,
            value: bytes,
        })
    }
}

impl ToBytes for OperationResponse {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::with_capacity(1 + self.value.len());
        payload.put_u8(self.status as u8);
        payload.put(self.value.clone());

        Ok(payload.freeze())
    }
}

impl Protocol for OperationResponse {
    fn code(&self) -> MessageCode {
        MessageCode::OperationResponse
    }
}
