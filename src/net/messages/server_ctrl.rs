//! Coordinator → node control traffic.

use std::str::from_utf8;

use super::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CtrlCommand {
    /// Open the outbound replication connection to the given peer.
    SetSecondary = 0,
    Shutdown = 1,
    /// Adopt the failed neighbor's range and refill the replacement's
    /// primary shard from the local replica.
    UpdatePrimary = 2,
    /// Re-point the replica connection at the replacement and refill its
    /// secondary shard from the local primary.
    UpdateSecondary = 3,
    /// Flush in-flight client writes; the replacement takes over the range.
    SwitchPrimary = 4,
}

impl TryFrom<u8> for CtrlCommand {
    type Error = Error;

    fn try_from(command: u8) -> Result<Self, Error> {
        Ok(match command {
            0 => CtrlCommand::SetSecondary,
            1 => CtrlCommand::Shutdown,
            2 => CtrlCommand::UpdatePrimary,
            3 => CtrlCommand::UpdateSecondary,
            4 => CtrlCommand::SwitchPrimary,
            _ => return Err(Error::Malformed(MessageCode::CtrlRequest)),
        })
    }
}

/// Where to find a peer node's replication listener.
#[derive(Debug, Clone, PartialEq)]
pub struct Locator {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct CtrlRequest {
    pub command: CtrlCommand,
    pub locator: Option<Locator>,
}

impl CtrlRequest {
    pub fn set_secondary(locator: Locator) -> Self {
        Self {
            command: CtrlCommand::SetSecondary,
            locator: Some(locator),
        }
    }

    pub fn shutdown() -> Self {
        Self {
            command: CtrlCommand::Shutdown,
            locator: None,
        }
    }

    pub fn update_primary(locator: Locator) -> Self {
        Self {
            command: CtrlCommand::UpdatePrimary,
            locator: Some(locator),
        }
    }

    pub fn update_secondary(locator: Locator) -> Self {
        Self {
            command: CtrlCommand::UpdateSecondary,
            locator: Some(locator),
        }
    }

    pub fn switch_primary() -> Self {
        Self {
            command: CtrlCommand::SwitchPrimary,
            locator: None,
        }
    }
}

impl FromBytes for CtrlRequest {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        if bytes.remaining() < 1 {
            return Err(Error::Malformed(MessageCode::CtrlRequest));
        }

        let command = CtrlCommand::try_from(bytes.get_u8())?;

        let locator = if bytes.remaining() >= 2 {
            let port = bytes.get_u16();
            let host = from_utf8(&bytes)?.to_string();
            Some(Locator { host, port })
        } else {
            None
        };

        Ok(Self { command, locator })
    }
}

impl ToBytes for CtrlRequest {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(self.command as u8);

        if let Some(ref locator) = self.locator {
            payload.put_u16(locator.port);
            payload.put(locator.host.as_bytes());
        }

        Ok(payload.freeze())
    }
}

impl Protocol for CtrlRequest {
    fn code(&self) -> MessageCode {
        MessageCode::CtrlRequest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CtrlStatus {
    Success = 0,
    Failure = 1,
}

#[derive(Debug, Clone, Copy)]
pub struct CtrlResponse {
    pub status: CtrlStatus,
}

impl CtrlResponse {
    pub fn success() -> Self {
        Self {
            status: CtrlStatus::Success,
        }
    }

    pub fn failure() -> Self {
        Self {
            status: CtrlStatus::Failure,
        }
    }

    pub fn ok(&self) -> bool {
        self.status == CtrlStatus::Success
    }
}

impl FromBytes for CtrlResponse {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        if bytes.remaining() < 1 {
            return Err(Error::Malformed(MessageCode::CtrlResponse));
        }

        let status = match bytes.get_u8() {
            0 => CtrlStatus::Success,
            1 => CtrlStatus::Failure,
            _ => return Err(Error::Malformed(MessageCode::CtrlResponse)),
        };

        Ok(Self { status })
    }
}

impl ToBytes for CtrlResponse {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::with_capacity(1);
        payload.put_u8(self.status as u8);

        Ok(payload.freeze())
    }
}

impl Protocol for CtrlResponse {
    fn code(&self) -> MessageCode {
        MessageCode::CtrlResponse
    }
}
