//! Wire protocol messages.
//!
//! Every message is a framed record: a one-byte code, a big-endian `u16`
//! holding the total frame length (header included), then the payload.
//! Payloads are encoded and decoded by the [`ToBytes`]/[`FromBytes`] pair;
//! [`Protocol`] ties a payload to its frame code.

pub mod locate;
pub mod operation;
pub mod prelude;
pub mod report;
pub mod server_ctrl;

pub use locate::{LocateRequest, LocateResponse};
pub use operation::{OpCode, OperationRequest, OperationResponse, Status};
pub use report::{Report, ReportKind};
pub use server_ctrl::{CtrlCommand, CtrlRequest, CtrlResponse, CtrlStatus, Locator};

use bytes::{BufMut, Bytes, BytesMut};

use super::Error;

/// Bytes taken by the frame header.
pub const HEADER_LEN: usize = 3;

/// Largest frame we accept or emit.
pub const MAX_MSG_LEN: usize = 16 * 1024;

/// Frame codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageCode {
    LocateRequest = 1,
    LocateResponse = 2,
    OperationRequest = 3,
    OperationResponse = 4,
    CtrlRequest = 5,
    CtrlResponse = 6,
    Report = 7,
}

impl TryFrom<u8> for MessageCode {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Error> {
        Ok(match code {
            1 => MessageCode::LocateRequest,
            2 => MessageCode::LocateResponse,
            3 => MessageCode::OperationRequest,
            4 => MessageCode::OperationResponse,
            5 => MessageCode::CtrlRequest,
            6 => MessageCode::CtrlResponse,
            7 => MessageCode::Report,
            code => return Err(Error::UnknownCode(code)),
        })
    }
}

/// Encode a message payload (header excluded).
pub trait ToBytes {
    fn to_bytes(&self) -> Result<Bytes, Error>;
}

/// Decode a message payload (header already stripped).
pub trait FromBytes: Sized {
    fn from_bytes(bytes: Bytes) -> Result<Self, Error>;
}

/// A message that can go on the wire by itself.
pub trait Protocol: ToBytes {
    fn code(&self) -> MessageCode;

    /// The full frame: header plus payload.
    fn frame(&self) -> Result<Bytes, Error> {
        let payload = self.to_bytes()?;
        let total = payload.len() + HEADER_LEN;

        if total > MAX_MSG_LEN {
            return Err(Error::InvalidLength(total));
        }

        let mut frame = BytesMut::with_capacity(total);
        frame.put_u8(self.code() as u8);
        frame.put_u16(total as u16);
        frame.put(payload);

        Ok(frame.freeze())
    }
}

/// A raw message read off the wire.
#[derive(Debug, Clone)]
pub struct Message {
    pub code: MessageCode,
    pub payload: Bytes,
}

impl Message {
    /// The payload, provided the frame carries the required code.
    pub fn require(self, code: MessageCode) -> Result<Bytes, Error> {
        if self.code != code {
            return Err(Error::UnexpectedMessage {
                expected: code,
                got: self.code,
            });
        }

        Ok(self.payload)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Big;

    impl ToBytes for Big {
        fn to_bytes(&self) -> Result<Bytes, Error> {
            Ok(Bytes::from(vec![0u8; MAX_MSG_LEN]))
        }
    }

    impl Protocol for Big {
        fn code(&self) -> MessageCode {
            MessageCode::OperationRequest
        }
    }

    #[test]
    fn test_oversize_frame_rejected() {
        assert!(matches!(Big.frame(), Err(Error::InvalidLength(_))));
    }

    #[test]
    fn test_message_code() {
        for code in 1..=7u8 {
            assert_eq!(MessageCode::try_from(code).unwrap() as u8, code);
        }
        assert!(MessageCode::try_from(0).is_err());
        assert!(MessageCode::try_from(99).is_err());
    }
}
