//! Transport and codec errors.

use thiserror::Error;

use super::messages::MessageCode;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    Eof,

    #[error("unknown message code: {0}")]
    UnknownCode(u8),

    #[error("expected {expected:?}, got {got:?}")]
    UnexpectedMessage {
        expected: MessageCode,
        got: MessageCode,
    },

    #[error("frame length {0} out of bounds")]
    InvalidLength(usize),

    #[error("malformed {0:?} payload")]
    Malformed(MessageCode),

    #[error("{0}")]
    Utf8(#[from] std::str::Utf8Error),
}
