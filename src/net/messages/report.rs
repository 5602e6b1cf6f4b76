//! Node → coordinator reports. Fire-and-forget: none of these expect a
//! reply.

use super::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReportKind {
    Heartbeat = 0,
    /// Bulk push into the replacement's primary shard finished.
    UpdatedPrimary = 1,
    /// Bulk push into the replacement's secondary shard finished.
    UpdatedSecondary = 2,
    UpdatePrimaryFailed = 3,
    UpdateSecondaryFailed = 4,
}

impl TryFrom<u8> for ReportKind {
    type Error = Error;

    fn try_from(kind: u8) -> Result<Self, Error> {
        Ok(match kind {
            0 => ReportKind::Heartbeat,
            1 => ReportKind::UpdatedPrimary,
            2 => ReportKind::UpdatedSecondary,
            3 => ReportKind::UpdatePrimaryFailed,
            4 => ReportKind::UpdateSecondaryFailed,
            _ => return Err(Error::Malformed(MessageCode::Report)),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Report {
    pub kind: ReportKind,
    pub server_id: u16,
}

impl Report {
    pub fn new(kind: ReportKind, server_id: usize) -> Self {
        Self {
            kind,
            server_id: server_id as u16,
        }
    }
}

impl FromBytes for Report {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        if bytes.remaining() < 3 {
            return Err(Error::Malformed(MessageCode::Report));
        }

        let kind = ReportKind::try_from(bytes.get_u8())?;
        let server_id = bytes.get_u16();

        Ok(Self { kind, server_id })
    }
}

impl ToBytes for Report {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::with_capacity(3);
        payload.put_u8(self.kind as u8);
        payload.put_u16(self.server_id);

        Ok(payload.freeze())
    }
}

impl Protocol for Report {
    fn code(&self) -> MessageCode {
        MessageCode::Report
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_report() {
        let report = Report::new(ReportKind::UpdatedSecondary, 4);
        let decoded = Report::from_bytes(report.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.kind, ReportKind::UpdatedSecondary);
        assert_eq!(decoded.server_id, 4);
    }

    #[test]
    fn test_bad_kind_rejected() {
        let mut payload = BytesMut::new();
        payload.put_u8(7);
        payload.put_u16(0);
        assert!(Report::from_bytes(payload.freeze()).is_err());
    }
}
