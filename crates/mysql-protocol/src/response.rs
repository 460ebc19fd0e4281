//! Generic response packets: OK, ERR, EOF and the first response to a query.

use bytes::{Buf, Bytes};

use crate::capabilities::StatusFlags;
use crate::codec::{read_bytes, read_eof_string, read_lenenc_int, read_u8, read_u16};
use crate::error::ProtocolError;

/// Marker of an OK packet.
pub const OK_MARKER: u8 = 0x00;
/// Marker of an ERR packet.
pub const ERR_MARKER: u8 = 0xFF;
/// Marker of an EOF packet.
pub const EOF_MARKER: u8 = 0xFE;
/// Marker of a `LOAD DATA LOCAL INFILE` request.
pub const LOCAL_INFILE_MARKER: u8 = 0xFB;

/// SQLSTATE reported when the server does not send one.
pub const DEFAULT_SQLSTATE: &str = "HY000";

/// Whether `payload` is an EOF packet (as opposed to a row starting with 0xFE).
#[must_use]
pub fn is_eof_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&EOF_MARKER) && payload.len() < 9
}

/// Whether `payload` is an ERR packet.
#[must_use]
pub fn is_err_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&ERR_MARKER)
}

/// Successful completion of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    /// Rows changed by the statement.
    pub affected_rows: u64,
    /// Last `AUTO_INCREMENT` id generated.
    pub last_insert_id: u64,
    /// Server status after the statement.
    pub status: StatusFlags,
    /// Warnings raised by the statement.
    pub warnings: u16,
    /// Human-readable information, e.g. `Rows matched: 1  Changed: 1`.
    pub info: String,
}

impl OkPacket {
    /// Decode an OK packet, including its marker.
    pub fn decode(mut src: Bytes) -> Result<Self, ProtocolError> {
        let marker = read_u8(&mut src)?;
        if marker != OK_MARKER && marker != EOF_MARKER {
            return Err(ProtocolError::UnexpectedMarker(marker));
        }
        let affected_rows = read_lenenc_int(&mut src)?;
        let last_insert_id = read_lenenc_int(&mut src)?;
        let status = StatusFlags::from_bits_retain(read_u16(&mut src)?);
        let warnings = read_u16(&mut src)?;
        let info = read_eof_string(&mut src);
        Ok(Self {
            affected_rows,
            last_insert_id,
            status,
            warnings,
            info,
        })
    }
}

/// Error reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    /// Server error code.
    pub code: u16,
    /// Five-character SQLSTATE.
    pub sqlstate: String,
    /// Error message.
    pub message: String,
}

impl ErrPacket {
    /// Decode an ERR packet, including its marker.
    pub fn decode(mut src: Bytes) -> Result<Self, ProtocolError> {
        let marker = read_u8(&mut src)?;
        if marker != ERR_MARKER {
            return Err(ProtocolError::UnexpectedMarker(marker));
        }
        let code = read_u16(&mut src)?;
        let sqlstate = if src.first() == Some(&b'#') {
            src.advance(1);
            String::from_utf8_lossy(&read_bytes(&mut src, 5)?).into_owned()
        } else {
            DEFAULT_SQLSTATE.to_string()
        };
        let message = read_eof_string(&mut src);
        Ok(Self {
            code,
            sqlstate,
            message,
        })
    }
}

/// End of a column definition or row sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EofPacket {
    /// Warnings raised so far.
    pub warnings: u16,
    /// Server status.
    pub status: StatusFlags,
}

impl EofPacket {
    /// Decode an EOF packet, including its marker.
    pub fn decode(mut src: Bytes) -> Result<Self, ProtocolError> {
        let marker = read_u8(&mut src)?;
        if marker != EOF_MARKER {
            return Err(ProtocolError::UnexpectedMarker(marker));
        }
        // Pre-4.1 servers send a bare marker.
        if src.remaining() < 4 {
            return Ok(Self::default());
        }
        let warnings = read_u16(&mut src)?;
        let status = StatusFlags::from_bits_retain(read_u16(&mut src)?);
        Ok(Self { warnings, status })
    }
}

/// First response to `COM_QUERY` (and `next_result`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResponse {
    /// The statement produced no result set.
    Ok(OkPacket),
    /// The statement failed.
    Err(ErrPacket),
    /// The server asks the client to upload a local file.
    LocalInfile(String),
    /// A result set with this many columns follows.
    ResultSet(u64),
}

impl QueryResponse {
    /// Classify and decode the first response packet.
    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        match payload.first() {
            None => Err(ProtocolError::MalformedPacket("empty response")),
            Some(&OK_MARKER) => OkPacket::decode(payload).map(Self::Ok),
            Some(&ERR_MARKER) => ErrPacket::decode(payload).map(Self::Err),
            Some(&LOCAL_INFILE_MARKER) => {
                let mut rest = payload.slice(1..);
                Ok(Self::LocalInfile(read_eof_string(&mut rest)))
            }
            Some(_) => {
                let mut src = payload;
                let count = read_lenenc_int(&mut src)?;
                if count == 0 {
                    return Err(ProtocolError::MalformedPacket("zero column count"));
                }
                Ok(Self::ResultSet(count))
            }
        }
    }
}

/// Response to commands that answer with OK or ERR only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResponse {
    /// Success.
    Ok(OkPacket),
    /// Success reported as a bare EOF (`COM_SET_OPTION`, `COM_DEBUG`).
    Eof(EofPacket),
    /// Failure.
    Err(ErrPacket),
}

impl CommandResponse {
    /// Decode an OK, EOF or ERR packet.
    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        match payload.first() {
            Some(&OK_MARKER) => OkPacket::decode(payload).map(Self::Ok),
            Some(&ERR_MARKER) => ErrPacket::decode(payload).map(Self::Err),
            Some(&EOF_MARKER) if payload.len() < 9 => EofPacket::decode(payload).map(Self::Eof),
            Some(&marker) => Err(ProtocolError::UnexpectedMarker(marker)),
            None => Err(ProtocolError::MalformedPacket("empty response")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_packet() {
        let payload = Bytes::from_static(&[0x00, 0x03, 0xFC, 0x10, 0x27, 0x02, 0x00, 0x01, 0x00, b'h', b'i']);
        let ok = OkPacket::decode(payload).unwrap();
        assert_eq!(ok.affected_rows, 3);
        assert_eq!(ok.last_insert_id, 10_000);
        assert!(ok.status.contains(StatusFlags::AUTOCOMMIT));
        assert_eq!(ok.warnings, 1);
        assert_eq!(ok.info, "hi");
    }

    #[test]
    fn test_err_packet_with_sqlstate() {
        let mut raw = vec![0xFF, 0x26, 0x04, b'#'];
        raw.extend_from_slice(b"23000Duplicate entry '1' for key 'PRIMARY'");
        let err = ErrPacket::decode(Bytes::from(raw)).unwrap();
        assert_eq!(err.code, 1062);
        assert_eq!(err.sqlstate, "23000");
        assert_eq!(err.message, "Duplicate entry '1' for key 'PRIMARY'");
    }

    #[test]
    fn test_err_packet_without_sqlstate() {
        let mut raw = vec![0xFF, 0x15, 0x04];
        raw.extend_from_slice(b"denied");
        let err = ErrPacket::decode(Bytes::from(raw)).unwrap();
        assert_eq!(err.code, 1045);
        assert_eq!(err.sqlstate, DEFAULT_SQLSTATE);
    }

    #[test]
    fn test_eof_detection() {
        assert!(is_eof_packet(&[0xFE, 0, 0, 2, 0]));
        // A row whose first column is 0xFE-prefixed is long.
        assert!(!is_eof_packet(&[0xFE, 1, 2, 3, 4, 5, 6, 7, 8, 9]));
        let eof = EofPacket::decode(Bytes::from_static(&[0xFE, 1, 0, 0x08, 0])).unwrap();
        assert_eq!(eof.warnings, 1);
        assert!(eof.status.contains(StatusFlags::MORE_RESULTS_EXISTS));
    }

    #[test]
    fn test_query_response_kinds() {
        assert!(matches!(
            QueryResponse::decode(Bytes::from_static(&[0x02])).unwrap(),
            QueryResponse::ResultSet(2)
        ));
        assert_eq!(
            QueryResponse::decode(Bytes::from_static(b"\xFB/tmp/data.csv")).unwrap(),
            QueryResponse::LocalInfile("/tmp/data.csv".to_string())
        );
        assert!(QueryResponse::decode(Bytes::new()).is_err());
    }

    #[test]
    fn test_command_response_eof() {
        assert!(matches!(
            CommandResponse::decode(Bytes::from_static(&[0xFE, 0, 0, 2, 0])).unwrap(),
            CommandResponse::Eof(_)
        ));
    }
}
