//! Framing of the legacy (v2) protocol generation.
//!
//! v2 messages carry no length prefix: a tag byte is followed by fixed-width
//! integers and NUL-terminated strings, so the reader must know each layout.
//! The session reads v2 messages straight from the transport; this module
//! holds the tag set and the writers.

use crate::error::{ErrorFields, Result};
use crate::protocol::backend::unknown_tag;
use crate::protocol::codec::{write_bytes, write_i16, write_i32, write_u8};

/// Protocol version 2.0
pub const PROTOCOL_MAJOR: i16 = 2;
pub const PROTOCOL_MINOR: i16 = 0;

/// Size of the fixed v2 startup packet
pub const STARTUP_PACKET_LEN: usize = 296;

const SM_DATABASE: usize = 64;
const SM_USER: usize = 32;
const SM_OPTIONS: usize = 64;
const SM_UNUSED: usize = 64;
const SM_TTY: usize = 64;

/// Closed set of v2 backend tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyTag {
    Authentication,
    BackendKeyData,
    ReadyForQuery,
    RowDescription,
    AsciiRow,
    BinaryRow,
    CompletedResponse,
    EmptyQueryResponse,
    ErrorResponse,
    NoticeResponse,
    NotificationResponse,
    CursorResponse,
    CopyInResponse,
    CopyOutResponse,
    FunctionResultResponse,
}

impl LegacyTag {
    pub fn from_byte(byte: u8) -> Result<Self> {
        Ok(match byte {
            b'R' => Self::Authentication,
            b'K' => Self::BackendKeyData,
            b'Z' => Self::ReadyForQuery,
            b'T' => Self::RowDescription,
            b'D' => Self::AsciiRow,
            b'B' => Self::BinaryRow,
            b'C' => Self::CompletedResponse,
            b'I' => Self::EmptyQueryResponse,
            b'E' => Self::ErrorResponse,
            b'N' => Self::NoticeResponse,
            b'A' => Self::NotificationResponse,
            b'P' => Self::CursorResponse,
            b'G' => Self::CopyInResponse,
            b'H' => Self::CopyOutResponse,
            b'V' => Self::FunctionResultResponse,
            other => return Err(unknown_tag(other)),
        })
    }
}

fn write_padded(out: &mut Vec<u8>, value: &[u8], width: usize) {
    let used = value.len().min(width);
    write_bytes(out, value.get(..used).unwrap_or_default());
    out.resize(out.len() + (width - used), 0);
}

/// Write the fixed-size v2 startup packet.
///
/// Fields longer than their slot are truncated; the server reads them as
/// NUL-padded fixed-width strings.
pub fn write_startup_packet(buf: &mut Vec<u8>, user: &str, database: &str) {
    write_i32(buf, STARTUP_PACKET_LEN as i32);
    write_i16(buf, PROTOCOL_MAJOR);
    write_i16(buf, PROTOCOL_MINOR);
    write_padded(buf, database.as_bytes(), SM_DATABASE);
    write_padded(buf, user.as_bytes(), SM_USER);
    write_padded(buf, b"", SM_OPTIONS);
    write_padded(buf, b"", SM_UNUSED);
    write_padded(buf, b"", SM_TTY);
}

/// Write a v2 password packet: length, then the NUL-terminated credential.
pub fn write_password_packet(buf: &mut Vec<u8>, credential: &[u8]) {
    write_i32(buf, (4 + credential.len() + 1) as i32);
    write_bytes(buf, credential);
    write_u8(buf, 0);
}

/// Write the fast-path call header; parameters follow as length + bytes.
pub fn write_function_call_header(buf: &mut Vec<u8>, fnid: i32, param_count: i32) {
    write_u8(buf, b'F');
    write_u8(buf, 0);
    write_i32(buf, fnid);
    write_i32(buf, param_count);
}

/// Write a v2 Terminate: the bare tag.
pub fn write_terminate(buf: &mut Vec<u8>) {
    write_u8(buf, b'X');
}

/// Bytes used by the null bitmap of a row with `field_count` columns.
pub fn null_bitmap_len(field_count: usize) -> usize {
    field_count.div_ceil(8)
}

/// Whether column `index` is non-NULL. Bits are MSB-first within each byte.
pub fn bitmap_has_value(bitmap: &[u8], index: usize) -> bool {
    bitmap
        .get(index / 8)
        .is_some_and(|byte| byte & (0x80 >> (index % 8)) != 0)
}

/// Convert a v2 error line such as `ERROR:  relation "t" does not exist`.
///
/// The text is kept verbatim as the message; the severity is split off
/// only so that `ErrorFields::severity` is populated.
pub fn error_fields(text: &str) -> ErrorFields {
    let message = text.trim();
    let severity = message
        .split_once(':')
        .map(|(head, _)| head.trim())
        .filter(|head| !head.is_empty() && head.chars().all(|c| c.is_ascii_uppercase()));
    ErrorFields {
        severity: severity.map(str::to_owned),
        message: Some(message.to_owned()),
        ..ErrorFields::default()
    }
}

/// Convert a v2 notice line: everything up to the first `:` is the
/// severity and is stripped from the message, matching v3 notices.
pub fn notice_fields(text: &str) -> ErrorFields {
    let (severity, message) = match text.split_once(':') {
        Some((head, tail)) => (Some(head.trim().to_owned()), tail.trim()),
        None => (None, text.trim()),
    };
    ErrorFields {
        severity: severity.filter(|s| !s.is_empty()),
        message: Some(message.to_owned()),
        ..ErrorFields::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_packet_layout() {
        let mut buf = Vec::new();
        write_startup_packet(&mut buf, "alice", "shop");
        assert_eq!(buf.len(), STARTUP_PACKET_LEN);
        assert_eq!(&buf[0..4], &296_i32.to_be_bytes());
        assert_eq!(&buf[4..8], &[0, 2, 0, 0]);
        assert_eq!(&buf[8..12], b"shop");
        assert!(buf[12..72].iter().all(|&b| b == 0));
        assert_eq!(&buf[72..77], b"alice");
        assert!(buf[77..].iter().all(|&b| b == 0));
    }

    #[test]
    fn password_packet() {
        let mut buf = Vec::new();
        write_password_packet(&mut buf, b"pw");
        assert_eq!(buf, [0, 0, 0, 7, b'p', b'w', 0]);
    }

    #[test]
    fn null_bitmap() {
        assert_eq!(null_bitmap_len(0), 0);
        assert_eq!(null_bitmap_len(8), 1);
        assert_eq!(null_bitmap_len(9), 2);
        let bitmap = [0b1010_0000, 0b1000_0000];
        assert!(bitmap_has_value(&bitmap, 0));
        assert!(!bitmap_has_value(&bitmap, 1));
        assert!(bitmap_has_value(&bitmap, 2));
        assert!(bitmap_has_value(&bitmap, 8));
        assert!(!bitmap_has_value(&bitmap, 9));
    }

    #[test]
    fn notice_and_error_text() {
        let notice = notice_fields("NOTICE:  table created\n");
        assert_eq!(notice.severity.as_deref(), Some("NOTICE"));
        assert_eq!(notice.message.as_deref(), Some("table created"));

        let error = error_fields("ERROR:  syntax error at or near \"x\"\n");
        assert_eq!(error.severity.as_deref(), Some("ERROR"));
        assert_eq!(
            error.message.as_deref(),
            Some("ERROR:  syntax error at or near \"x\"")
        );
    }

    #[test]
    fn tags() {
        assert_eq!(LegacyTag::from_byte(b'B').unwrap(), LegacyTag::BinaryRow);
        assert!(LegacyTag::from_byte(b'1').is_err());
    }
}
