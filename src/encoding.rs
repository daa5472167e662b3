//! Text codecs for the client encodings a session can be switched to.

use std::borrow::Cow;

use crate::error::{Error, Result};

/// Client-side text encoding.
///
/// Modern sessions always run in UTF-8. Legacy servers older than 7.3
/// cannot switch to UNICODE, so the session adopts the database encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
    /// Bytes are passed through; invalid UTF-8 is replaced on decode.
    SqlAscii,
}

impl Encoding {
    /// Resolve a server-side encoding name.
    pub fn from_server_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "UTF8" | "UTF-8" | "UNICODE" => Some(Encoding::Utf8),
            "LATIN1" | "ISO_8859_1" | "ISO-8859-1" | "ISO8859_1" => Some(Encoding::Latin1),
            "SQL_ASCII" | "UNKNOWN" => Some(Encoding::SqlAscii),
            _ => None,
        }
    }

    /// Server-side name of the encoding.
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF8",
            Encoding::Latin1 => "LATIN1",
            Encoding::SqlAscii => "SQL_ASCII",
        }
    }

    /// Encode text for the wire. Unmappable Latin-1 characters become `?`.
    pub fn encode(self, text: &str) -> Cow<'_, [u8]> {
        match self {
            Encoding::Utf8 | Encoding::SqlAscii => Cow::Borrowed(text.as_bytes()),
            Encoding::Latin1 => Cow::Owned(
                text.chars()
                    .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                    .collect(),
            ),
        }
    }

    /// Decode wire bytes.
    pub fn decode(self, bytes: &[u8]) -> Result<Cow<'_, str>> {
        match self {
            Encoding::Utf8 => simdutf8::basic::from_utf8(bytes)
                .map(Cow::Borrowed)
                .map_err(|_| {
                    Error::ProtocolViolation("Invalid UTF-8 sequence in server data".into())
                }),
            Encoding::Latin1 => Ok(Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect())),
            Encoding::SqlAscii => Ok(String::from_utf8_lossy(bytes)),
        }
    }
}
