//! Backend (server → client) messages of the v3 protocol.
//!
//! Parsers take the payload after the length field. The legacy generation has
//! no length framing and is read field by field in `session::legacy`.

pub mod auth;
pub mod copy;
pub mod error;
pub mod extended;
pub mod query;

pub use auth::{AuthRequest, BackendKeyData, NotificationResponse, ParameterStatus, ReadyForQuery};
pub use copy::CopyResponse;
pub use error::{ErrorResponse, parse_fields};
pub use extended::{FunctionCallResponse, ParameterDescription};
pub use query::{CommandComplete, DataRow, RowDescription};

use crate::error::{Error, Result};

/// Backend message type bytes.
pub mod msg_type {
    pub const AUTHENTICATION: u8 = b'R';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const ROW_DESCRIPTION: u8 = b'T';
    pub const DATA_ROW: u8 = b'D';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const NOTICE_RESPONSE: u8 = b'N';
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    pub const PARSE_COMPLETE: u8 = b'1';
    pub const BIND_COMPLETE: u8 = b'2';
    pub const CLOSE_COMPLETE: u8 = b'3';
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    pub const NO_DATA: u8 = b'n';
    pub const PORTAL_SUSPENDED: u8 = b's';
    pub const COPY_IN_RESPONSE: u8 = b'G';
    pub const COPY_OUT_RESPONSE: u8 = b'H';
    pub const COPY_BOTH_RESPONSE: u8 = b'W';
    pub const COPY_DATA: u8 = b'd';
    pub const COPY_DONE: u8 = b'c';
    pub const FUNCTION_CALL_RESPONSE: u8 = b'V';
    pub const NEGOTIATE_PROTOCOL_VERSION: u8 = b'v';
}

/// Closed set of v3 backend message tags.
///
/// Tags are decoded once at the transport boundary; an unknown byte is a
/// protocol violation rather than something to skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendTag {
    Authentication,
    BackendKeyData,
    ParameterStatus,
    ReadyForQuery,
    RowDescription,
    DataRow,
    CommandComplete,
    EmptyQueryResponse,
    ErrorResponse,
    NoticeResponse,
    NotificationResponse,
    ParseComplete,
    BindComplete,
    CloseComplete,
    ParameterDescription,
    NoData,
    PortalSuspended,
    CopyInResponse,
    CopyOutResponse,
    CopyBothResponse,
    CopyData,
    CopyDone,
    FunctionCallResponse,
    NegotiateProtocolVersion,
}

impl BackendTag {
    pub fn from_byte(byte: u8) -> Result<Self> {
        use msg_type::*;
        Ok(match byte {
            AUTHENTICATION => Self::Authentication,
            BACKEND_KEY_DATA => Self::BackendKeyData,
            PARAMETER_STATUS => Self::ParameterStatus,
            READY_FOR_QUERY => Self::ReadyForQuery,
            ROW_DESCRIPTION => Self::RowDescription,
            DATA_ROW => Self::DataRow,
            COMMAND_COMPLETE => Self::CommandComplete,
            EMPTY_QUERY_RESPONSE => Self::EmptyQueryResponse,
            ERROR_RESPONSE => Self::ErrorResponse,
            NOTICE_RESPONSE => Self::NoticeResponse,
            NOTIFICATION_RESPONSE => Self::NotificationResponse,
            PARSE_COMPLETE => Self::ParseComplete,
            BIND_COMPLETE => Self::BindComplete,
            CLOSE_COMPLETE => Self::CloseComplete,
            PARAMETER_DESCRIPTION => Self::ParameterDescription,
            NO_DATA => Self::NoData,
            PORTAL_SUSPENDED => Self::PortalSuspended,
            COPY_IN_RESPONSE => Self::CopyInResponse,
            COPY_OUT_RESPONSE => Self::CopyOutResponse,
            COPY_BOTH_RESPONSE => Self::CopyBothResponse,
            COPY_DATA => Self::CopyData,
            COPY_DONE => Self::CopyDone,
            FUNCTION_CALL_RESPONSE => Self::FunctionCallResponse,
            NEGOTIATE_PROTOCOL_VERSION => Self::NegotiateProtocolVersion,
            other => return Err(unknown_tag(other)),
        })
    }
}

/// Error for a tag that is not valid at the current point of the exchange.
pub fn unknown_tag(byte: u8) -> Error {
    Error::ProtocolViolation(format!("Unknown Response Type {}.", char::from(byte)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_decoding() {
        assert_eq!(BackendTag::from_byte(b'Z').unwrap(), BackendTag::ReadyForQuery);
        assert_eq!(BackendTag::from_byte(b'd').unwrap(), BackendTag::CopyData);
        assert!(matches!(
            BackendTag::from_byte(b'?'),
            Err(Error::ProtocolViolation(_))
        ));
    }
}
