//! ErrorResponse and NoticeResponse bodies.

use crate::error::{Error, ErrorFields, Result};
use crate::protocol::codec::{read_cstr, read_u8};

/// Error field type codes.
pub mod field_type {
    pub const SEVERITY: u8 = b'S';
    /// Non-localized severity (9.6+)
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    pub const POSITION: u8 = b'P';
    pub const INTERNAL_POSITION: u8 = b'p';
    pub const INTERNAL_QUERY: u8 = b'q';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const FILE: u8 = b'F';
    pub const LINE: u8 = b'L';
    pub const ROUTINE: u8 = b'R';
}

/// Parse the field list shared by ErrorResponse and NoticeResponse.
pub fn parse_fields(payload: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut data = payload;

    loop {
        let (kind, rest) = read_u8(data)?;
        if kind == 0 {
            break;
        }
        let (value, rest) = read_cstr(rest)?;
        data = rest;

        let text = Some(value.to_owned());
        match kind {
            field_type::SEVERITY => fields.severity = text,
            field_type::SEVERITY_NON_LOCALIZED => {
                if fields.severity.is_none() {
                    fields.severity = text;
                }
            }
            field_type::CODE => fields.code = text,
            field_type::MESSAGE => fields.message = text,
            field_type::DETAIL => fields.detail = text,
            field_type::HINT => fields.hint = text,
            field_type::POSITION => fields.position = value.parse().ok(),
            field_type::INTERNAL_POSITION => fields.internal_position = value.parse().ok(),
            field_type::INTERNAL_QUERY => fields.internal_query = text,
            field_type::WHERE => fields.where_ = text,
            field_type::SCHEMA => fields.schema = text,
            field_type::TABLE => fields.table = text,
            field_type::COLUMN => fields.column = text,
            field_type::DATA_TYPE => fields.data_type = text,
            field_type::CONSTRAINT => fields.constraint = text,
            field_type::FILE => fields.file = text,
            field_type::LINE => fields.line = value.parse().ok(),
            field_type::ROUTINE => fields.routine = text,
            other => tracing::debug!("Unknown error field type: {}", char::from(other)),
        }
    }

    Ok(fields)
}

/// ErrorResponse from the server.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub fields: ErrorFields,
}

impl ErrorResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields(payload)?,
        })
    }

    pub fn into_error(self) -> Error {
        Error::Server(self.fields)
    }
}
