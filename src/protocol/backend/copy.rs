//! COPY sub-protocol backend messages.

use crate::error::Result;
use crate::protocol::codec::{read_i16, read_u8};
use crate::protocol::types::FormatCode;

/// CopyInResponse / CopyOutResponse body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResponse {
    /// Overall row format
    pub format: FormatCode,
    /// Per-column format codes
    pub field_formats: Vec<FormatCode>,
}

impl CopyResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format, rest) = read_u8(payload)?;
        let (count, mut rest) = read_i16(rest)?;

        let mut field_formats = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
        for _ in 0..count {
            let (code, remaining) = read_i16(rest)?;
            field_formats.push(FormatCode::from_code(code));
            rest = remaining;
        }

        Ok(Self {
            format: FormatCode::from_code(i16::from(format)),
            field_formats,
        })
    }
}
