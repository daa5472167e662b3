//! Extended query and fast-path backend messages.

use crate::error::Result;
use crate::protocol::codec::{read_bytes, read_i16, read_i32, read_u32};
use crate::protocol::types::Oid;

/// ParameterDescription: the parameter types the server resolved for a statement.
pub struct ParameterDescription;

impl ParameterDescription {
    pub fn parse(payload: &[u8]) -> Result<Vec<Oid>> {
        let (count, mut data) = read_i16(payload)?;
        let mut oids = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
        for _ in 0..count {
            let (oid, rest) = read_u32(data)?;
            oids.push(oid);
            data = rest;
        }
        Ok(oids)
    }
}

/// FunctionCallResponse: the result of a fast-path call, `None` for NULL.
pub struct FunctionCallResponse;

impl FunctionCallResponse {
    pub fn parse(payload: &[u8]) -> Result<Option<Vec<u8>>> {
        let (len, rest) = read_i32(payload)?;
        if len < 0 {
            return Ok(None);
        }
        let (value, _) = read_bytes(rest, len as usize)?;
        Ok(Some(value.to_vec()))
    }
}
