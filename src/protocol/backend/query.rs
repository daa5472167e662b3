//! Query result backend messages.

use std::mem::size_of;

use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U32 as U32BE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i16, read_i32};
use crate::protocol::types::FormatCode;
use crate::row::{Field, Row, try_copy_cell};

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
struct FieldDescriptionTail {
    table_oid: U32BE,
    column_id: I16BE,
    type_oid: U32BE,
    type_size: I16BE,
    type_modifier: I32BE,
    format: I16BE,
}

/// RowDescription.
pub struct RowDescription;

impl RowDescription {
    pub fn parse(payload: &[u8]) -> Result<Vec<Field>> {
        const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

        let (count, mut data) = read_i16(payload)?;
        let mut fields = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
        for _ in 0..count {
            let (label, rest) = read_cstr(data)?;
            let (tail, rest) = read_bytes(rest, TAIL_SIZE)?;
            let tail = FieldDescriptionTail::ref_from_bytes(tail)?;
            fields.push(Field {
                label: label.to_owned(),
                table_oid: tail.table_oid.get(),
                column_id: tail.column_id.get(),
                type_oid: tail.type_oid.get(),
                type_len: tail.type_size.get(),
                type_modifier: tail.type_modifier.get(),
                format: FormatCode::from_code(tail.format.get()),
            });
            data = rest;
        }
        Ok(fields)
    }
}

/// DataRow.
pub struct DataRow;

impl DataRow {
    /// Decode a row into owned cells.
    ///
    /// Returns `Ok(None)` when a cell buffer could not be allocated; the
    /// caller decides whether that is worth reporting.
    pub fn decode(payload: &[u8]) -> Result<Option<Row>> {
        let (count, mut data) = read_i16(payload)?;
        let mut cells = Vec::new();
        if cells.try_reserve_exact(usize::try_from(count).unwrap_or(0)).is_err() {
            return Ok(None);
        }
        for _ in 0..count {
            let (len, rest) = read_i32(data)?;
            if len < 0 {
                cells.push(None);
                data = rest;
                continue;
            }
            let (value, rest) = read_bytes(rest, len as usize)?;
            match try_copy_cell(value) {
                Some(cell) => cells.push(Some(cell)),
                None => return Ok(None),
            }
            data = rest;
        }
        Ok(Some(Row::new(cells)))
    }
}

/// CommandComplete.
pub struct CommandComplete;

impl CommandComplete {
    /// Extract the command tag.
    pub fn parse(payload: &[u8]) -> Result<&str> {
        let (tag, _) = read_cstr(payload)?;
        Ok(tag)
    }
}

/// Update count and inserted OID carried by a command tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandCounts {
    pub update_count: u64,
    pub insert_oid: u32,
}

/// Interpret a command tag such as `INSERT 0 1` or `UPDATE 5`.
///
/// Only INSERT, UPDATE, DELETE and MOVE carry counts; every other tag yields
/// zeros. A tag whose numbers do not parse is `UnexpectedResponse`, which the
/// read loops report without stopping.
pub fn interpret_command_status(status: &str) -> Result<CommandCounts> {
    const COUNTED: [&str; 4] = ["INSERT", "UPDATE", "DELETE", "MOVE"];
    if !COUNTED.iter().any(|verb| status.starts_with(verb)) {
        return Ok(CommandCounts::default());
    }

    let malformed = || {
        Error::UnexpectedResponse(format!(
            "Unable to interpret the update count in command completion tag: {status}."
        ))
    };

    let last_space = status.rfind(' ').ok_or_else(malformed)?;
    let update_count = status
        .get(last_space + 1..)
        .and_then(|s| s.parse().ok())
        .ok_or_else(malformed)?;

    let insert_oid = if status.starts_with("INSERT") {
        let first_space = status.find(' ').ok_or_else(malformed)?;
        status
            .get(first_space + 1..last_space)
            .and_then(|s| s.parse().ok())
            .ok_or_else(malformed)?
    } else {
        0
    };

    Ok(CommandCounts {
        update_count,
        insert_oid,
    })
}

/// Row count from a `COPY n` tag, if the tag is one.
pub fn copy_row_count(status: &str) -> Option<u64> {
    let rest = status.strip_prefix("COPY")?;
    rest.rsplit(' ').next()?.parse().ok()
}
