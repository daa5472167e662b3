//! Wire encoding and decoding primitives.
//!
//! Every multi-byte integer is big-endian on the wire, for both protocol
//! generations.

use crate::error::{Error, Result};

#[inline]
fn take<'a, const N: usize>(data: &'a [u8], what: &str) -> Result<([u8; N], &'a [u8])> {
    match data.split_first_chunk::<N>() {
        Some((head, rest)) => Ok((*head, rest)),
        None => Err(Error::ProtocolViolation(format!(
            "{what}: buffer too short: {} < {N}",
            data.len()
        ))),
    }
}

/// Read 1-byte unsigned integer.
#[inline]
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    let ([b], rest) = take::<1>(data, "read_u8")?;
    Ok((b, rest))
}

/// Read 2-byte big-endian signed integer.
#[inline]
pub fn read_i16(data: &[u8]) -> Result<(i16, &[u8])> {
    let (raw, rest) = take::<2>(data, "read_i16")?;
    Ok((i16::from_be_bytes(raw), rest))
}

/// Read 4-byte big-endian signed integer.
#[inline]
pub fn read_i32(data: &[u8]) -> Result<(i32, &[u8])> {
    let (raw, rest) = take::<4>(data, "read_i32")?;
    Ok((i32::from_be_bytes(raw), rest))
}

/// Read 4-byte big-endian unsigned integer.
#[inline]
pub fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    let (raw, rest) = take::<4>(data, "read_u32")?;
    Ok((u32::from_be_bytes(raw), rest))
}

/// Read fixed-length bytes.
#[inline]
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    data.split_at_checked(len).ok_or_else(|| {
        Error::ProtocolViolation(format!(
            "read_bytes: buffer too short: {} < {len}",
            data.len()
        ))
    })
}

/// Read a NUL-terminated string, returning the bytes without the terminator.
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let pos = memchr::memchr(0, data).ok_or_else(|| {
        Error::ProtocolViolation("read_cstring: no null terminator found".into())
    })?;
    let (head, rest) = data.split_at(pos);
    Ok((head, rest.get(1..).unwrap_or_default()))
}

/// Read a NUL-terminated UTF-8 string.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::basic::from_utf8(bytes)
        .map_err(|_| Error::ProtocolViolation("read_cstr: invalid UTF-8".into()))?;
    Ok((s, rest))
}

#[inline]
pub fn write_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

#[inline]
pub fn write_i16(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

#[inline]
pub fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

#[inline]
pub fn write_bytes(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(data);
}

/// Write a NUL-terminated string.
#[inline]
pub fn write_cstring(out: &mut Vec<u8>, s: &[u8]) {
    out.extend_from_slice(s);
    out.push(0);
}

#[inline]
pub fn write_cstr(out: &mut Vec<u8>, s: &str) {
    write_cstring(out, s.as_bytes());
}

/// Convert a length to the i32 used by length-prefixed fields.
pub fn wire_len(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| {
        Error::InvalidParameterValue(format!("Value of {len} bytes is too large to send"))
    })
}

/// Builds one v3 message in place, patching the length once the body is written.
///
/// Layout: optional type byte (not counted), i32 length (counts itself), body.
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start a tagged message.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        Self::new_startup(buf)
    }

    /// Start an untagged message (startup, SSL and cancel requests).
    pub fn new_startup(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0; 4]);
        Self { buf, start }
    }

    pub fn buf(&mut self) -> &mut Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        write_u8(self.buf, value);
    }

    pub fn write_i16(&mut self, value: i16) {
        write_i16(self.buf, value);
    }

    pub fn write_i32(&mut self, value: i32) {
        write_i32(self.buf, value);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        write_bytes(self.buf, data);
    }

    pub fn write_cstring(&mut self, s: &[u8]) {
        write_cstring(self.buf, s);
    }

    pub fn write_cstr(&mut self, s: &str) {
        write_cstr(self.buf, s);
    }

    /// Fill in the length field.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        if let Some(slot) = self.buf.get_mut(self.start..self.start + 4) {
            slot.copy_from_slice(&len.to_be_bytes());
        }
    }
}
