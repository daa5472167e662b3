//! Parameter lists bound to query slots.
//!
//! Slots are indexed from 1. A slot is unset, or holds an inline literal, a
//! string, raw binary bytes, a deferred stream of known length, or NULL.
//! How a value goes on the wire depends on the protocol generation: legacy
//! sessions inline everything into the query text, modern sessions send
//! length-prefixed values in a Bind message.

use std::fmt;
use std::io::Read;

use crate::encoding::Encoding;
use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};

/// A deferred byte stream. It is consumed by the first send.
pub struct StreamParam {
    reader: Box<dyn Read + Send>,
    len: usize,
}

impl StreamParam {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn reader(&mut self) -> &mut dyn Read {
        self.reader.as_mut()
    }
}

impl fmt::Debug for StreamParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamParam({} bytes)", self.len)
    }
}

/// Value held by a set slot.
#[derive(Debug)]
pub enum ParamValue {
    /// SQL text inlined as-is (legacy) or sent in text format (modern)
    Literal(String),
    /// String value; quoted and escaped when inlined
    Text(String),
    /// Binary-format bytes; the slot type decides how legacy sessions inline them
    Binary(Vec<u8>),
    Stream(StreamParam),
    Null,
}

/// Parameter direction for function calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    In,
    Out,
    InOut,
}

#[derive(Debug, Default)]
struct Slot {
    value: Option<ParamValue>,
    oid: Oid,
    direction: Direction,
    encoded: Option<Vec<u8>>,
}

fn out_of_range(index: usize, count: usize) -> Error {
    Error::InvalidParameterValue(format!(
        "The column index is out of range: {index}, number of columns: {count}."
    ))
}

/// Quote and escape a string literal.
///
/// With standard-conforming strings off, backslash and quote are
/// backslash-escaped; with them on, backslashes are literal and quotes are
/// doubled.
pub fn quote_literal(value: &str, standard_conforming_strings: bool) -> String {
    let mut out = String::with_capacity(value.len() + value.len() / 10 + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' if standard_conforming_strings => out.push_str("''"),
            '\'' | '\\' if !standard_conforming_strings => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Append bytea octal escapes (`\\ooo`, or `\ooo` with standard-conforming strings).
pub fn escape_bytea(bytes: &[u8], standard_conforming_strings: bool, out: &mut Vec<u8>) {
    for &b in bytes {
        if !standard_conforming_strings {
            out.push(b'\\');
        }
        out.extend_from_slice(&[b'\\', b'0' + (b >> 6), b'0' + ((b >> 3) & 7), b'0' + (b & 7)]);
    }
}

/// SQL literal for a binary value of a fixed-width type, `None` for other
/// types or a width that does not match.
pub(crate) fn binary_literal(bytes: &[u8], type_oid: Oid) -> Option<String> {
    let literal = match type_oid {
        oid::INT2 => i16::from_be_bytes(bytes.try_into().ok()?).to_string(),
        oid::INT4 => i32::from_be_bytes(bytes.try_into().ok()?).to_string(),
        oid::INT8 => i64::from_be_bytes(bytes.try_into().ok()?).to_string(),
        oid::OID => u32::from_be_bytes(bytes.try_into().ok()?).to_string(),
        oid::FLOAT4 => float_literal(f64::from(f32::from_be_bytes(bytes.try_into().ok()?))),
        oid::FLOAT8 => float_literal(f64::from_be_bytes(bytes.try_into().ok()?)),
        oid::BOOL => match bytes {
            [0] => "false".to_owned(),
            [_] => "true".to_owned(),
            _ => return None,
        },
        _ => return None,
    };
    Some(literal)
}

fn float_literal(value: f64) -> String {
    if value.is_nan() {
        "'NaN'".to_owned()
    } else if value.is_infinite() && value.is_sign_positive() {
        "'Infinity'".to_owned()
    } else if value.is_infinite() {
        "'-Infinity'".to_owned()
    } else {
        value.to_string()
    }
}

fn reject_nul(value: &str) -> Result<()> {
    if value.contains('\0') {
        return Err(Error::InvalidParameterValue(
            "Zero bytes may not occur in string parameters.".into(),
        ));
    }
    Ok(())
}

/// Parameters for a single statement.
#[derive(Debug, Default)]
pub struct SimpleParameterList {
    slots: Vec<Slot>,
}

impl SimpleParameterList {
    pub fn new(count: usize) -> Self {
        let mut slots = Vec::with_capacity(count);
        slots.resize_with(count, Slot::default);
        Self { slots }
    }

    pub fn param_count(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, index: usize) -> Result<&Slot> {
        index
            .checked_sub(1)
            .and_then(|i| self.slots.get(i))
            .ok_or_else(|| out_of_range(index, self.slots.len()))
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Slot> {
        let count = self.slots.len();
        index
            .checked_sub(1)
            .and_then(|i| self.slots.get_mut(i))
            .ok_or_else(|| out_of_range(index, count))
    }

    fn bind(&mut self, index: usize, value: ParamValue, type_oid: Oid) -> Result<()> {
        let slot = self.slot_mut(index)?;
        slot.value = Some(value);
        slot.oid = type_oid;
        slot.encoded = None;
        Ok(())
    }

    /// Bind SQL text that is inlined without quoting.
    pub fn set_literal(&mut self, index: usize, value: &str, type_oid: Oid) -> Result<()> {
        reject_nul(value)?;
        self.bind(index, ParamValue::Literal(value.to_owned()), type_oid)
    }

    /// Bind a string of server-inferred type.
    pub fn set_string(&mut self, index: usize, value: &str) -> Result<()> {
        self.set_typed_string(index, value, oid::UNSPECIFIED)
    }

    /// Bind a string. Embedded NUL characters cannot be sent and are rejected.
    pub fn set_typed_string(&mut self, index: usize, value: &str, type_oid: Oid) -> Result<()> {
        reject_nul(value)?;
        self.bind(index, ParamValue::Text(value.to_owned()), type_oid)
    }

    pub fn set_int(&mut self, index: usize, value: i32) -> Result<()> {
        self.bind(index, ParamValue::Binary(value.to_be_bytes().to_vec()), oid::INT4)
    }

    pub fn set_long(&mut self, index: usize, value: i64) -> Result<()> {
        self.bind(index, ParamValue::Binary(value.to_be_bytes().to_vec()), oid::INT8)
    }

    pub fn set_bytea(&mut self, index: usize, data: Vec<u8>) -> Result<()> {
        self.bind(index, ParamValue::Binary(data), oid::BYTEA)
    }

    /// Bind `len` bytes to be read from `reader` when the query is sent.
    pub fn set_bytea_stream(
        &mut self,
        index: usize,
        reader: Box<dyn Read + Send>,
        len: usize,
    ) -> Result<()> {
        self.bind(index, ParamValue::Stream(StreamParam { reader, len }), oid::BYTEA)
    }

    /// Bind a value already in the binary format of `type_oid`.
    pub fn set_binary(&mut self, index: usize, data: Vec<u8>, type_oid: Oid) -> Result<()> {
        self.bind(index, ParamValue::Binary(data), type_oid)
    }

    pub fn set_null(&mut self, index: usize, type_oid: Oid) -> Result<()> {
        self.bind(index, ParamValue::Null, type_oid)
    }

    /// Mark a slot as a function output. Output-only slots need no value.
    pub fn register_out_parameter(&mut self, index: usize, type_oid: Oid) -> Result<()> {
        let slot = self.slot_mut(index)?;
        slot.direction = match slot.value {
            Some(_) => Direction::InOut,
            None => Direction::Out,
        };
        if slot.value.is_none() {
            slot.oid = type_oid;
        }
        Ok(())
    }

    pub fn direction(&self, index: usize) -> Result<Direction> {
        Ok(self.slot(index)?.direction)
    }

    pub fn has_out_parameters(&self) -> bool {
        self.slots.iter().any(|s| s.direction != Direction::In)
    }

    fn is_out_only(slot: &Slot) -> bool {
        slot.direction == Direction::Out && slot.value.is_none()
    }

    /// Fail on the first input slot without a value.
    pub fn check_all_set(&self) -> Result<()> {
        match self
            .slots
            .iter()
            .position(|s| s.value.is_none() && !Self::is_out_only(s))
        {
            Some(i) => Err(Error::InvalidParameterValue(format!(
                "No value specified for parameter {}.",
                i + 1
            ))),
            None => Ok(()),
        }
    }

    /// Type OIDs in slot order. Output-only slots are typed `void`.
    pub fn type_oids(&self) -> Vec<Oid> {
        self.slots
            .iter()
            .map(|s| if Self::is_out_only(s) { oid::VOID } else { s.oid })
            .collect()
    }

    pub fn type_oid(&self, index: usize) -> Result<Oid> {
        Ok(self.slot(index)?.oid)
    }

    /// Adopt a server-resolved type for a slot bound without one.
    pub(crate) fn resolve_type(&mut self, index: usize, type_oid: Oid) {
        if let Ok(slot) = self.slot_mut(index) {
            if slot.oid == oid::UNSPECIFIED {
                slot.oid = type_oid;
            }
        }
    }

    pub fn value(&self, index: usize) -> Result<Option<&ParamValue>> {
        let slot = self.slot(index)?;
        Ok(if Self::is_out_only(slot) {
            Some(&ParamValue::Null)
        } else {
            slot.value.as_ref()
        })
    }

    pub(crate) fn value_mut(&mut self, index: usize) -> Result<Option<&mut ParamValue>> {
        Ok(self.slot_mut(index)?.value.as_mut())
    }

    /// Whether the value goes on the wire in binary format.
    pub(crate) fn is_binary(&self, index: usize) -> bool {
        matches!(
            self.slot(index).map(|s| &s.value),
            Ok(Some(ParamValue::Binary(_) | ParamValue::Stream(_)))
        )
    }

    /// Wire length of a v3 value, `None` for NULL. Text is encoded once and cached.
    pub(crate) fn wire_len(&mut self, index: usize, encoding: Encoding) -> Result<Option<usize>> {
        let slot = self.slot_mut(index)?;
        if Self::is_out_only(slot) {
            return Ok(None);
        }
        Ok(match &slot.value {
            None | Some(ParamValue::Null) => None,
            Some(ParamValue::Binary(data)) => Some(data.len()),
            Some(ParamValue::Stream(stream)) => Some(stream.len),
            Some(ParamValue::Literal(text) | ParamValue::Text(text)) => {
                if slot.encoded.is_none() {
                    slot.encoded = Some(encoding.encode(text).into_owned());
                }
                slot.encoded.as_ref().map(Vec::len)
            }
        })
    }

    /// Encoded text of a literal or string slot, valid after [`Self::wire_len`].
    pub(crate) fn encoded(&self, index: usize) -> Option<&[u8]> {
        self.slot(index).ok()?.encoded.as_deref()
    }

    /// Display form of one slot.
    ///
    /// Unset is `?`, NULL is `NULL`, strings are quoted, streams and byte
    /// buffers are summarised, binary integers are decoded.
    pub fn render(&self, index: usize) -> String {
        let Ok(slot) = self.slot(index) else {
            return "?".to_owned();
        };
        match &slot.value {
            None => "?".to_owned(),
            Some(ParamValue::Null) => "NULL".to_owned(),
            Some(ParamValue::Literal(text)) => text.clone(),
            Some(ParamValue::Text(text)) => quote_literal(text, false),
            Some(ParamValue::Binary(data)) => match binary_literal(data, slot.oid) {
                Some(literal) => literal,
                None => format!("<stream of {} bytes>", data.len()),
            },
            Some(ParamValue::Stream(stream)) => format!("<stream of {} bytes>", stream.len),
        }
    }

    /// Duplicate values and types. Streams are single-use, so their slots come back unset.
    pub fn copy(&self) -> Self {
        let slots = self
            .slots
            .iter()
            .map(|s| Slot {
                value: match &s.value {
                    Some(ParamValue::Literal(t)) => Some(ParamValue::Literal(t.clone())),
                    Some(ParamValue::Text(t)) => Some(ParamValue::Text(t.clone())),
                    Some(ParamValue::Binary(b)) => Some(ParamValue::Binary(b.clone())),
                    Some(ParamValue::Null) => Some(ParamValue::Null),
                    Some(ParamValue::Stream(_)) | None => None,
                },
                oid: s.oid,
                direction: s.direction,
                encoded: None,
            })
            .collect();
        Self { slots }
    }

    /// Unset every slot.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot::default();
        }
    }
}

/// Parameters for a composite query, one sub-list per statement.
#[derive(Debug)]
pub struct CompositeParameterList {
    subparams: Vec<SimpleParameterList>,
    offsets: Vec<usize>,
    total: usize,
}

impl CompositeParameterList {
    /// `offsets[i]` is the number of parameters before statement `i`.
    pub fn new(subparams: Vec<SimpleParameterList>, offsets: Vec<usize>) -> Self {
        let total = subparams.iter().map(SimpleParameterList::param_count).sum();
        Self {
            subparams,
            offsets,
            total,
        }
    }

    /// Map a global index to (statement, local index).
    fn locate(&self, index: usize) -> Result<(usize, usize)> {
        if index < 1 || index > self.total {
            return Err(out_of_range(index, self.total));
        }
        self.offsets
            .iter()
            .enumerate()
            .rev()
            .find(|&(_, &offset)| offset < index)
            .map(|(i, &offset)| (i, index - offset))
            .ok_or_else(|| out_of_range(index, self.total))
    }

    pub fn subparams(&self) -> &[SimpleParameterList] {
        &self.subparams
    }
}

/// Parameters shaped like their query.
#[derive(Debug)]
pub enum ParameterList {
    Simple(SimpleParameterList),
    Composite(CompositeParameterList),
}

impl ParameterList {
    fn with_slot<T>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut SimpleParameterList, usize) -> Result<T>,
    ) -> Result<T> {
        match self {
            ParameterList::Simple(list) => f(list, index),
            ParameterList::Composite(list) => {
                let (sub, local) = list.locate(index)?;
                match list.subparams.get_mut(sub) {
                    Some(params) => f(params, local),
                    None => Err(out_of_range(index, list.total)),
                }
            }
        }
    }

    pub fn param_count(&self) -> usize {
        match self {
            ParameterList::Simple(list) => list.param_count(),
            ParameterList::Composite(list) => list.total,
        }
    }

    pub fn set_literal(&mut self, index: usize, value: &str, type_oid: Oid) -> Result<()> {
        self.with_slot(index, |p, i| p.set_literal(i, value, type_oid))
    }

    pub fn set_string(&mut self, index: usize, value: &str) -> Result<()> {
        self.with_slot(index, |p, i| p.set_string(i, value))
    }

    pub fn set_typed_string(&mut self, index: usize, value: &str, type_oid: Oid) -> Result<()> {
        self.with_slot(index, |p, i| p.set_typed_string(i, value, type_oid))
    }

    pub fn set_int(&mut self, index: usize, value: i32) -> Result<()> {
        self.with_slot(index, |p, i| p.set_int(i, value))
    }

    pub fn set_long(&mut self, index: usize, value: i64) -> Result<()> {
        self.with_slot(index, |p, i| p.set_long(i, value))
    }

    pub fn set_bytea(&mut self, index: usize, data: Vec<u8>) -> Result<()> {
        self.with_slot(index, |p, i| p.set_bytea(i, data))
    }

    pub fn set_bytea_stream(
        &mut self,
        index: usize,
        reader: Box<dyn Read + Send>,
        len: usize,
    ) -> Result<()> {
        self.with_slot(index, |p, i| p.set_bytea_stream(i, reader, len))
    }

    pub fn set_binary(&mut self, index: usize, data: Vec<u8>, type_oid: Oid) -> Result<()> {
        self.with_slot(index, |p, i| p.set_binary(i, data, type_oid))
    }

    pub fn set_null(&mut self, index: usize, type_oid: Oid) -> Result<()> {
        self.with_slot(index, |p, i| p.set_null(i, type_oid))
    }

    pub fn register_out_parameter(&mut self, index: usize, type_oid: Oid) -> Result<()> {
        self.with_slot(index, |p, i| p.register_out_parameter(i, type_oid))
    }

    pub fn has_out_parameters(&self) -> bool {
        self.subparams().iter().any(SimpleParameterList::has_out_parameters)
    }

    /// Fail on the first unset input slot, reporting its global index.
    pub fn check_all_set(&self) -> Result<()> {
        match self {
            ParameterList::Simple(list) => list.check_all_set(),
            ParameterList::Composite(list) => {
                for (params, offset) in list.subparams.iter().zip(&list.offsets) {
                    if let Err(Error::InvalidParameterValue(_)) = params.check_all_set() {
                        let local = params
                            .slots
                            .iter()
                            .position(|s| {
                                s.value.is_none() && !SimpleParameterList::is_out_only(s)
                            })
                            .unwrap_or(0);
                        return Err(Error::InvalidParameterValue(format!(
                            "No value specified for parameter {}.",
                            offset + local + 1
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    /// Display form of the slot at a global index; `?` when out of range.
    pub fn render(&self, index: usize) -> String {
        match self {
            ParameterList::Simple(list) => list.render(index),
            ParameterList::Composite(list) => match list.locate(index) {
                Ok((sub, local)) => list
                    .subparams
                    .get(sub)
                    .map_or_else(|| "?".to_owned(), |p| p.render(local)),
                Err(_) => "?".to_owned(),
            },
        }
    }

    /// Per-statement lists in statement order.
    pub fn subparams(&self) -> &[SimpleParameterList] {
        match self {
            ParameterList::Simple(list) => std::slice::from_ref(list),
            ParameterList::Composite(list) => &list.subparams,
        }
    }

    pub(crate) fn subparams_mut(&mut self) -> &mut [SimpleParameterList] {
        match self {
            ParameterList::Simple(list) => std::slice::from_mut(list),
            ParameterList::Composite(list) => &mut list.subparams,
        }
    }

    pub fn copy(&self) -> Self {
        match self {
            ParameterList::Simple(list) => ParameterList::Simple(list.copy()),
            ParameterList::Composite(list) => ParameterList::Composite(CompositeParameterList {
                subparams: list.subparams.iter().map(SimpleParameterList::copy).collect(),
                offsets: list.offsets.clone(),
                total: list.total,
            }),
        }
    }

    pub fn clear(&mut self) {
        for params in self.subparams_mut() {
            params.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn composite() -> ParameterList {
        ParameterList::Composite(CompositeParameterList::new(
            vec![
                SimpleParameterList::new(1),
                SimpleParameterList::new(0),
                SimpleParameterList::new(2),
            ],
            vec![0, 1, 1],
        ))
    }

    #[test]
    fn index_bounds() {
        let mut params = SimpleParameterList::new(2);
        for bad in [0, 3, 100] {
            let err = params.set_string(bad, "x").unwrap_err();
            assert!(matches!(err, Error::InvalidParameterValue(_)));
            assert!(params.set_null(bad, 0).is_err());
            assert!(params.register_out_parameter(bad, 0).is_err());
        }
        assert_eq!(
            params.set_int(3, 1).unwrap_err().to_string(),
            "Invalid parameter value: The column index is out of range: 3, number of columns: 2."
        );

        let mut params = composite();
        assert!(params.set_int(0, 1).is_err());
        assert!(params.set_int(4, 1).is_err());
        assert!(params.set_int(3, 1).is_ok());
    }

    #[test]
    fn unset_slots_are_reported() {
        let mut params = SimpleParameterList::new(3);
        params.set_int(1, 1).unwrap();
        params.set_null(3, oid::INT4).unwrap();
        assert_eq!(
            params.check_all_set().unwrap_err().to_string(),
            "Invalid parameter value: No value specified for parameter 2."
        );
        params.set_string(2, "b").unwrap();
        assert!(params.check_all_set().is_ok());

        let mut params = composite();
        params.set_int(1, 1).unwrap();
        params.set_int(2, 2).unwrap();
        assert_eq!(
            params.check_all_set().unwrap_err().to_string(),
            "Invalid parameter value: No value specified for parameter 3."
        );
    }

    #[test]
    fn composite_lookup_uses_last_lower_offset() {
        let mut params = composite();
        params.set_string(1, "a").unwrap();
        params.set_string(2, "b").unwrap();
        params.set_string(3, "c").unwrap();
        let subs = params.subparams();
        assert_eq!(subs[0].render(1), "'a'");
        assert_eq!(subs[2].render(1), "'b'");
        assert_eq!(subs[2].render(2), "'c'");
        assert_eq!(params.render(3), "'c'");
    }

    #[test]
    fn embedded_nul_is_rejected() {
        let mut params = SimpleParameterList::new(1);
        let err = params.set_string(1, "a\0b").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid parameter value: Zero bytes may not occur in string parameters."
        );
        assert_eq!(params.render(1), "?");

        let err = params
            .set_literal(1, "1\0; DROP TABLE t", oid::UNSPECIFIED)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameterValue(_)));
        assert_eq!(params.render(1), "?");
    }

    #[test]
    fn fixed_width_binary_literals() {
        assert_eq!(binary_literal(&(-7i16).to_be_bytes(), oid::INT2).as_deref(), Some("-7"));
        assert_eq!(
            binary_literal(&4_000_000_000u32.to_be_bytes(), oid::OID).as_deref(),
            Some("4000000000")
        );
        assert_eq!(binary_literal(&1.5f64.to_be_bytes(), oid::FLOAT8).as_deref(), Some("1.5"));
        assert_eq!(binary_literal(&0.25f32.to_be_bytes(), oid::FLOAT4).as_deref(), Some("0.25"));
        assert_eq!(binary_literal(&f64::NAN.to_be_bytes(), oid::FLOAT8).as_deref(), Some("'NaN'"));
        assert_eq!(
            binary_literal(&f32::NEG_INFINITY.to_be_bytes(), oid::FLOAT4).as_deref(),
            Some("'-Infinity'")
        );
        assert_eq!(binary_literal(&[1], oid::BOOL).as_deref(), Some("true"));
        assert_eq!(binary_literal(&[0], oid::BOOL).as_deref(), Some("false"));
        assert_eq!(binary_literal(&[0, 1], oid::INT4), None);
        assert_eq!(binary_literal(&[1, 2, 3], oid::BYTEA), None);
        assert_eq!(binary_literal(&[0; 8], oid::TIMESTAMP), None);
    }

    #[test]
    fn rendering() {
        let mut params = SimpleParameterList::new(6);
        params.set_null(1, oid::TEXT).unwrap();
        params.set_literal(2, "now()", oid::UNSPECIFIED).unwrap();
        params.set_string(3, "it's").unwrap();
        params.set_int(4, -5).unwrap();
        params
            .set_bytea_stream(5, Box::new(std::io::empty()), 12)
            .unwrap();
        assert_eq!(params.render(1), "NULL");
        assert_eq!(params.render(2), "now()");
        assert_eq!(params.render(3), r"'it\'s'");
        assert_eq!(params.render(4), "-5");
        assert_eq!(params.render(5), "<stream of 12 bytes>");
        assert_eq!(params.render(6), "?");
        assert_eq!(params.render(7), "?");
    }

    #[test]
    fn escaping_modes() {
        assert_eq!(quote_literal(r"a'b\c", false), r"'a\'b\\c'");
        assert_eq!(quote_literal(r"a'b\c", true), r"'a''b\c'");

        let mut out = Vec::new();
        escape_bytea(&[0, b'A', 255], false, &mut out);
        assert_eq!(out, br"\\000\\101\\377");
        out.clear();
        escape_bytea(&[8], true, &mut out);
        assert_eq!(out, br"\010");
    }

    #[test]
    fn copy_drops_streams() {
        let mut params = SimpleParameterList::new(2);
        params.set_string(1, "x").unwrap();
        params
            .set_bytea_stream(2, Box::new(std::io::empty()), 0)
            .unwrap();
        let copy = params.copy();
        assert_eq!(copy.render(1), "'x'");
        assert_eq!(copy.render(2), "?");
        assert!(copy.check_all_set().is_err());
    }

    #[test]
    fn rebinding_invalidates_encoded_text() {
        let mut params = SimpleParameterList::new(1);
        params.set_string(1, "abc").unwrap();
        assert_eq!(params.wire_len(1, Encoding::Utf8).unwrap(), Some(3));
        assert_eq!(params.encoded(1), Some(&b"abc"[..]));
        params.set_string(1, "abcdef").unwrap();
        assert_eq!(params.encoded(1), None);
        assert_eq!(params.wire_len(1, Encoding::Utf8).unwrap(), Some(6));
    }

    #[test]
    fn out_parameters() {
        let mut params = SimpleParameterList::new(2);
        params.set_int(1, 7).unwrap();
        params.register_out_parameter(2, oid::INT4).unwrap();
        assert!(params.has_out_parameters());
        assert!(params.check_all_set().is_ok());
        assert_eq!(params.type_oids(), [oid::INT4, oid::VOID]);
        assert_eq!(params.wire_len(2, Encoding::Utf8).unwrap(), None);
        assert_eq!(params.direction(2).unwrap(), Direction::Out);

        params.register_out_parameter(1, oid::INT4).unwrap();
        assert_eq!(params.direction(1).unwrap(), Direction::InOut);
    }
}
