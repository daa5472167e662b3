//! Field descriptors and decoded rows.

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid};

/// Column metadata from a RowDescription.
///
/// Legacy servers do not report `table_oid` or `column_id`; both stay zero.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Field {
    /// Column label
    pub label: String,
    /// Table OID (0 if not a table column)
    pub table_oid: Oid,
    /// Column attribute number (0 if not a table column)
    pub column_id: i16,
    /// Data type OID
    pub type_oid: Oid,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_len: i16,
    /// Type modifier
    pub type_modifier: i32,
    /// Format of the values delivered for this column.
    ///
    /// Legacy BinaryRow messages switch it to binary when the first such row arrives.
    pub format: FormatCode,
}

impl Field {
    pub fn new(label: impl Into<String>, type_oid: Oid) -> Self {
        Self {
            label: label.into(),
            type_oid,
            ..Self::default()
        }
    }
}

/// One decoded row. `None` cells are SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    cells: Vec<Option<Vec<u8>>>,
}

impl Row {
    pub fn new(cells: Vec<Option<Vec<u8>>>) -> Self {
        Self { cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Raw bytes of column `index`; `None` for NULL or out of range.
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.cells.get(index).and_then(|c| c.as_deref())
    }

    /// Returns true if column `index` is NULL.
    pub fn is_null(&self, index: usize) -> bool {
        matches!(self.cells.get(index), Some(None))
    }

    /// Column `index` as UTF-8 text.
    pub fn get_str(&self, index: usize) -> Result<Option<&str>> {
        match self.get(index) {
            None => Ok(None),
            Some(bytes) => simdutf8::basic::from_utf8(bytes)
                .map(Some)
                .map_err(|_| Error::InvalidUsage(format!("column {index} is not valid UTF-8"))),
        }
    }

    pub fn cells(&self) -> &[Option<Vec<u8>>] {
        &self.cells
    }

    pub fn into_cells(self) -> Vec<Option<Vec<u8>>> {
        self.cells
    }
}

/// Copy `bytes` into a new buffer, reporting allocation failure instead of aborting.
pub(crate) fn try_copy_cell(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut cell = Vec::new();
    cell.try_reserve_exact(bytes.len()).ok()?;
    cell.extend_from_slice(bytes);
    Some(cell)
}
