//! Common wire protocol types.

/// PostgreSQL Object Identifier (OID)
pub type Oid = u32;

/// Well-known type OIDs.
pub mod oid {
    use super::Oid;

    /// Let the server infer the type
    pub const UNSPECIFIED: Oid = 0;
    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIMESTAMP: Oid = 1114;
    pub const NUMERIC: Oid = 1700;
    /// Placeholder type for output-only function parameters
    pub const VOID: Oid = 2278;
}

/// Data format code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i16)]
pub enum FormatCode {
    #[default]
    Text = 0,
    Binary = 1,
}

impl FormatCode {
    /// Unknown codes are treated as text.
    pub fn from_code(value: i16) -> Self {
        match value {
            1 => FormatCode::Binary,
            _ => FormatCode::Text,
        }
    }
}

/// Transaction status of a session.
///
/// Modern servers report it in every ReadyForQuery; on legacy servers it is
/// tracked from BEGIN/COMMIT/ROLLBACK command tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Not inside a transaction block
    #[default]
    Idle = b'I',
    /// Inside a transaction block
    InTransaction = b'T',
    /// Inside a failed transaction block (queries rejected until rollback)
    Failed = b'E',
}

impl TransactionStatus {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}
