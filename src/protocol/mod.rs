//! Wire protocol encoding and decoding.
//!
//! - `backend`: v3 server → client messages (parsing)
//! - `frontend`: v3 client → server messages (encoding)
//! - `legacy`: v2 framing, tags and writers
//! - `codec`: big-endian integer and C-string primitives
//! - `types`: OIDs, format codes, transaction status

pub mod backend;
pub mod codec;
pub mod frontend;
pub mod legacy;
pub mod types;

pub use types::{FormatCode, Oid, TransactionStatus};
