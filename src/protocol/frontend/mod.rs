//! Frontend (client → server) messages of the v3 protocol.
//!
//! Writers append complete messages to an output buffer; the transport
//! sends the buffer on flush. Bind and FunctionCall carry parameter values
//! that may be streamed, so they are written directly by the session.

pub mod auth;
pub mod copy;
pub mod extended;
pub mod simple;
pub mod startup;

pub use auth::{md5_password, write_password, write_sasl_initial_response, write_sasl_response};
pub use copy::{write_copy_data, write_copy_done, write_copy_fail};
pub use extended::{
    write_close_statement, write_describe_portal, write_describe_statement, write_execute,
    write_parse, write_sync,
};
pub use simple::write_query;
pub use startup::{write_cancel_request, write_ssl_request, write_startup, write_terminate};

/// Frontend message type bytes.
pub mod msg_type {
    /// Password and every SASL/GSS response
    pub const PASSWORD: u8 = b'p';
    pub const QUERY: u8 = b'Q';
    pub const PARSE: u8 = b'P';
    pub const BIND: u8 = b'B';
    pub const EXECUTE: u8 = b'E';
    pub const DESCRIBE: u8 = b'D';
    pub const CLOSE: u8 = b'C';
    pub const SYNC: u8 = b'S';
    pub const FUNCTION_CALL: u8 = b'F';
    pub const COPY_DATA: u8 = b'd';
    pub const COPY_DONE: u8 = b'c';
    pub const COPY_FAIL: u8 = b'f';
    pub const TERMINATE: u8 = b'X';
}
