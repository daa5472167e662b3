//! Error types for zero-pgwire.

use thiserror::Error;

/// Result type for zero-pgwire operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Fields of a server ErrorResponse or NoticeResponse.
///
/// Legacy (v2) servers only send a single text line; it lands in `message`
/// with the severity split off when one is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary message
    pub message: Option<String>,
    /// Detailed explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the problem
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Position in internal query
    pub internal_position: Option<u32>,
    /// Failed internal command text
    pub internal_query: Option<String>,
    /// Context/stack trace
    pub where_: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub data_type: Option<String>,
    pub constraint: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<u32>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ErrorFields {
    /// Build fields carrying only a message.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{severity}: ")?;
        }
        if let Some(message) = &self.message {
            f.write_str(message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {code})")?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

/// Error type for zero-pgwire.
#[derive(Debug, Error)]
pub enum Error {
    /// Host unreachable or the startup phase failed
    #[error("Unable to connect: {0}")]
    UnableToConnect(String),

    /// Authentication refused or incompatible TLS requirement
    #[error("Connection rejected: {0}")]
    ConnectionRejected(String),

    /// Unexpected message tag or malformed framing; the session is closed
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Out-of-range or unset parameter, or a value that cannot be sent
    #[error("Invalid parameter value: {0}")]
    InvalidParameterValue(String),

    /// I/O failure on the session socket; the session is closed
    #[error("Communication failure: {0}")]
    CommunicationFailure(#[from] std::io::Error),

    /// Feature unsupported on the active protocol generation
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Allocation failure while decoding a result row
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Server ErrorResponse
    #[error("PostgreSQL error: {0}")]
    Server(ErrorFields),

    /// A response was received but could not be interpreted; the session stays usable
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// API misuse, such as touching a finished copy operation
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// Several errors reported for one request, in arrival order
    #[error("{}", display_multiple(.0))]
    Multiple(Vec<Error>),
}

fn display_multiple(errors: &[Error]) -> String {
    let mut out = String::new();
    for (i, err) in errors.iter().enumerate() {
        if i > 0 {
            out.push_str("\nNext: ");
        }
        out.push_str(&err.to_string());
    }
    out
}

impl Error {
    /// Returns true if the session that produced this error is no longer usable.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::ProtocolViolation(_) | Error::CommunicationFailure(_) => true,
            Error::Multiple(errors) => errors.iter().any(Error::is_fatal),
            _ => false,
        }
    }

    /// SQLSTATE of the error.
    ///
    /// Server errors carry their own code; client-side errors map to the
    /// closest standard class.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            Error::UnableToConnect(_) => Some("08001"),
            Error::ConnectionRejected(_) => Some("08004"),
            Error::ProtocolViolation(_) | Error::UnexpectedResponse(_) => Some("08P01"),
            Error::InvalidParameterValue(_) => Some("22023"),
            Error::CommunicationFailure(_) => Some("08006"),
            Error::NotImplemented(_) => Some("0A000"),
            Error::OutOfMemory(_) => Some("53200"),
            Error::InvalidUsage(_) => None,
            #[cfg(feature = "tls")]
            Error::Tls(_) => Some("08001"),
            Error::Multiple(errors) => errors.first().and_then(Error::sqlstate),
        }
    }

    /// Flatten into the list of individual errors.
    pub fn into_vec(self) -> Vec<Error> {
        match self {
            Error::Multiple(errors) => errors,
            other => vec![other],
        }
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized>
    From<zerocopy::error::CastError<Src, Dst>> for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::ProtocolViolation(format!("zerocopy cast error: {err:?}"))
    }
}

/// Collects errors reported during one request cycle.
///
/// Errors are kept in arrival order and surface together once the server
/// signals it is ready for the next request.
#[derive(Debug, Default)]
pub struct ErrorChain {
    errors: Vec<Error>,
}

impl ErrorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: Error) {
        self.errors.extend(error.into_vec());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Collapse into `Ok(())`, the single error, or `Error::Multiple`.
    pub fn into_result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => match self.errors.pop() {
                Some(err) => Err(err),
                None => Ok(()),
            },
            _ => Err(Error::Multiple(self.errors)),
        }
    }
}
