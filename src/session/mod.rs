//! Established sessions.
//!
//! A [`Session`] speaks exactly one protocol generation, chosen by the
//! handshake. Both generations expose the same request surface through
//! [`SessionProtocol`]; copy is modern-only.

pub(crate) mod bootstrap;
mod copy;
mod dispatch;
pub(crate) mod legacy;
pub(crate) mod modern;

pub use copy::{CopyIn, CopyOperation, CopyOut, CopyState};

use std::collections::HashMap;
use std::time::Duration;

use crate::auth::AuthNegotiator;
use crate::encoding::Encoding;
use crate::error::{Error, ErrorFields, Result};
use crate::handler::ResultHandler;
use crate::handshake::{self, Target};
use crate::opts::Opts;
use crate::params::{ParameterList, SimpleParameterList};
use crate::protocol::frontend::write_cancel_request;
use crate::protocol::types::TransactionStatus;
use crate::query::Query;

pub use self::legacy::LegacySession;
pub use self::modern::ModernSession;

/// Asynchronous notification from LISTEN/NOTIFY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub pid: i32,
    pub channel: String,
    /// Always empty on legacy servers
    pub payload: String,
}

/// Per-execute behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryFlags {
    /// Do not cache a named server-side statement
    pub one_shot: bool,
    /// Do not wrap the request in an implicit BEGIN
    pub suppress_begin: bool,
    /// Only resolve parameter and result types; nothing is executed
    pub describe_only: bool,
    /// Discard result rows
    pub no_results: bool,
    /// Skip the portal Describe
    pub no_metadata: bool,
    /// Deliver the command status after a row set as well
    pub both_rows_and_status: bool,
}

/// Process id and secret key for out-of-band cancel requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKey {
    pub pid: i32,
    pub secret: i32,
}

/// Session-wide state shared by both generations.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub server_version: String,
    pub backend_key: Option<BackendKey>,
    pub transaction_status: TransactionStatus,
    pub standard_conforming_strings: bool,
    pub parameters: HashMap<String, String>,
    pub warnings: Vec<ErrorFields>,
    pub notifications: Vec<Notification>,
    pub target: Target,
    pub connect_timeout: Option<Duration>,
}

impl SessionState {
    pub fn new(target: Target, connect_timeout: Option<Duration>) -> Self {
        Self {
            server_version: String::new(),
            backend_key: None,
            transaction_status: TransactionStatus::Idle,
            standard_conforming_strings: false,
            parameters: HashMap::new(),
            warnings: Vec::new(),
            notifications: Vec::new(),
            target,
            connect_timeout,
        }
    }

    /// Apply a ParameterStatus report.
    ///
    /// The session requires UTF-8 text and ISO dates; a server switching
    /// either away is a protocol violation, as is an unknown value for
    /// `standard_conforming_strings`.
    pub fn apply_parameter(&mut self, name: &str, value: &str) -> Result<()> {
        tracing::debug!(" <=BE ParameterStatus({name} = {value})");
        match name {
            "server_version" => self.server_version = value.to_owned(),
            "client_encoding" => {
                if !matches!(value, "UTF8" | "UNICODE") {
                    return Err(Error::ProtocolViolation(format!(
                        "The server's client_encoding parameter was changed to {value}. \
                         The client requires client_encoding to be UTF8 for correct operation."
                    )));
                }
            }
            "DateStyle" => {
                if !value.starts_with("ISO") {
                    return Err(Error::ProtocolViolation(format!(
                        "The server's DateStyle parameter was changed to {value}. \
                         The client requires DateStyle to begin with ISO for correct operation."
                    )));
                }
            }
            "standard_conforming_strings" => {
                self.standard_conforming_strings = match value {
                    "on" => true,
                    "off" => false,
                    _ => {
                        return Err(Error::ProtocolViolation(format!(
                            "The server's standard_conforming_strings parameter was reported \
                             as {value}. The client expects on or off."
                        )));
                    }
                };
            }
            _ => {}
        }
        self.parameters.insert(name.to_owned(), value.to_owned());
        Ok(())
    }

    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            target: self.target.clone(),
            key: self.backend_key,
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Request surface shared by both protocol generations.
pub(crate) trait SessionProtocol {
    fn state(&self) -> &SessionState;

    fn state_mut(&mut self) -> &mut SessionState;

    fn encoding(&self) -> Encoding;

    fn protocol_version(&self) -> u8;

    fn execute(
        &mut self,
        query: &Query,
        params: &mut ParameterList,
        handler: &mut dyn ResultHandler,
        max_rows: u32,
        flags: QueryFlags,
    ) -> Result<()>;

    fn fastpath_call(
        &mut self,
        fnid: i32,
        params: &mut SimpleParameterList,
        suppress_begin: bool,
    ) -> Result<Option<Vec<u8>>>;

    fn process_notifies(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Send Terminate and close the socket.
    fn close(&mut self);
}

/// Cloneable handle that cancels the statement running on a session.
///
/// It can be moved to another thread while the session is blocked.
#[derive(Debug, Clone)]
pub struct CancelToken {
    target: Target,
    key: Option<BackendKey>,
    connect_timeout: Option<Duration>,
}

impl CancelToken {
    /// Ask the server to cancel the running statement.
    ///
    /// Fire-and-forget: failures are logged and swallowed, and the statement
    /// may finish anyway.
    pub fn cancel(&self) {
        if let Err(e) = self.send() {
            tracing::warn!("cancel request to {} failed: {e}", self.target);
        }
    }

    fn send(&self) -> Result<()> {
        let Some(key) = self.key else {
            tracing::debug!("no backend key, cancel request not sent");
            return Ok(());
        };
        tracing::debug!(" FE=> CancelRequest(pid={})", key.pid);
        let mut stream = handshake::open_socket(&self.target, self.connect_timeout)?;
        let mut request = Vec::with_capacity(16);
        write_cancel_request(&mut request, key.pid, key.secret);
        stream.write_all(&request)?;
        stream.flush()?;
        // The server closes the socket once it has read the request.
        stream.drain()?;
        Ok(())
    }
}

/// A connected session.
pub enum Session {
    Legacy(LegacySession),
    Modern(ModernSession),
}

fn check_shape(query: &Query, params: &ParameterList) -> Result<()> {
    if params.subparams().len() != query.statements().len()
        || params.param_count() != query.param_count()
    {
        return Err(Error::InvalidUsage(format!(
            "The parameter list has {} parameters, the query expects {}",
            params.param_count(),
            query.param_count()
        )));
    }
    Ok(())
}

impl Session {
    /// Connect using `opts`.
    pub fn connect<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        handshake::open(&opts, None)
    }

    /// Connect with a GSSAPI/SSPI token provider.
    pub fn connect_with_negotiator(
        opts: &Opts,
        negotiator: &mut dyn AuthNegotiator,
    ) -> Result<Self> {
        handshake::open(opts, Some(negotiator))
    }

    fn protocol(&self) -> &dyn SessionProtocol {
        match self {
            Session::Legacy(s) => s,
            Session::Modern(s) => s,
        }
    }

    fn protocol_mut(&mut self) -> &mut dyn SessionProtocol {
        match self {
            Session::Legacy(s) => s,
            Session::Modern(s) => s,
        }
    }

    /// Run `query` with `params`, feeding every result to `handler`.
    ///
    /// Errors reported by the server are delivered to the handler and the
    /// outcome is whatever `handle_completion` returns. Misuse that is caught
    /// before anything is sent returns an error directly.
    pub fn execute(
        &mut self,
        query: &Query,
        params: &mut ParameterList,
        handler: &mut dyn ResultHandler,
        max_rows: u32,
        flags: QueryFlags,
    ) -> Result<()> {
        check_shape(query, params)?;
        self.protocol_mut()
            .execute(query, params, handler, max_rows, flags)
    }

    /// Run unparameterized SQL with default flags.
    pub fn execute_sql(&mut self, sql: &str, handler: &mut dyn ResultHandler) -> Result<()> {
        let query = Query::parse(sql, false);
        let mut params = query.create_parameter_list();
        self.execute(&query, &mut params, handler, 0, QueryFlags::default())
    }

    /// Call a server function by OID through the fast-path interface.
    ///
    /// Returns the raw result bytes, `None` for NULL.
    pub fn fastpath_call(
        &mut self,
        fnid: i32,
        params: &mut SimpleParameterList,
        suppress_begin: bool,
    ) -> Result<Option<Vec<u8>>> {
        self.protocol_mut()
            .fastpath_call(fnid, params, suppress_begin)
    }

    /// Drain notifications and notices that arrived while idle.
    pub fn process_notifies(&mut self) -> Result<()> {
        self.protocol_mut().process_notifies()
    }

    /// Start a COPY. The session is locked to the returned operation until it ends.
    pub fn start_copy(&mut self, sql: &str, suppress_begin: bool) -> Result<CopyOperation<'_>> {
        match self {
            Session::Modern(session) => session.start_copy(sql, suppress_begin),
            Session::Legacy(_) => Err(Error::NotImplemented(
                "Copy not implemented for protocol version 2".into(),
            )),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.protocol().state().cancel_token()
    }

    /// Cancel the running statement out of band. See [`CancelToken::cancel`].
    pub fn cancel(&self) {
        self.cancel_token().cancel();
    }

    pub fn close(&mut self) {
        self.protocol_mut().close();
    }

    pub fn is_closed(&self) -> bool {
        self.protocol().is_closed()
    }

    pub fn take_warnings(&mut self) -> Vec<ErrorFields> {
        std::mem::take(&mut self.protocol_mut().state_mut().warnings)
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.protocol_mut().state_mut().notifications)
    }

    pub fn server_version(&self) -> &str {
        &self.protocol().state().server_version
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.protocol().state().transaction_status
    }

    pub fn standard_conforming_strings(&self) -> bool {
        self.protocol().state().standard_conforming_strings
    }

    /// 2 or 3.
    pub fn protocol_version(&self) -> u8 {
        self.protocol().protocol_version()
    }

    /// Last reported value of a server parameter.
    pub fn parameter_status(&self, name: &str) -> Option<&str> {
        self.protocol()
            .state()
            .parameters
            .get(name)
            .map(String::as_str)
    }

    pub fn backend_key(&self) -> Option<BackendKey> {
        self.protocol().state().backend_key
    }

    pub fn encoding(&self) -> Encoding {
        self.protocol().encoding()
    }
}

/// Numeric comparison of a dotted version such as `7.4.1` or `8.1devel`.
pub(crate) fn version_at_least(version: &str, major: u32, minor: u32) -> bool {
    let mut parts = version.split('.').map(|part| {
        let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
        digits.parse::<u32>().unwrap_or(0)
    });
    let found = (parts.next().unwrap_or(0), parts.next().unwrap_or(0));
    found >= (major, minor)
}
