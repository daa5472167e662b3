//! Answers server authentication requests.
//!
//! [`Authenticator`] is sans-I/O: the handshake feeds it each request and
//! sends back whatever credential it produces, in the framing of the active
//! protocol generation.

mod scram;

pub use scram::ScramSha256;

use crate::encoding::Encoding;
use crate::error::{Error, Result};
use crate::protocol::backend::AuthRequest;
use crate::protocol::frontend::auth::{crypt_password, md5_password};

/// Which security-layer exchange the server asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    Gss,
    Sspi,
}

/// Pluggable GSSAPI/SSPI token exchange.
///
/// The engine only moves tokens; producing them is up to the implementor.
pub trait AuthNegotiator: Send {
    /// Produce the first token for `mechanism`.
    fn initial_token(
        &mut self,
        mechanism: Mechanism,
        user: &str,
        password: Option<&str>,
    ) -> Result<Vec<u8>>;

    /// Consume a server continuation and produce the next token, if any.
    fn continue_token(&mut self, data: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// What to send back for one authentication request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Password or password hash, sent NUL-terminated
    Password(Vec<u8>),
    SaslInitial { mechanism: String, data: Vec<u8> },
    /// SASL continuation or a GSS/SSPI token
    SaslResponse(Vec<u8>),
}

#[derive(Debug, PartialEq, Eq)]
pub enum AuthStep {
    /// Authentication succeeded
    Done,
    Reply(Credential),
    /// Nothing to send; wait for the next request
    Wait,
}

pub struct Authenticator<'a, 'n> {
    user: &'a str,
    password: Option<&'a str>,
    encoding: Encoding,
    negotiator: Option<&'n mut dyn AuthNegotiator>,
    scram: Option<ScramSha256>,
}

fn unsupported(code: i32) -> Error {
    Error::ConnectionRejected(format!(
        "The authentication type {code} is not supported. Check that you have configured \
         the pg_hba.conf file to include the client's IP address or subnet, and that it is \
         using an authentication scheme supported by the driver."
    ))
}

fn malformed(what: &str) -> Error {
    Error::ConnectionRejected(format!("Invalid {what} from the server"))
}

impl<'a, 'n> Authenticator<'a, 'n> {
    pub fn new(user: &'a str, password: Option<&'a str>, encoding: Encoding) -> Self {
        Self {
            user,
            password,
            encoding,
            negotiator: None,
            scram: None,
        }
    }

    pub fn with_negotiator(mut self, negotiator: Option<&'n mut dyn AuthNegotiator>) -> Self {
        self.negotiator = negotiator;
        self
    }

    fn password(&self) -> Result<&'a str> {
        self.password.ok_or_else(|| {
            Error::ConnectionRejected(
                "The server requested password-based authentication, but no password was provided."
                    .into(),
            )
        })
    }

    fn encoded(&self, text: &str) -> Vec<u8> {
        self.encoding.encode(text).into_owned()
    }

    fn negotiate(&mut self, mechanism: Mechanism, code: i32) -> Result<Credential> {
        tracing::debug!(" <=BE AuthenticationReq{mechanism:?}");
        let (user, password) = (self.user, self.password);
        let negotiator = self.negotiator.as_mut().ok_or_else(|| unsupported(code))?;
        let token = negotiator.initial_token(mechanism, user, password)?;
        Ok(Credential::SaslResponse(token))
    }

    pub fn step(&mut self, request: AuthRequest<'_>) -> Result<AuthStep> {
        let reply = match request {
            AuthRequest::Ok => return Ok(AuthStep::Done),
            AuthRequest::CleartextPassword => {
                tracing::debug!(" <=BE AuthenticationReqPassword");
                Credential::Password(self.encoded(self.password()?))
            }
            AuthRequest::CryptPassword { salt } => {
                tracing::debug!(" <=BE AuthenticationReqCrypt");
                Credential::Password(self.encoded(&crypt_password(self.password()?, &salt)?))
            }
            AuthRequest::Md5Password { salt } => {
                tracing::debug!(" <=BE AuthenticationReqMD5");
                let password = self.password()?;
                Credential::Password(md5_password(self.user, password, &salt).into_bytes())
            }
            AuthRequest::Gss => self.negotiate(Mechanism::Gss, 7)?,
            AuthRequest::Sspi => self.negotiate(Mechanism::Sspi, 9)?,
            AuthRequest::GssContinue { data } => {
                let negotiator = self.negotiator.as_mut().ok_or_else(|| unsupported(8))?;
                match negotiator.continue_token(data)? {
                    Some(token) => Credential::SaslResponse(token),
                    None => return Ok(AuthStep::Wait),
                }
            }
            AuthRequest::Sasl { mechanisms } => {
                tracing::debug!(" <=BE AuthenticationSASL({mechanisms:?})");
                if !mechanisms.contains(&scram::MECHANISM) {
                    return Err(Error::ConnectionRejected(format!(
                        "None of the server's SASL authentication mechanisms are supported: {}",
                        mechanisms.join(", ")
                    )));
                }
                let scram = ScramSha256::new(self.password()?);
                let data = scram.client_first_message().into_bytes();
                self.scram = Some(scram);
                Credential::SaslInitial {
                    mechanism: scram::MECHANISM.to_owned(),
                    data,
                }
            }
            AuthRequest::SaslContinue { data } => {
                let scram = self
                    .scram
                    .as_mut()
                    .ok_or_else(|| malformed("SASL continuation"))?;
                let server_first = simdutf8::compat::from_utf8(data)
                    .map_err(|_| malformed("server-first-message"))?;
                Credential::SaslResponse(scram.process_server_first(server_first)?.into_bytes())
            }
            AuthRequest::SaslFinal { data } => {
                let scram = self.scram.as_ref().ok_or_else(|| malformed("SASL final"))?;
                let server_final = simdutf8::compat::from_utf8(data)
                    .map_err(|_| malformed("server-final-message"))?;
                scram.verify_server_final(server_final)?;
                return Ok(AuthStep::Wait);
            }
            AuthRequest::Unsupported(code) => return Err(unsupported(code)),
        };
        Ok(AuthStep::Reply(reply))
    }
}
