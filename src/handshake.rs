//! Connection establishment: socket, TLS negotiation, startup and authentication.
//!
//! Each configured address is tried in order. For one address, the v3
//! startup is attempted first unless the options pin a generation; a v2-only
//! server answers the v3 startup with a v2 error line whose first four bytes
//! read as an absurd length, and the attempt is retried with v2 on a fresh
//! socket.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{AuthNegotiator, AuthStep, Authenticator, Credential};
use crate::encoding::Encoding;
use crate::error::{Error, Result};
use crate::opts::{Opts, ProtocolGeneration, SslMode};
use crate::protocol::backend::auth::auth_type;
use crate::protocol::backend::{AuthRequest, ErrorResponse, msg_type, unknown_tag};
use crate::protocol::frontend::{
    write_password, write_sasl_initial_response, write_sasl_response, write_ssl_request,
    write_startup,
};
use crate::protocol::legacy;
use crate::session::legacy::LegacySession;
use crate::session::modern::ModernSession;
use crate::session::{Session, SessionState, bootstrap};
use crate::transport::{Stream, Transport};

/// An ErrorResponse longer than this during v3 startup is taken to be a v2
/// error line. The length field then holds the first bytes of the text.
const LEGACY_ERROR_LENGTH_THRESHOLD: i32 = 30000;

/// Where a session's socket connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Tcp { host, port } => write!(f, "{host}:{port}"),
            Target::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

fn targets(opts: &Opts) -> Result<Vec<Target>> {
    if let Some(socket) = &opts.socket {
        return Ok(vec![Target::Unix(PathBuf::from(socket))]);
    }
    if opts.host.is_empty() {
        return Err(Error::InvalidUsage("host is empty".into()));
    }
    Ok(opts
        .addresses()
        .into_iter()
        .map(|(host, port)| Target::Tcp { host, port })
        .collect())
}

fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> std::io::Result<TcpStream> {
    let Some(timeout) = timeout else {
        return TcpStream::connect((host, port));
    };
    let mut last_error = None;
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no addresses resolved for {host}"),
        )
    }))
}

/// Open a plaintext socket to `target`.
pub(crate) fn open_socket(target: &Target, timeout: Option<Duration>) -> Result<Stream> {
    let stream = match target {
        Target::Tcp { host, port } => {
            let tcp = connect_tcp(host, *port, timeout).map_err(|e| {
                Error::UnableToConnect(format!(
                    "Connection to {target} refused. Check that the hostname and port are \
                     correct and that the postmaster is accepting TCP/IP connections: {e}"
                ))
            })?;
            tcp.set_nodelay(true)?;
            Stream::tcp(tcp)
        }
        Target::Unix(path) => Stream::unix(UnixStream::connect(path).map_err(|e| {
            Error::UnableToConnect(format!("Connection to {target} failed: {e}"))
        })?),
    };
    Ok(stream)
}

#[cfg(feature = "tls")]
fn upgrade_tls(stream: Stream, host: &str, opts: &Opts) -> Result<Stream> {
    let tcp = stream.into_tcp().ok_or_else(|| {
        Error::ProtocolViolation("TLS can only be negotiated on a plaintext TCP socket".into())
    })?;
    let mut builder = native_tls::TlsConnector::builder();
    if opts.ssl_accept_invalid_certs {
        tracing::warn!("TLS certificate verification is disabled for {host}");
        builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }
    let connector = builder.build()?;
    let tls = connector.connect(host, tcp).map_err(|e| match e {
        native_tls::HandshakeError::Failure(e) => Error::Tls(e),
        native_tls::HandshakeError::WouldBlock(_) => {
            Error::UnableToConnect("TLS handshake interrupted".into())
        }
    })?;
    Ok(Stream::tls(tls))
}

#[cfg(not(feature = "tls"))]
fn upgrade_tls(_stream: Stream, _host: &str, _opts: &Opts) -> Result<Stream> {
    Err(Error::ConnectionRejected(
        "TLS requested but the tls feature is not enabled".into(),
    ))
}

fn server_refused_tls() -> Error {
    Error::ConnectionRejected("The server does not support SSL.".into())
}

/// Send SSLRequest and act on the one-byte answer.
fn negotiate_tls(mut stream: Stream, target: &Target, opts: &Opts) -> Result<Stream> {
    let Target::Tcp { host, .. } = target else {
        return Ok(stream);
    };
    let required = opts.ssl_mode == SslMode::Require;
    if !cfg!(feature = "tls") {
        if required {
            return Err(Error::ConnectionRejected(
                "TLS requested but the tls feature is not enabled".into(),
            ));
        }
        return Ok(stream);
    }

    tracing::debug!(" FE=> SSLRequest");
    let mut request = Vec::with_capacity(8);
    write_ssl_request(&mut request);
    stream.write_all(&request)?;
    stream.flush()?;

    let mut answer = [0u8; 1];
    stream.read_exact(&mut answer)?;
    match answer[0] {
        b'S' => {
            tracing::debug!(" <=BE SSLOk");
            upgrade_tls(stream, host, opts)
        }
        b'N' => {
            tracing::debug!(" <=BE SSLRefused");
            if required {
                return Err(server_refused_tls());
            }
            Ok(stream)
        }
        b'E' => {
            tracing::debug!(" <=BE SSLError");
            if required {
                return Err(server_refused_tls());
            }
            // The server has already closed this socket.
            if let Err(e) = stream.shutdown() {
                tracing::debug!("Ignoring shutdown error on rejected socket: {e}");
            }
            open_socket(target, opts.connect_timeout)
        }
        _ => Err(Error::ProtocolViolation(
            "An error occurred while setting up the SSL connection.".into(),
        )),
    }
}

/// Open the socket, negotiate TLS and apply socket options.
fn establish(target: &Target, opts: &Opts) -> Result<Stream> {
    let stream = open_socket(target, opts.connect_timeout)?;
    let stream = match opts.ssl_mode {
        SslMode::Disable => stream,
        SslMode::Prefer | SslMode::Require => negotiate_tls(stream, target, opts)?,
    };
    stream.set_read_timeout(opts.socket_timeout)?;
    stream.set_keepalive(opts.tcp_keepalive)?;
    Ok(stream)
}

fn new_state(target: &Target, opts: &Opts) -> SessionState {
    SessionState::new(target.clone(), opts.connect_timeout)
}

/// Payload size of a v3 message whose length word is `len`.
fn payload_len(len: i32) -> Result<usize> {
    len.checked_sub(4)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| Error::ProtocolViolation(format!("Invalid message length: {len}")))
}

/// Outcome of a v3 startup attempt.
enum Attempt {
    Established(Session),
    /// The server speaks only v2; retry on a fresh socket
    Fallback,
}

fn send_credential(transport: &mut Transport, credential: &Credential) -> Result<()> {
    match credential {
        Credential::Password(password) => {
            tracing::debug!(" FE=> Password");
            write_password(transport.out(), password);
        }
        Credential::SaslInitial { mechanism, data } => {
            tracing::debug!(" FE=> SASLInitialResponse({mechanism})");
            write_sasl_initial_response(transport.out(), mechanism, data);
        }
        Credential::SaslResponse(data) => {
            tracing::debug!(" FE=> SASLResponse");
            write_sasl_response(transport.out(), data);
        }
    }
    transport.flush()
}

fn connect_modern(
    target: &Target,
    opts: &Opts,
    negotiator: Option<&mut dyn AuthNegotiator>,
) -> Result<Attempt> {
    tracing::debug!("Trying to establish a protocol version 3 connection to {target}");
    let mut transport = Transport::new(establish(target, opts)?);

    let mut params: Vec<(&str, &str)> = vec![
        ("user", opts.user.as_str()),
        ("database", opts.database_or_user()),
        ("client_encoding", "UNICODE"),
        ("DateStyle", "ISO"),
        ("extra_float_digits", "2"),
    ];
    if let Some(name) = &opts.application_name {
        params.push(("application_name", name));
    }
    params.extend(opts.params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    tracing::debug!(" FE=> StartupPacket({params:?})");
    write_startup(transport.out(), &params);
    transport.flush()?;

    let mut auth = Authenticator::new(&opts.user, opts.password.as_deref(), Encoding::Utf8)
        .with_negotiator(negotiator);
    loop {
        let tag = transport.recv_u8()?;
        let len = transport.recv_i32()?;
        match tag {
            msg_type::ERROR_RESPONSE => {
                if len > LEGACY_ERROR_LENGTH_THRESHOLD {
                    tracing::debug!("Protocol not supported, abandoning connection.");
                    transport.close();
                    return Ok(Attempt::Fallback);
                }
                let size = payload_len(len)?;
                transport.recv_payload(size)?;
                let error = ErrorResponse::parse(transport.payload())?;
                tracing::debug!(" <=BE ErrorMessage({})", error.fields);
                return Err(Error::ConnectionRejected(error.fields.to_string()));
            }
            msg_type::AUTHENTICATION => {
                let size = payload_len(len)?;
                transport.recv_payload(size)?;
                let request = AuthRequest::parse(transport.payload())?;
                match auth.step(request)? {
                    AuthStep::Done => {
                        tracing::debug!(" <=BE AuthenticationOk");
                        break;
                    }
                    AuthStep::Reply(credential) => send_credential(&mut transport, &credential)?,
                    AuthStep::Wait => {}
                }
            }
            other => return Err(unknown_tag(other)),
        }
    }

    let mut state = new_state(target, opts);
    bootstrap::modern_startup(&mut transport, &mut state)?;
    Ok(Attempt::Established(Session::Modern(ModernSession::new(
        transport, state,
    ))))
}

/// Read a v2 authentication request; salts follow only crypt and md5 codes.
fn recv_legacy_auth(transport: &mut Transport) -> Result<AuthRequest<'static>> {
    let code = transport.recv_i32()?;
    Ok(match code {
        auth_type::OK => AuthRequest::Ok,
        auth_type::CLEARTEXT_PASSWORD => AuthRequest::CleartextPassword,
        auth_type::CRYPT_PASSWORD => {
            let salt = transport.recv_bytes(2)?;
            AuthRequest::CryptPassword {
                salt: [salt[0], salt[1]],
            }
        }
        auth_type::MD5_PASSWORD => {
            let salt = transport.recv_bytes(4)?;
            AuthRequest::Md5Password {
                salt: [salt[0], salt[1], salt[2], salt[3]],
            }
        }
        other => AuthRequest::Unsupported(other),
    })
}

fn connect_legacy(target: &Target, opts: &Opts) -> Result<Session> {
    tracing::debug!("Trying to establish a protocol version 2 connection to {target}");
    let mut transport = Transport::new(establish(target, opts)?);

    tracing::debug!(" FE=> StartupPacket(user={},database={})", opts.user, opts.database_or_user());
    legacy::write_startup_packet(transport.out(), &opts.user, opts.database_or_user());
    transport.flush()?;

    let mut auth = Authenticator::new(&opts.user, opts.password.as_deref(), Encoding::Utf8);
    loop {
        match transport.recv_u8()? {
            b'E' => {
                let message = transport.recv_cstr()?;
                tracing::debug!(" <=BE ErrorMessage({message})");
                return Err(Error::ConnectionRejected(message.trim().to_owned()));
            }
            b'R' => {
                let request = recv_legacy_auth(&mut transport)?;
                match auth.step(request)? {
                    AuthStep::Done => {
                        tracing::debug!(" <=BE AuthenticationOk");
                        break;
                    }
                    AuthStep::Reply(Credential::Password(password)) => {
                        tracing::debug!(" FE=> Password");
                        legacy::write_password_packet(transport.out(), &password);
                        transport.flush()?;
                    }
                    AuthStep::Reply(_) | AuthStep::Wait => {
                        return Err(Error::ConnectionRejected(
                            "The server requested an authentication exchange that protocol \
                             version 2 cannot carry"
                                .into(),
                        ));
                    }
                }
            }
            other => return Err(unknown_tag(other)),
        }
    }

    let mut state = new_state(target, opts);
    bootstrap::legacy_startup(&mut transport, &mut state)?;
    let mut session = LegacySession::new(transport, state);
    bootstrap::legacy_setup(&mut session, opts.charset.as_deref())?;
    Ok(Session::Legacy(session))
}

fn connect_one(
    target: &Target,
    opts: &Opts,
    negotiator: Option<&mut dyn AuthNegotiator>,
) -> Result<Session> {
    match opts.protocol {
        ProtocolGeneration::Legacy => connect_legacy(target, opts),
        ProtocolGeneration::Modern => match connect_modern(target, opts, negotiator)? {
            Attempt::Established(session) => Ok(session),
            Attempt::Fallback => Err(Error::UnableToConnect(
                "The server does not support protocol version 3".into(),
            )),
        },
        ProtocolGeneration::Auto => match connect_modern(target, opts, negotiator)? {
            Attempt::Established(session) => Ok(session),
            Attempt::Fallback => connect_legacy(target, opts),
        },
    }
}

fn reborrow<'s>(
    negotiator: &'s mut Option<&mut dyn AuthNegotiator>,
) -> Option<&'s mut dyn AuthNegotiator> {
    match negotiator {
        Some(negotiator) => Some(&mut **negotiator),
        None => None,
    }
}

/// Connect to the first reachable address.
///
/// A failed address is logged and the next one tried; the error of the last
/// address is returned.
pub(crate) fn open(opts: &Opts, mut negotiator: Option<&mut dyn AuthNegotiator>) -> Result<Session> {
    let mut last_error = None;
    for target in targets(opts)? {
        match connect_one(&target, opts, reborrow(&mut negotiator)) {
            Ok(session) => return Ok(session),
            Err(e) => {
                tracing::warn!("Connection attempt to {target} failed: {e}");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| Error::UnableToConnect("No address to connect to".into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_wins() {
        let opts = Opts {
            host: "db".into(),
            socket: Some("/tmp/.s.PGSQL.5432".into()),
            ..Opts::default()
        };
        assert_eq!(
            targets(&opts).unwrap(),
            [Target::Unix(PathBuf::from("/tmp/.s.PGSQL.5432"))]
        );
    }

    #[test]
    fn addresses_in_order() {
        let opts = Opts {
            host: "a".into(),
            extra_hosts: vec![("b".into(), 6000)],
            ..Opts::default()
        };
        let found = targets(&opts).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].to_string(), "b:6000");
        assert!(targets(&Opts::default()).is_err());
    }

    #[test]
    fn message_length_words() {
        assert_eq!(payload_len(4).unwrap(), 0);
        assert_eq!(payload_len(12).unwrap(), 8);
        for len in [3, 0, -1, i32::MIN] {
            assert!(matches!(payload_len(len), Err(Error::ProtocolViolation(_))), "{len}");
        }
    }
}
