//! Authentication and session-status backend messages.

use zerocopy::byteorder::big_endian::I32 as I32BE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i32};
use crate::protocol::types::TransactionStatus;

/// Authentication request codes shared by both protocol generations.
pub mod auth_type {
    pub const OK: i32 = 0;
    pub const KERBEROS_V4: i32 = 1;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const CRYPT_PASSWORD: i32 = 4;
    pub const MD5_PASSWORD: i32 = 5;
    pub const SCM_CREDENTIAL: i32 = 6;
    pub const GSS: i32 = 7;
    pub const GSS_CONTINUE: i32 = 8;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// An authentication request from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest<'a> {
    Ok,
    CleartextPassword,
    /// Legacy crypt(3) with a 2-byte salt
    CryptPassword { salt: [u8; 2] },
    Md5Password { salt: [u8; 4] },
    Gss,
    GssContinue { data: &'a [u8] },
    Sspi,
    Sasl { mechanisms: Vec<&'a str> },
    SaslContinue { data: &'a [u8] },
    SaslFinal { data: &'a [u8] },
    /// Kerberos 4/5, SCM credentials and codes this client does not know
    Unsupported(i32),
}

impl<'a> AuthRequest<'a> {
    /// Parse a v3 Authentication payload.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (code, rest) = read_i32(payload)?;
        Ok(match code {
            auth_type::OK => AuthRequest::Ok,
            auth_type::CLEARTEXT_PASSWORD => AuthRequest::CleartextPassword,
            auth_type::CRYPT_PASSWORD => {
                let (salt, _) = read_bytes(rest, 2)?;
                AuthRequest::CryptPassword {
                    salt: [salt[0], salt[1]],
                }
            }
            auth_type::MD5_PASSWORD => {
                let (salt, _) = read_bytes(rest, 4)?;
                AuthRequest::Md5Password {
                    salt: [salt[0], salt[1], salt[2], salt[3]],
                }
            }
            auth_type::GSS => AuthRequest::Gss,
            auth_type::GSS_CONTINUE => AuthRequest::GssContinue { data: rest },
            auth_type::SSPI => AuthRequest::Sspi,
            auth_type::SASL => {
                let mut mechanisms = Vec::new();
                let mut data = rest;
                while data.first().is_some_and(|&b| b != 0) {
                    let (mechanism, remaining) = read_cstr(data)?;
                    mechanisms.push(mechanism);
                    data = remaining;
                }
                AuthRequest::Sasl { mechanisms }
            }
            auth_type::SASL_CONTINUE => AuthRequest::SaslContinue { data: rest },
            auth_type::SASL_FINAL => AuthRequest::SaslFinal { data: rest },
            other => AuthRequest::Unsupported(other),
        })
    }
}

/// BackendKeyData: process id and secret key for cancel requests.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct BackendKeyData {
    pid: I32BE,
    secret_key: I32BE,
}

impl BackendKeyData {
    /// The payload must be exactly 8 bytes.
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Self::ref_from_bytes(payload).map_err(|_| {
            Error::ProtocolViolation(format!(
                "Protocol error.  Unexpected BackendKeyData length {}",
                payload.len()
            ))
        })
    }

    pub fn process_id(&self) -> i32 {
        self.pid.get()
    }

    pub fn secret(&self) -> i32 {
        self.secret_key.get()
    }
}

/// ParameterStatus: a server run-time parameter and its current value.
#[derive(Debug, Clone)]
pub struct ParameterStatus<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl<'a> ParameterStatus<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self { name, value })
    }
}

/// ReadyForQuery carrying the transaction status byte.
#[derive(Debug, Clone, Copy)]
pub struct ReadyForQuery {
    pub status: TransactionStatus,
}

impl ReadyForQuery {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let [byte] = payload else {
            return Err(Error::ProtocolViolation(format!(
                "Protocol error.  ReadyForQuery length {} != 1",
                payload.len()
            )));
        };
        let status = TransactionStatus::from_byte(*byte).ok_or_else(|| {
            Error::ProtocolViolation(format!(
                "Protocol error.  Unexpected transaction state {}",
                char::from(*byte)
            ))
        })?;
        Ok(Self { status })
    }
}

/// NotificationResponse from LISTEN/NOTIFY.
#[derive(Debug, Clone)]
pub struct NotificationResponse<'a> {
    pub pid: i32,
    pub channel: &'a str,
    pub payload: &'a str,
}

impl<'a> NotificationResponse<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (pid, rest) = read_i32(payload)?;
        let (channel, rest) = read_cstr(rest)?;
        let (payload_str, _) = read_cstr(rest)?;
        Ok(Self {
            pid,
            channel,
            payload: payload_str,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_md5_and_crypt() {
        let mut payload = 5_i32.to_be_bytes().to_vec();
        payload.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(
            AuthRequest::parse(&payload).unwrap(),
            AuthRequest::Md5Password { salt: [1, 2, 3, 4] }
        );

        let mut payload = 4_i32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"ab");
        assert_eq!(
            AuthRequest::parse(&payload).unwrap(),
            AuthRequest::CryptPassword { salt: *b"ab" }
        );

        assert!(AuthRequest::parse(&5_i32.to_be_bytes()).is_err());
        assert_eq!(
            AuthRequest::parse(&6_i32.to_be_bytes()).unwrap(),
            AuthRequest::Unsupported(6)
        );
    }

    #[test]
    fn parse_sasl_mechanisms() {
        let mut payload = 10_i32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"SCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0");
        let AuthRequest::Sasl { mechanisms } = AuthRequest::parse(&payload).unwrap() else {
            panic!("expected SASL");
        };
        assert_eq!(mechanisms, ["SCRAM-SHA-256-PLUS", "SCRAM-SHA-256"]);
    }

    #[test]
    fn backend_key_requires_eight_bytes() {
        let key = BackendKeyData::parse(&[0, 0, 0, 7, 0, 0, 1, 0]).unwrap();
        assert_eq!((key.process_id(), key.secret()), (7, 256));
        assert!(BackendKeyData::parse(&[0; 12]).is_err());
    }

    #[test]
    fn ready_for_query_status() {
        assert_eq!(
            ReadyForQuery::parse(b"T").unwrap().status,
            TransactionStatus::InTransaction
        );
        assert!(ReadyForQuery::parse(b"X").is_err());
        assert!(ReadyForQuery::parse(b"II").is_err());
    }
}
