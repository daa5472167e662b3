//! Authentication responses and credential encodings.

use md5::{Digest, Md5};

use crate::error::{Error, Result};
use crate::protocol::codec::MessageBuilder;

/// Write a PasswordMessage carrying an already-encoded credential.
pub fn write_password(buf: &mut Vec<u8>, credential: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstring(credential);
    msg.finish();
}

/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let inner = Md5::new()
        .chain_update(password.as_bytes())
        .chain_update(user.as_bytes())
        .finalize();
    let outer = Md5::new()
        .chain_update(format!("{inner:x}").as_bytes())
        .chain_update(salt)
        .finalize();
    format!("md5{outer:x}")
}

/// Traditional crypt(3) of the password with the server's 2-byte salt.
pub fn crypt_password(password: &str, salt: &[u8; 2]) -> Result<String> {
    let salt = std::str::from_utf8(salt).map_err(|_| {
        Error::ConnectionRejected("The server sent a crypt salt that is not ASCII".into())
    })?;
    pwhash::unix_crypt::hash_with(salt, password)
        .map_err(|e| Error::ConnectionRejected(format!("crypt authentication failed: {e}")))
}

/// Write a SASLInitialResponse.
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial_response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_i32(initial_response.len() as i32);
    msg.write_bytes(initial_response);
    msg.finish();
}

/// Write a SASLResponse, also used for GSS/SSPI continuation tokens.
pub fn write_sasl_response(buf: &mut Vec<u8>, response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_bytes(response);
    msg.finish();
}
