//! Startup, negotiation and termination messages of the v3 protocol.

use crate::protocol::codec::MessageBuilder;

/// Protocol version 3.0 (0x00030000)
pub const PROTOCOL_VERSION_3_0: i32 = 196608;

/// SSLRequest code
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// CancelRequest code
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Write an SSLRequest.
///
/// The server answers with a single byte: `S` to proceed with TLS, `N` to
/// continue in plaintext. Servers that predate TLS negotiation answer with
/// an ErrorResponse and close the socket.
pub fn write_ssl_request(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(SSL_REQUEST_CODE);
    msg.finish();
}

/// Write a v3 StartupMessage from ordered (name, value) pairs.
pub fn write_startup(buf: &mut Vec<u8>, params: &[(&str, &str)]) {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(PROTOCOL_VERSION_3_0);
    for (name, value) in params {
        msg.write_cstr(name);
        msg.write_cstr(value);
    }
    msg.write_u8(0);
    msg.finish();
}

/// Write a CancelRequest. It is sent on a fresh socket that is then closed.
pub fn write_cancel_request(buf: &mut Vec<u8>, pid: i32, secret_key: i32) {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(CANCEL_REQUEST_CODE);
    msg.write_i32(pid);
    msg.write_i32(secret_key);
    msg.finish();
}

/// Write a Terminate. Both protocol generations use `X`; only v3 adds a length.
pub fn write_terminate(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::TERMINATE).finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssl_request() {
        let mut buf = Vec::new();
        write_ssl_request(&mut buf);
        assert_eq!(buf, [0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f]);
    }

    #[test]
    fn startup() {
        let mut buf = Vec::new();
        write_startup(&mut buf, &[("user", "u"), ("database", "d")]);
        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len());
        assert_eq!(&buf[4..8], &PROTOCOL_VERSION_3_0.to_be_bytes());
        assert_eq!(&buf[8..], b"user\0u\0database\0d\0\0");
    }

    #[test]
    fn cancel_request() {
        let mut buf = Vec::new();
        write_cancel_request(&mut buf, 42, -7);
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[4..8], &CANCEL_REQUEST_CODE.to_be_bytes());
        assert_eq!(&buf[8..12], &42_i32.to_be_bytes());
        assert_eq!(&buf[12..], &(-7_i32).to_be_bytes());
    }

    #[test]
    fn terminate() {
        let mut buf = Vec::new();
        write_terminate(&mut buf);
        assert_eq!(buf, [b'X', 0, 0, 0, 4]);
    }
}
