//! COPY sub-protocol frontend messages.

use crate::protocol::codec::MessageBuilder;

pub fn write_copy_data(buf: &mut Vec<u8>, data: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::COPY_DATA);
    msg.write_bytes(data);
    msg.finish();
}

pub fn write_copy_done(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::COPY_DONE).finish();
}

/// CopyFail aborts a copy-in; the server answers with an ErrorResponse.
pub fn write_copy_fail(buf: &mut Vec<u8>, reason: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::COPY_FAIL);
    msg.write_cstr(reason);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_messages() {
        let mut buf = Vec::new();
        write_copy_data(&mut buf, b"1\tone\n");
        write_copy_done(&mut buf);
        assert_eq!(&buf[..5], &[b'd', 0, 0, 0, 10]);
        assert_eq!(&buf[5..11], b"1\tone\n");
        assert_eq!(&buf[11..], &[b'c', 0, 0, 0, 4]);

        buf.clear();
        write_copy_fail(&mut buf, "Copy cancel requested");
        assert_eq!(buf[0], b'f');
        assert!(buf.ends_with(b"requested\0"));
    }
}
