//! Extended query protocol messages.

use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::Oid;

/// Write a Parse message.
///
/// An empty `name` targets the unnamed statement. `param_oids` may contain
/// zeros to let the server infer a type.
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(param_oids.len() as i16);
    for &oid in param_oids {
        msg.write_i32(oid as i32);
    }
    msg.finish();
}

/// Write an Execute message; `max_rows == 0` fetches everything.
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_i32(max_rows as i32);
    msg.finish();
}

fn write_describe(buf: &mut Vec<u8>, target: u8, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(target);
    msg.write_cstr(name);
    msg.finish();
}

pub fn write_describe_statement(buf: &mut Vec<u8>, name: &str) {
    write_describe(buf, b'S', name);
}

pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) {
    write_describe(buf, b'P', name);
}

pub fn write_close_statement(buf: &mut Vec<u8>, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::CLOSE);
    msg.write_u8(b'S');
    msg.write_cstr(name);
    msg.finish();
}

/// Sync ends an extended query cycle; the server answers with ReadyForQuery.
pub fn write_sync(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::SYNC).finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_message() {
        let mut buf = Vec::new();
        write_parse(&mut buf, "S_1", "SELECT $1", &[23]);
        assert_eq!(buf[0], b'P');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, buf.len() - 1);
        assert_eq!(&buf[5..9], b"S_1\0");
        assert!(buf.ends_with(&[0, 1, 0, 0, 0, 23]));
    }

    #[test]
    fn execute_and_describe() {
        let mut buf = Vec::new();
        write_execute(&mut buf, "", 1);
        assert_eq!(buf, [b'E', 0, 0, 0, 9, 0, 0, 0, 0, 1]);

        buf.clear();
        write_describe_portal(&mut buf, "");
        assert_eq!(buf, [b'D', 0, 0, 0, 6, b'P', 0]);
    }

    #[test]
    fn close_and_sync() {
        let mut buf = Vec::new();
        write_close_statement(&mut buf, "S_2");
        write_sync(&mut buf);
        assert_eq!(buf, [b'C', 0, 0, 0, 9, b'S', b'S', b'_', b'2', 0, b'S', 0, 0, 0, 4]);
    }
}
