//! Simple query protocol messages.

use crate::protocol::codec::MessageBuilder;

/// Write a Query message. The text may hold several `;`-separated statements.
pub fn write_query(buf: &mut Vec<u8>, query: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::QUERY);
    msg.write_cstr(query);
    msg.finish();
}
