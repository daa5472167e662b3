//! Scripted in-process server for driving the engine without a database.
//!
//! A test spawns a [`FakeServer`] with a closure that plays the server side
//! of the conversation on the accepted socket(s), byte for byte.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

use zero_pgwire::{Opts, ProtocolGeneration, SslMode};

pub const PROTOCOL_3: i32 = 196_608;
pub const SSL_REQUEST: i32 = 80_877_103;
pub const CANCEL_REQUEST: i32 = 80_877_102;

pub struct FakeServer {
    pub port: u16,
    handle: Option<JoinHandle<()>>,
}

impl FakeServer {
    pub fn start(script: impl FnOnce(TcpListener) + Send + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || script(listener));
        Self {
            port,
            handle: Some(handle),
        }
    }

    /// Options pointing at this server: plaintext, user `alice`, database `db`.
    pub fn opts(&self) -> Opts {
        Opts {
            host: "127.0.0.1".into(),
            port: self.port,
            user: "alice".into(),
            database: Some("db".into()),
            password: Some("secret".into()),
            ssl_mode: SslMode::Disable,
            protocol: ProtocolGeneration::Auto,
            socket_timeout: Some(Duration::from_secs(5)),
            ..Opts::default()
        }
    }

    /// Wait for the script; a panic inside it fails the test.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("server script panicked");
        }
    }
}

/// A single backend message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    pub tag: u8,
    pub body: Vec<u8>,
}

impl Msg {
    /// NUL-terminated strings in the body, in order.
    pub fn cstrs(&self) -> Vec<String> {
        self.body
            .split(|b| *b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect()
    }
}

pub struct Peer {
    stream: TcpStream,
    out: Vec<u8>,
}

pub fn accept(listener: &TcpListener) -> Peer {
    let (stream, _) = listener.accept().unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    Peer {
        stream,
        out: Vec::new(),
    }
}

impl Peer {
    pub fn read_exact(&mut self, len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        self.stream.read_exact(&mut data).unwrap();
        data
    }

    pub fn read_u8(&mut self) -> u8 {
        self.read_exact(1)[0]
    }

    pub fn read_i32(&mut self) -> i32 {
        let raw = self.read_exact(4);
        i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])
    }

    /// Untagged packet: returns the code and the rest of the body.
    pub fn read_untagged(&mut self) -> (i32, Vec<u8>) {
        let len = self.read_i32();
        let code = self.read_i32();
        let body = self.read_exact(len as usize - 8);
        (code, body)
    }

    /// v3 startup packet as key/value pairs.
    pub fn read_startup(&mut self) -> Vec<(String, String)> {
        let (code, body) = self.read_untagged();
        assert_eq!(code, PROTOCOL_3);
        let strings: Vec<String> = body
            .split(|b| *b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect();
        strings
            .chunks(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect()
    }

    /// v2 startup packet: returns (database, user).
    pub fn read_legacy_startup(&mut self) -> (String, String) {
        let len = self.read_i32();
        assert_eq!(len, 296);
        let body = self.read_exact(292);
        assert_eq!(&body[..4], &[0, 2, 0, 0]);
        let field = |range: std::ops::Range<usize>| {
            let raw = &body[range];
            let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
            String::from_utf8_lossy(&raw[..end]).into_owned()
        };
        (field(4..68), field(68..100))
    }

    pub fn read_msg(&mut self) -> Msg {
        let tag = self.read_u8();
        let len = self.read_i32();
        let body = self.read_exact(len as usize - 4);
        Msg { tag, body }
    }

    pub fn expect(&mut self, tag: u8) -> Msg {
        let msg = self.read_msg();
        assert_eq!(
            char::from(msg.tag),
            char::from(tag),
            "unexpected frontend message {msg:?}"
        );
        msg
    }

    /// Read extended-query messages up to and including Sync.
    pub fn read_until_sync(&mut self) -> Vec<Msg> {
        let mut messages = Vec::new();
        loop {
            let msg = self.read_msg();
            let done = msg.tag == b'S';
            messages.push(msg);
            if done {
                return messages;
            }
        }
    }

    /// v2 simple query text.
    pub fn read_legacy_query(&mut self) -> String {
        assert_eq!(char::from(self.read_u8()), 'Q');
        self.read_legacy_cstr()
    }

    pub fn read_legacy_cstr(&mut self) -> String {
        let mut text = Vec::new();
        loop {
            match self.read_u8() {
                0 => return String::from_utf8(text).unwrap(),
                b => text.push(b),
            }
        }
    }

    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.out.extend_from_slice(data);
        self
    }

    pub fn msg(&mut self, tag: u8, body: &[u8]) -> &mut Self {
        self.out.push(tag);
        self.out
            .extend_from_slice(&(body.len() as i32 + 4).to_be_bytes());
        self.out.extend_from_slice(body);
        self
    }

    pub fn flush(&mut self) {
        self.stream.write_all(&self.out).unwrap();
        self.stream.flush().unwrap();
        self.out.clear();
    }

    pub fn auth(&mut self, code: i32, extra: &[u8]) -> &mut Self {
        let mut body = code.to_be_bytes().to_vec();
        body.extend_from_slice(extra);
        self.msg(b'R', &body)
    }

    pub fn parameter_status(&mut self, name: &str, value: &str) -> &mut Self {
        self.msg(b'S', &cstrs(&[name, value]))
    }

    pub fn backend_key(&mut self, pid: i32, secret: i32) -> &mut Self {
        let mut body = pid.to_be_bytes().to_vec();
        body.extend_from_slice(&secret.to_be_bytes());
        self.msg(b'K', &body)
    }

    pub fn ready(&mut self, status: u8) -> &mut Self {
        self.msg(b'Z', &[status])
    }

    pub fn parse_complete(&mut self) -> &mut Self {
        self.msg(b'1', &[])
    }

    pub fn bind_complete(&mut self) -> &mut Self {
        self.msg(b'2', &[])
    }

    pub fn no_data(&mut self) -> &mut Self {
        self.msg(b'n', &[])
    }

    pub fn complete(&mut self, status: &str) -> &mut Self {
        self.msg(b'C', &cstrs(&[status]))
    }

    /// RowDescription with text-format columns.
    pub fn row_description(&mut self, columns: &[(&str, u32)]) -> &mut Self {
        let mut body = (columns.len() as i16).to_be_bytes().to_vec();
        for (name, oid) in columns {
            body.extend_from_slice(name.as_bytes());
            body.push(0);
            body.extend_from_slice(&0i32.to_be_bytes());
            body.extend_from_slice(&0i16.to_be_bytes());
            body.extend_from_slice(&oid.to_be_bytes());
            body.extend_from_slice(&(-1i16).to_be_bytes());
            body.extend_from_slice(&(-1i32).to_be_bytes());
            body.extend_from_slice(&0i16.to_be_bytes());
        }
        self.msg(b'T', &body)
    }

    /// DataRow with text cells.
    pub fn data_row(&mut self, cells: &[Option<&str>]) -> &mut Self {
        let mut body = (cells.len() as i16).to_be_bytes().to_vec();
        for cell in cells {
            match cell {
                Some(data) => {
                    body.extend_from_slice(&(data.len() as i32).to_be_bytes());
                    body.extend_from_slice(data.as_bytes());
                }
                None => body.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        self.msg(b'D', &body)
    }

    pub fn error(&mut self, code: &str, message: &str) -> &mut Self {
        self.msg(b'E', &error_body(code, message))
    }

    pub fn notice(&mut self, message: &str) -> &mut Self {
        let mut body = b"SNOTICE\0".to_vec();
        body.extend_from_slice(&cstrs(&["M".to_owned() + message]));
        body.push(0);
        self.msg(b'N', &body)
    }

    pub fn notification(&mut self, pid: i32, channel: &str, payload: &str) -> &mut Self {
        let mut body = pid.to_be_bytes().to_vec();
        body.extend_from_slice(&cstrs(&[channel, payload]));
        self.msg(b'A', &body)
    }

    /// Startup tail of a well-behaved modern server.
    pub fn modern_welcome(&mut self) -> &mut Self {
        self.auth(0, &[])
            .parameter_status("server_version", "9.6.24")
            .parameter_status("client_encoding", "UTF8")
            .parameter_status("DateStyle", "ISO, MDY")
            .parameter_status("standard_conforming_strings", "on")
            .backend_key(4242, 77)
            .ready(b'I')
    }

    /// Accept the v3 startup without authentication.
    pub fn modern_handshake(&mut self) {
        self.read_startup();
        self.modern_welcome().flush();
    }

    /// Wait until the client hangs up.
    pub fn wait_for_close(&mut self) {
        let mut rest = Vec::new();
        let _ = self.stream.read_to_end(&mut rest);
    }
}

pub fn cstrs<S: AsRef<str>>(values: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        out.extend_from_slice(value.as_ref().as_bytes());
        out.push(0);
    }
    out
}

pub fn error_body(code: &str, message: &str) -> Vec<u8> {
    let mut body = cstrs(&[
        "SERROR".to_owned(),
        format!("C{code}"),
        format!("M{message}"),
    ]);
    body.push(0);
    body
}

/// Legacy (v2) message builders; v2 messages carry no length word.
pub mod legacy {
    pub fn cstr(tag: u8, text: &str) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(text.as_bytes());
        out.push(0);
        out
    }

    pub fn row_description(columns: &[(&str, u32)]) -> Vec<u8> {
        let mut out = vec![b'T'];
        out.extend_from_slice(&(columns.len() as i16).to_be_bytes());
        for (name, oid) in columns {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
            out.extend_from_slice(&oid.to_be_bytes());
            out.extend_from_slice(&(-1i16).to_be_bytes());
            out.extend_from_slice(&(-1i32).to_be_bytes());
        }
        out
    }

    /// AsciiRow; text lengths include the length word.
    pub fn ascii_row(cells: &[Option<&str>]) -> Vec<u8> {
        let mut out = vec![b'D'];
        let mut bitmap = vec![0u8; cells.len().div_ceil(8)];
        for (i, cell) in cells.iter().enumerate() {
            if cell.is_some() {
                bitmap[i / 8] |= 0x80 >> (i % 8);
            }
        }
        out.extend_from_slice(&bitmap);
        for cell in cells.iter().flatten() {
            out.extend_from_slice(&(cell.len() as i32 + 4).to_be_bytes());
            out.extend_from_slice(cell.as_bytes());
        }
        out
    }

    /// Select result for the setup query run right after a v2 startup.
    pub fn setup_reply(version: &str, encoding: &str) -> Vec<u8> {
        let mut out = cstr(b'C', "SET VARIABLE");
        out.extend(cstr(b'P', "blank"));
        out.extend(row_description(&[("version", 25), ("getdatabaseencoding", 19)]));
        out.extend(ascii_row(&[Some(version), Some(encoding)]));
        out.extend(cstr(b'C', "SELECT"));
        out.push(b'Z');
        out
    }
}
