//! Buffered, encoding-aware byte stream owned by one session.
//!
//! Sends accumulate in an output buffer until [`Transport::flush`]; the
//! protocol engine pipelines several messages and flushes once before
//! waiting for the response. Any I/O failure leaves the transport unusable;
//! the owning session closes it.

mod stream;

pub use stream::Stream;

use std::io::Read;
use std::time::Duration;

use crate::encoding::Encoding;
use crate::error::{Error, Result};

/// Output is written to the socket once this much is buffered while streaming.
const STREAM_FLUSH_THRESHOLD: usize = 8192;

pub struct Transport {
    stream: Option<Stream>,
    encoding: Encoding,
    out: Vec<u8>,
    payload: Vec<u8>,
}

fn closed() -> Error {
    Error::CommunicationFailure(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "This connection has been closed.",
    ))
}

impl Transport {
    pub fn new(stream: Stream) -> Self {
        Self {
            stream: Some(stream),
            encoding: Encoding::Utf8,
            out: Vec::with_capacity(STREAM_FLUSH_THRESHOLD),
            payload: Vec::new(),
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Swap the text codec, e.g. after the server confirms a new client encoding.
    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.encoding = encoding;
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn stream(&mut self) -> Result<&mut Stream> {
        self.stream.as_mut().ok_or_else(closed)
    }

    /// Output buffer that v3 message writers append to.
    pub fn out(&mut self) -> &mut Vec<u8> {
        &mut self.out
    }

    pub fn send_u8(&mut self, value: u8) {
        self.out.push(value);
    }

    pub fn send_i16(&mut self, value: i16) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn send_i32(&mut self, value: i32) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn send_bytes(&mut self, data: &[u8]) {
        self.out.extend_from_slice(data);
    }

    /// Send text in the active encoding, without a terminator.
    pub fn send_str(&mut self, text: &str) {
        let encoded = self.encoding.encode(text);
        self.out.extend_from_slice(&encoded);
    }

    /// Send text in the active encoding followed by a NUL byte.
    pub fn send_cstr(&mut self, text: &str) {
        self.send_str(text);
        self.out.push(0);
    }

    /// Send exactly `len` bytes read from `reader` without holding them all in memory.
    ///
    /// See [`Transport::send_stream_mapped`].
    pub fn send_stream(
        &mut self,
        reader: &mut dyn Read,
        len: usize,
    ) -> Result<Option<std::io::Error>> {
        self.send_stream_mapped(reader, len, |chunk, out| out.extend_from_slice(chunk))
    }

    /// Send `len` bytes from `reader`, passing each chunk through `map`.
    ///
    /// If the reader fails or ends early, the rest is filled with zero bytes
    /// so the already-announced message length stays correct, and the read
    /// failure is returned as `Ok(Some(_))`. Socket failures are `Err`.
    pub fn send_stream_mapped(
        &mut self,
        reader: &mut dyn Read,
        len: usize,
        mut map: impl FnMut(&[u8], &mut Vec<u8>),
    ) -> Result<Option<std::io::Error>> {
        let mut chunk = [0u8; STREAM_FLUSH_THRESHOLD];
        let mut remaining = len;
        let mut failure: Option<std::io::Error> = None;

        while remaining > 0 {
            let want = remaining.min(chunk.len());
            let Some(window) = chunk.get_mut(..want) else {
                break;
            };
            let read = if failure.is_some() {
                window.fill(0);
                want
            } else {
                match reader.read(window) {
                    Ok(0) => {
                        failure = Some(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!(
                                "Premature end of input stream, expected {len} bytes, but only read {}.",
                                len - remaining
                            ),
                        ));
                        continue;
                    }
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        failure = Some(e);
                        continue;
                    }
                }
            };

            map(chunk.get(..read).unwrap_or_default(), &mut self.out);
            remaining -= read;

            if self.out.len() >= STREAM_FLUSH_THRESHOLD {
                self.write_out()?;
            }
        }

        Ok(failure)
    }

    fn write_out(&mut self) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(closed)?;
        stream.write_all(&self.out)?;
        self.out.clear();
        Ok(())
    }

    /// Send everything buffered so far.
    pub fn flush(&mut self) -> Result<()> {
        self.write_out()?;
        self.stream()?.flush()?;
        Ok(())
    }

    pub fn recv_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.stream()?.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    pub fn recv_i16(&mut self) -> Result<i16> {
        let mut raw = [0u8; 2];
        self.stream()?.read_exact(&mut raw)?;
        Ok(i16::from_be_bytes(raw))
    }

    pub fn recv_i32(&mut self) -> Result<i32> {
        let mut raw = [0u8; 4];
        self.stream()?.read_exact(&mut raw)?;
        Ok(i32::from_be_bytes(raw))
    }

    pub fn recv_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut data = vec![0u8; len];
        self.stream()?.read_exact(&mut data)?;
        Ok(data)
    }

    /// Like [`Transport::recv_bytes`], but an allocation failure skips the
    /// bytes on the wire and yields `None`.
    pub fn try_recv_bytes(&mut self, len: usize) -> Result<Option<Vec<u8>>> {
        let mut data = Vec::new();
        if data.try_reserve_exact(len).is_err() {
            self.skip(len)?;
            return Ok(None);
        }
        data.resize(len, 0);
        self.stream()?.read_exact(&mut data)?;
        Ok(Some(data))
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.stream()?.skip(len as u64)?;
        Ok(())
    }

    /// Receive a NUL-terminated string as raw bytes, without the terminator.
    pub fn recv_cstring(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.stream()?.read_until_nul(&mut data)?;
        if data.pop() != Some(0) {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        Ok(data)
    }

    /// Receive a NUL-terminated string decoded with the active encoding.
    pub fn recv_cstr(&mut self) -> Result<String> {
        let raw = self.recv_cstring()?;
        Ok(self.encoding.decode(&raw)?.into_owned())
    }

    /// Receive a v3 message header: the tag and the payload length.
    pub fn recv_header(&mut self) -> Result<(u8, usize)> {
        let tag = self.recv_u8()?;
        let len = self.recv_i32()?;
        if len < 4 {
            return Err(Error::ProtocolViolation(format!(
                "Invalid message length: {len}"
            )));
        }
        Ok((tag, (len - 4) as usize))
    }

    /// Receive a payload of `len` bytes into the message buffer.
    pub fn recv_payload(&mut self, len: usize) -> Result<()> {
        self.payload.clear();
        self.payload.resize(len, 0);
        let stream = self.stream.as_mut().ok_or_else(closed)?;
        stream.read_exact(&mut self.payload)?;
        Ok(())
    }

    /// Receive a payload, skipping it instead when the buffer cannot grow.
    ///
    /// Returns false if the payload was skipped.
    pub fn try_recv_payload(&mut self, len: usize) -> Result<bool> {
        self.payload.clear();
        if self.payload.try_reserve_exact(len).is_err() {
            self.skip(len)?;
            return Ok(false);
        }
        self.recv_payload(len)?;
        Ok(true)
    }

    /// Receive a whole v3 message and return its tag; see [`Transport::payload`].
    pub fn recv_message(&mut self) -> Result<u8> {
        let (tag, len) = self.recv_header()?;
        self.recv_payload(len)?;
        Ok(tag)
    }

    /// Payload of the last message received.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether input is waiting to be read, checked without blocking.
    pub fn has_pending(&mut self) -> Result<bool> {
        Ok(self.stream()?.poll_readable()?)
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.stream()?.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Close the socket. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown() {
                tracing::debug!("error shutting down socket: {e}");
            }
        }
        self.out.clear();
    }
}
