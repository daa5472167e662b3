use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;
use std::time::Duration;

#[cfg(feature = "tls")]
use native_tls::TlsStream;
use socket2::SockRef;

/// Socket variants a session can run over.
pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(feature = "tls")]
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
    Unix(BufReader<UnixStream>),
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(BufReader::new(stream))
    }

    #[cfg(feature = "tls")]
    pub fn tls(stream: TlsStream<TcpStream>) -> Self {
        Self::Tls(Box::new(BufReader::new(stream)))
    }

    pub fn unix(stream: UnixStream) -> Self {
        Self::Unix(BufReader::new(stream))
    }

    fn reader(&mut self) -> &mut dyn BufRead {
        match self {
            Stream::Tcp(r) => r,
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.as_mut(),
            Stream::Unix(r) => r,
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Stream::Tcp(r) => r.get_mut(),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.get_mut(),
            Stream::Unix(r) => r.get_mut(),
        }
    }

    fn tcp_socket(&self) -> Option<&TcpStream> {
        match self {
            Stream::Tcp(r) => Some(r.get_ref()),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => Some(r.get_ref().get_ref()),
            Stream::Unix(_) => None,
        }
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.reader().read_exact(buf)
    }

    /// Read up to and including the next NUL byte.
    pub fn read_until_nul(&mut self, out: &mut Vec<u8>) -> std::io::Result<usize> {
        self.reader().read_until(0, out)
    }

    /// Discard `len` bytes.
    pub fn skip(&mut self, len: u64) -> std::io::Result<()> {
        let copied = std::io::copy(&mut self.reader().take(len), &mut std::io::sink())?;
        if copied < len {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        Ok(())
    }

    /// Read and discard until the peer closes the socket.
    pub fn drain(&mut self) -> std::io::Result<u64> {
        std::io::copy(self.reader(), &mut std::io::sink())
    }

    pub fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.writer().write_all(buf)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer().flush()
    }

    /// Bytes already read from the socket but not yet consumed.
    pub fn buffered(&self) -> usize {
        match self {
            Stream::Tcp(r) => r.buffer().len(),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.buffer().len(),
            Stream::Unix(r) => r.buffer().len(),
        }
    }

    /// Non-blocking check for unread input.
    pub fn poll_readable(&mut self) -> std::io::Result<bool> {
        if self.buffered() > 0 {
            return Ok(true);
        }
        self.set_nonblocking(true)?;
        let ready = match self.reader().fill_buf() {
            Ok(buf) => Ok(!buf.is_empty()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        };
        self.set_nonblocking(false)?;
        ready
    }

    fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()> {
        match self {
            Stream::Unix(r) => r.get_ref().set_nonblocking(nonblocking),
            _ => match self.tcp_socket() {
                Some(tcp) => tcp.set_nonblocking(nonblocking),
                None => Ok(()),
            },
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        match self {
            Stream::Unix(r) => r.get_ref().set_read_timeout(timeout),
            _ => match self.tcp_socket() {
                Some(tcp) => tcp.set_read_timeout(timeout),
                None => Ok(()),
            },
        }
    }

    /// Enable or disable TCP keep-alive. No-op for Unix sockets.
    pub fn set_keepalive(&self, keepalive: bool) -> std::io::Result<()> {
        match self.tcp_socket() {
            Some(tcp) => SockRef::from(tcp).set_keepalive(keepalive),
            None => Ok(()),
        }
    }

    pub fn shutdown(&self) -> std::io::Result<()> {
        match self {
            Stream::Unix(r) => r.get_ref().shutdown(Shutdown::Both),
            _ => match self.tcp_socket() {
                Some(tcp) => tcp.shutdown(Shutdown::Both),
                None => Ok(()),
            },
        }
    }

    /// Unwrap a plaintext TCP stream for a TLS upgrade.
    pub fn into_tcp(self) -> Option<TcpStream> {
        match self {
            Stream::Tcp(r) => Some(r.into_inner()),
            _ => None,
        }
    }
}
