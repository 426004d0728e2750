//! Blocking transport for callers without an async runtime.
//!
//! Reads are polled with a short socket read timeout so one thread can
//! interleave inbound frames with its outbound queue. A partially received
//! line survives a timed-out poll and is completed by the next one.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::Endpoint;
use crate::error::Error;

/// Outcome of one [`BlockingTransport::poll_frame`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePoll {
    /// A complete non-blank line, without its terminator.
    Frame(String),
    /// Nothing complete arrived within the poll window.
    Idle,
    /// The peer closed the connection.
    Closed,
}

// ── Socket ───────────────────────────────────────────────────────────

enum Socket {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Socket {
    fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(s) => s.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(s) => s.try_clone().map(Self::Unix),
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.set_read_timeout(timeout),
            #[cfg(unix)]
            Self::Unix(s) => s.set_read_timeout(timeout),
        }
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.set_write_timeout(timeout),
            #[cfg(unix)]
            Self::Unix(s) => s.set_write_timeout(timeout),
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(s) => s.shutdown(Shutdown::Both),
        }
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Self::Unix(s) => s.flush(),
        }
    }
}

// ── BlockingTransport ────────────────────────────────────────────────

/// A framed, blocking connection to the daemon.
pub struct BlockingTransport {
    writer: Socket,
    reader: BufReader<Socket>,
    partial: Vec<u8>,
}

impl BlockingTransport {
    /// Connect to `endpoint`.
    ///
    /// `poll_wait` bounds each [`poll_frame`](Self::poll_frame) call;
    /// `write_timeout` bounds a single blocked write.
    pub fn connect(
        endpoint: &Endpoint,
        connect_timeout: Duration,
        poll_wait: Duration,
        write_timeout: Duration,
    ) -> Result<Self, Error> {
        let socket = open_socket(endpoint, connect_timeout).map_err(|source| Error::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;
        // A zero duration means "block forever" to the OS; clamp it.
        socket.set_read_timeout(Some(poll_wait.max(Duration::from_millis(1))))?;
        socket.set_write_timeout(Some(write_timeout.max(Duration::from_millis(1))))?;
        let reader = BufReader::new(socket.try_clone()?);
        Ok(Self {
            writer: socket,
            reader,
            partial: Vec::new(),
        })
    }

    /// Write one frame followed by `\n`.
    pub fn write_frame(&mut self, frame: &str) -> Result<(), Error> {
        if frame.contains('\n') {
            return Err(Error::InvalidFrame(
                "frame contains a raw newline".to_owned(),
            ));
        }
        let mut buf = Vec::with_capacity(frame.len() + 1);
        buf.extend_from_slice(frame.as_bytes());
        buf.push(b'\n');
        self.writer.write_all(&buf)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Wait up to the poll window for the next complete frame.
    pub fn poll_frame(&mut self) -> Result<FramePoll, Error> {
        loop {
            match self.reader.read_until(b'\n', &mut self.partial) {
                Ok(0) => return Ok(FramePoll::Closed),
                Ok(_) => {
                    if self.partial.last() != Some(&b'\n') {
                        // EOF mid-line; the next read reports the close.
                        continue;
                    }
                    let raw = std::mem::take(&mut self.partial);
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim_end_matches(['\n', '\r']);
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Ok(FramePoll::Frame(line.to_owned()));
                }
                Err(e) if is_timeout(&e) => return Ok(FramePoll::Idle),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn close(self) {
        if let Err(e) = self.writer.shutdown() {
            tracing::debug!(error = %e, "socket shutdown failed");
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

// ── Connecting ───────────────────────────────────────────────────────

fn open_socket(endpoint: &Endpoint, timeout: Duration) -> io::Result<Socket> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let mut last_err = None;
            for resolved in addr.to_socket_addrs()? {
                match TcpStream::connect_timeout(&resolved, timeout) {
                    Ok(stream) => {
                        stream.set_nodelay(true)?;
                        return Ok(Socket::Tcp(stream));
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            Err(last_err.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("{addr} did not resolve"))
            }))
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => std::os::unix::net::UnixStream::connect(path).map(Socket::Unix),
        #[cfg(unix)]
        Endpoint::Abstract(name) => connect_abstract(name).map(Socket::Unix),
        #[cfg(not(unix))]
        Endpoint::Unix(_) | Endpoint::Abstract(_) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Unix-domain sockets are not available on this platform",
        )),
    }
}

/// Connect to a socket in the Linux abstract namespace.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn connect_abstract(name: &str) -> io::Result<std::os::unix::net::UnixStream> {
    #[cfg(target_os = "android")]
    use std::os::android::net::SocketAddrExt;
    #[cfg(target_os = "linux")]
    use std::os::linux::net::SocketAddrExt;

    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
    std::os::unix::net::UnixStream::connect_addr(&addr)
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
pub(crate) fn connect_abstract(_name: &str) -> io::Result<std::os::unix::net::UnixStream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract Unix sockets require Linux or Android",
    ))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::{BufRead as _, Write as _};
    use std::net::TcpListener;

    fn connect(addr: std::net::SocketAddr) -> BlockingTransport {
        BlockingTransport::connect(
            &Endpoint::tcp(addr.to_string()),
            Duration::from_secs(2),
            Duration::from_millis(20),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[test]
    fn partial_lines_survive_idle_polls() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut transport = connect(listener.local_addr().unwrap());
        let (mut server, _) = listener.accept().unwrap();

        server.write_all(b"{\"type\":").unwrap();
        server.flush().unwrap();
        assert_eq!(transport.poll_frame().unwrap(), FramePoll::Idle);

        server.write_all(b"\"a\"}\n\n").unwrap();
        server.flush().unwrap();
        let mut frame = FramePoll::Idle;
        for _ in 0..100 {
            frame = transport.poll_frame().unwrap();
            if frame != FramePoll::Idle {
                break;
            }
        }
        assert_eq!(frame, FramePoll::Frame(r#"{"type":"a"}"#.to_owned()));

        drop(server);
        let mut end = FramePoll::Idle;
        for _ in 0..100 {
            end = transport.poll_frame().unwrap();
            if end != FramePoll::Idle {
                break;
            }
        }
        assert_eq!(end, FramePoll::Closed);
    }

    #[test]
    fn writes_frames_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut transport = connect(listener.local_addr().unwrap());
        let (server, _) = listener.accept().unwrap();

        transport.write_frame("one").unwrap();
        transport.write_frame("two").unwrap();
        assert!(matches!(transport.write_frame("x\ny"), Err(Error::InvalidFrame(_))));
        transport.close();

        let lines: Vec<String> = std::io::BufReader::new(server)
            .lines()
            .map(Result::unwrap)
            .collect();
        assert_eq!(lines, ["one", "two"]);
    }

    #[test]
    fn refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = BlockingTransport::connect(
            &Endpoint::tcp(addr.to_string()),
            Duration::from_millis(500),
            Duration::from_millis(10),
            Duration::from_millis(500),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::Connect { .. }));
    }
}
