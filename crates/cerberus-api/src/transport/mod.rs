//! Newline-framed byte transport.
//!
//! [`FramedTransport`] is the async variant used by the connection manager;
//! [`blocking::BlockingTransport`] is the thread-friendly variant used by the
//! probe connector. Both speak the same framing: one UTF-8 JSON document per
//! line, `\n` terminated, blank lines skipped, EOF means the peer went away.

pub mod blocking;
mod endpoint;

pub use endpoint::{DEFAULT_ABSTRACT_NAME, DEFAULT_TCP_ADDR, Endpoint};

use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;

use crate::error::Error;

// ── Stream abstraction ───────────────────────────────────────────────

/// Any bidirectional byte stream the transport can frame.
pub trait IpcStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> IpcStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

type BoxedStream = Box<dyn IpcStream>;

// ── FramedTransport ──────────────────────────────────────────────────

/// An open, framed connection to the daemon.
pub struct FramedTransport {
    reader: FrameReader,
    writer: FrameWriter,
}

impl FramedTransport {
    /// Open a socket to `endpoint`, bounded by `timeout`.
    pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self, Error> {
        let stream = tokio::time::timeout(timeout, open_stream(endpoint))
            .await
            .map_err(|_| Error::ConnectTimeout {
                endpoint: endpoint.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(|source| Error::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;
        Ok(Self::from_stream(stream))
    }

    /// Frame an already-open stream (in-memory duplex pipes in tests).
    pub fn from_stream<S: IpcStream + 'static>(stream: S) -> Self {
        let boxed: BoxedStream = Box::new(stream);
        let (read, write) = tokio::io::split(boxed);
        Self {
            reader: FrameReader {
                inner: BufReader::new(read),
                buf: Vec::new(),
            },
            writer: FrameWriter { inner: write },
        }
    }

    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        (self.reader, self.writer)
    }

    pub async fn read_frame(&mut self) -> Result<Option<String>, Error> {
        self.reader.read_frame().await
    }

    pub async fn write_frame(&mut self, frame: &str) -> Result<(), Error> {
        self.writer.write_frame(frame).await
    }

    pub async fn close(self) {
        self.writer.close().await;
    }
}

// ── Halves ───────────────────────────────────────────────────────────

/// Read half. [`read_frame`](Self::read_frame) is cancel-safe: a partly
/// read line stays in `buf` and the next call completes it.
pub struct FrameReader {
    inner: BufReader<ReadHalf<BoxedStream>>,
    buf: Vec<u8>,
}

impl FrameReader {
    /// Next non-blank line without its terminator; `None` on EOF.
    ///
    /// A line that is not valid UTF-8 is logged and skipped.
    pub async fn read_frame(&mut self) -> Result<Option<String>, Error> {
        loop {
            let n = self.inner.read_until(b'\n', &mut self.buf).await?;
            if n == 0 && self.buf.is_empty() {
                return Ok(None);
            }
            let mut raw = std::mem::take(&mut self.buf);
            if raw.last() == Some(&b'\n') {
                raw.pop();
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }
            }
            match String::from_utf8(raw) {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => return Ok(Some(line)),
                Err(e) => {
                    tracing::debug!(
                        len = e.as_bytes().len(),
                        error = %e.utf8_error(),
                        "skipping non-UTF-8 line"
                    );
                }
            }
        }
    }
}

/// Write half.
pub struct FrameWriter {
    inner: WriteHalf<BoxedStream>,
}

impl FrameWriter {
    /// Write one frame followed by `\n` and flush.
    pub async fn write_frame(&mut self, frame: &str) -> Result<(), Error> {
        if frame.contains('\n') {
            return Err(Error::InvalidFrame(
                "frame contains a raw newline".to_owned(),
            ));
        }
        let mut buf = Vec::with_capacity(frame.len() + 1);
        buf.extend_from_slice(frame.as_bytes());
        buf.push(b'\n');
        self.inner.write_all(&buf).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Best-effort orderly shutdown of the write direction.
    pub async fn close(mut self) {
        if let Err(e) = self.inner.shutdown().await {
            tracing::debug!(error = %e, "socket shutdown failed");
        }
    }
}

// ── Connecting ───────────────────────────────────────────────────────

async fn open_stream(endpoint: &Endpoint) -> std::io::Result<BoxedStream> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str()).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        Endpoint::Unix(path) => open_unix(path).await,
        Endpoint::Abstract(name) => open_abstract(name).await,
    }
}

#[cfg(unix)]
async fn open_unix(path: &std::path::Path) -> std::io::Result<BoxedStream> {
    Ok(Box::new(tokio::net::UnixStream::connect(path).await?))
}

#[cfg(not(unix))]
async fn open_unix(_path: &std::path::Path) -> std::io::Result<BoxedStream> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "Unix-domain sockets are not available on this platform",
    ))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
async fn open_abstract(name: &str) -> std::io::Result<BoxedStream> {
    let name = name.to_owned();
    let std_stream = tokio::task::spawn_blocking(move || blocking::connect_abstract(&name))
        .await
        .map_err(std::io::Error::other)??;
    std_stream.set_nonblocking(true)?;
    Ok(Box::new(tokio::net::UnixStream::from_std(std_stream)?))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
async fn open_abstract(_name: &str) -> std::io::Result<BoxedStream> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "abstract Unix sockets require Linux or Android",
    ))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn skips_blank_lines_and_reports_eof() {
        let (client, mut server) = tokio::io::duplex(256);
        let mut transport = FramedTransport::from_stream(client);

        server.write_all(b"\n  \n{\"type\":\"a\"}\r\n\n{\"type\":\"b\"}\n").await.unwrap();
        drop(server);

        assert_eq!(transport.read_frame().await.unwrap().as_deref(), Some(r#"{"type":"a"}"#));
        assert_eq!(transport.read_frame().await.unwrap().as_deref(), Some(r#"{"type":"b"}"#));
        assert_eq!(transport.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn non_utf8_line_is_skipped() {
        let (client, mut server) = tokio::io::duplex(256);
        let mut transport = FramedTransport::from_stream(client);

        server.write_all(b"{\"payload\":\"\xff\xfe\"}\n{\"type\":\"after\"}\n").await.unwrap();
        drop(server);

        assert_eq!(transport.read_frame().await.unwrap().as_deref(), Some(r#"{"type":"after"}"#));
        assert_eq!(transport.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn line_split_across_writes_is_reassembled() {
        let (client, mut server) = tokio::io::duplex(256);
        let mut transport = FramedTransport::from_stream(client);

        server.write_all(b"{\"type\":").await.unwrap();
        // Nothing complete yet; the partial line must survive the timeout.
        let pending = tokio::time::timeout(Duration::from_millis(50), transport.read_frame()).await;
        assert!(pending.is_err());

        server.write_all(b"\"a\"}\n").await.unwrap();
        assert_eq!(transport.read_frame().await.unwrap().as_deref(), Some(r#"{"type":"a"}"#));
    }

    #[tokio::test]
    async fn writes_newline_terminated_frames() {
        let (client, mut server) = tokio::io::duplex(256);
        let mut transport = FramedTransport::from_stream(client);

        transport.write_frame(r#"{"v":1,"type":"hello.ui"}"#).await.unwrap();
        transport.close().await;

        let mut received = String::new();
        server.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "{\"v\":1,\"type\":\"hello.ui\"}\n");
    }

    #[tokio::test]
    async fn rejects_embedded_newline() {
        let (client, _server) = tokio::io::duplex(64);
        let mut transport = FramedTransport::from_stream(client);
        let err = transport.write_frame("a\nb").await.unwrap_err();
        assert!(matches!(err, Error::InvalidFrame(_)));
    }

    #[tokio::test]
    async fn connect_refused_is_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = Endpoint::tcp(addr.to_string());
        let err = FramedTransport::connect(&endpoint, Duration::from_secs(2))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Connect { .. }));
        assert!(err.is_transient());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn connects_over_unix_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cerberus.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut server = FramedTransport::from_stream(stream);
            server.read_frame().await.unwrap()
        });

        let mut client = FramedTransport::connect(&Endpoint::unix(&path), Duration::from_secs(2))
            .await
            .unwrap();
        client.write_frame("ping").await.unwrap();

        assert_eq!(accept.await.unwrap().as_deref(), Some("ping"));
    }
}
