//! A server endpoint owns one TCP connection to one cache server, tracks its
//! connection status (including a timed "dead" cooldown after a failed
//! connect attempt), and provides byte-exact line/length framing primitives
//! used by the protocol layer.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::config::ServerSpec;
use crate::error::Error;

/// The TCP connect timeout. Design-fixed: this is what production
/// deployments of the memcached ASCII protocol expect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);
/// How long a server stays dead after a failed connect attempt before the
/// next `ensure_open()` will retry it.
pub const DEAD_COOLDOWN: Duration = Duration::from_secs(30);

/// A blocking transport a [`ServerEndpoint`] can open. Implemented for
/// [`TcpStream`] in production; tests substitute a mock so the dead/retry
/// state machine can be exercised without a real listener.
pub trait Connection: Read + Write + Sized {
    /// Open a connection to `addr` ("host:port"), bounded by `timeout`.
    fn connect(addr: &str, timeout: Duration) -> io::Result<Self>;
    /// Bound how long a subsequent read may block.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Connection for TcpStream {
    fn connect(addr: &str, timeout: Duration) -> io::Result<Self> {
        let sockaddr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unresolvable address"))?;
        let stream = TcpStream::connect_timeout(&sockaddr, timeout)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

/// The connection status of one server endpoint. `buf` holds bytes already
/// read from the socket but not yet consumed by a line/length read.
#[derive(Debug)]
enum Status<C> {
    NotConnected,
    Connected { conn: C, buf: Vec<u8> },
    Dead { retry_at: SystemTime, reason: String },
}

/// One server in the cluster: its identity (host, port, weight) plus the
/// mutable connection it owns. Endpoints never silently swap identity.
#[derive(Debug)]
pub struct ServerEndpoint<C: Connection = TcpStream> {
    host: String,
    port: u16,
    weight: u32,
    status: Status<C>,
}

impl<C: Connection> ServerEndpoint<C> {
    /// Create a new, not-yet-connected endpoint for `spec`.
    pub fn new(spec: &ServerSpec) -> Self {
        Self {
            host: spec.host.clone(),
            port: spec.port,
            weight: spec.weight,
            status: Status::NotConnected,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// `"host:port"`, the dial target and the stats response key.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// True if this endpoint currently holds a live, open socket. Does not
    /// attempt to open one; see [`Self::ensure_open`] for that.
    pub fn is_connected(&self) -> bool {
        matches!(self.status, Status::Connected { .. })
    }

    /// Ensure a live connection is available, opening or reconnecting as
    /// needed, and return whether one is now open.
    ///
    /// If already connected, returns `true` immediately. If dead and the
    /// cooldown has not elapsed, returns `false` without any side effect. If
    /// not connected (or the cooldown has elapsed), attempts a TCP connect
    /// bounded by [`CONNECT_TIMEOUT`]; on failure marks the endpoint dead
    /// for [`DEAD_COOLDOWN`] and returns `false`.
    pub fn ensure_open(&mut self, read_timeout: Duration) -> bool {
        match &self.status {
            Status::Connected { .. } => {
                debug!(host = %self.host, port = self.port, "reusing open connection");
                true
            }
            Status::Dead { retry_at, .. } => {
                if SystemTime::now() < *retry_at {
                    false
                } else {
                    self.connect(read_timeout);
                    self.is_connected()
                }
            }
            Status::NotConnected => {
                self.connect(read_timeout);
                self.is_connected()
            }
        }
    }

    fn connect(&mut self, read_timeout: Duration) {
        let addr = self.address();
        match C::connect(&addr, CONNECT_TIMEOUT) {
            Ok(conn) => {
                if let Err(err) = conn.set_read_timeout(Some(read_timeout)) {
                    warn!(host = %self.host, port = self.port, error = %err, "failed to set read timeout");
                }
                debug!(host = %self.host, port = self.port, "connected");
                self.status = Status::Connected {
                    conn,
                    buf: Vec::new(),
                };
            }
            Err(err) => self.mark_dead(err.to_string()),
        }
    }

    /// Close the socket if open, and transition to `NotConnected`. Does NOT
    /// mark the endpoint dead — used after a post-connect I/O error, where
    /// the next operation should retry immediately rather than wait out a
    /// cooldown.
    pub fn close(&mut self) {
        if let Status::Connected { .. } = self.status {
            warn!(host = %self.host, port = self.port, "closing connection after io error");
        }
        self.status = Status::NotConnected;
    }

    /// Close the socket if open, and mark the endpoint dead until
    /// `now + DEAD_COOLDOWN`. Reserved for connect-time failures.
    pub fn mark_dead(&mut self, reason: String) {
        let retry_at = SystemTime::now() + DEAD_COOLDOWN;
        warn!(
            host = %self.host,
            port = self.port,
            reason = %reason,
            "marking server dead",
        );
        self.status = Status::Dead { retry_at, reason };
    }

    /// The human-readable status line recorded by `mark_dead`, if the
    /// endpoint is currently dead.
    pub fn dead_reason(&self) -> Option<String> {
        match &self.status {
            Status::Dead { retry_at, reason } => {
                Some(format!("DEAD: {}, will retry at {:?}", reason, retry_at))
            }
            _ => None,
        }
    }

    /// Write `data` verbatim to the open socket. A post-connect I/O error
    /// closes the socket (without marking it dead) per §4.2/§7.
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        let outcome = match &mut self.status {
            Status::Connected { conn, .. } => conn.write_all(data).map_err(Error::from),
            _ => return Err(Error::NoConnection),
        };
        if outcome.is_err() {
            self.close();
        }
        outcome
    }

    /// Read one `\r\n`-terminated line, excluding the terminator.
    pub fn read_line(&mut self) -> Result<Vec<u8>, Error> {
        let outcome = match &mut self.status {
            Status::Connected { conn, buf } => read_line_buffered(conn, buf),
            _ => return Err(Error::NoConnection),
        };
        if outcome.is_err() {
            self.close();
        }
        outcome
    }

    /// Read exactly `n` bytes, not including any trailing line terminator.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        let outcome = match &mut self.status {
            Status::Connected { conn, buf } => read_exact_buffered(conn, buf, n),
            _ => return Err(Error::NoConnection),
        };
        if outcome.is_err() {
            self.close();
        }
        outcome
    }

    /// Read and discard exactly one `\r\n`, failing with a protocol error
    /// if the next two bytes are anything else.
    pub fn expect_crlf(&mut self) -> Result<(), Error> {
        let bytes = self.read_exact(2)?;
        if bytes == b"\r\n" {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "expected line terminator, got {:?}",
                bytes
            )))
        }
    }

    /// Replace the open connection with `conn`, keeping any already-open
    /// status. Used by other modules' tests to preload a canned response
    /// after `ensure_open` has run against a plain [`tests_support::MockConn`].
    #[cfg(test)]
    pub(crate) fn swap_connection_for_test(&mut self, conn: C) {
        self.status = Status::Connected {
            conn,
            buf: Vec::new(),
        };
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn fill_from_socket<C: Read>(conn: &mut C, buf: &mut Vec<u8>) -> Result<(), Error> {
    let mut chunk = [0u8; 4096];
    let n = conn.read(&mut chunk)?;
    if n == 0 {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        )));
    }
    buf.extend_from_slice(&chunk[..n]);
    Ok(())
}

fn read_line_buffered<C: Read>(conn: &mut C, buf: &mut Vec<u8>) -> Result<Vec<u8>, Error> {
    loop {
        if let Some(pos) = find_crlf(buf) {
            let line: Vec<u8> = buf.drain(..pos).collect();
            buf.drain(..2);
            return Ok(line);
        }
        fill_from_socket(conn, buf)?;
    }
}

fn read_exact_buffered<C: Read>(
    conn: &mut C,
    buf: &mut Vec<u8>,
    n: usize,
) -> Result<Vec<u8>, Error> {
    while buf.len() < n {
        fill_from_socket(conn, buf)?;
    }
    Ok(buf.drain(..n).collect())
}

/// Mock [`Connection`] implementations shared by this module's tests and by
/// `ring`'s tests, so ring/selection behavior can be exercised without a
/// real listener.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::{Connection, Duration};
    use std::cell::RefCell;
    use std::io::{self, Cursor, Read, Write};
    use std::rc::Rc;

    /// A mock connection that always succeeds, backed by an in-memory
    /// buffer, so endpoint-lifecycle tests don't need a real listener.
    pub struct MockConn {
        buf: Rc<RefCell<Cursor<Vec<u8>>>>,
    }

    impl MockConn {
        /// Pre-load bytes the client will read back, as if a server had
        /// already written them.
        pub fn preloaded(data: &[u8]) -> Self {
            MockConn {
                buf: Rc::new(RefCell::new(Cursor::new(data.to_vec()))),
            }
        }
    }

    impl Read for MockConn {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            self.buf.borrow_mut().read(out)
        }
    }

    impl Write for MockConn {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.buf.borrow_mut().get_mut().extend_from_slice(data);
            Ok(data.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Connection for MockConn {
        fn connect(_addr: &str, _timeout: Duration) -> io::Result<Self> {
            Ok(MockConn {
                buf: Rc::new(RefCell::new(Cursor::new(vec![]))),
            })
        }

        fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }

    /// A mock connection whose `connect` always fails, to exercise the
    /// mark-dead/cooldown path.
    pub struct FailingConn;

    impl Read for FailingConn {
        fn read(&mut self, _out: &mut [u8]) -> io::Result<usize> {
            unreachable!("connect always fails, this is never constructed")
        }
    }
    impl Write for FailingConn {
        fn write(&mut self, _data: &[u8]) -> io::Result<usize> {
            unreachable!("connect always fails, this is never constructed")
        }
        fn flush(&mut self) -> io::Result<()> {
            unreachable!("connect always fails, this is never constructed")
        }
    }
    impl Connection for FailingConn {
        fn connect(_addr: &str, _timeout: Duration) -> io::Result<Self> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }
        fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }
}
