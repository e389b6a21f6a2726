use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io;

/// An error arising from communication with a memcached cluster, or from
/// misusing the client.
#[derive(Debug)]
pub enum Error {
    /// No server has ever been configured on this client.
    NoActiveServers,
    /// Every candidate server for a key is currently marked dead.
    NoServersAvailable,
    /// The selected server could not be opened.
    NoConnection,
    /// A mutating operation was attempted on a read-only client.
    ReadOnly,
    /// The server sent a response that does not parse as the expected
    /// framing for the request that was made.
    Protocol(String),
    /// The underlying TCP socket failed, including a read timeout.
    Io(io::Error),
    /// An argument or call shape was invalid (bad host/port, empty host,
    /// zero port, empty server list, etc).
    Usage(String),
}

/// A `Result` alias using this crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Error::NoActiveServers => write!(f, "no active servers configured"),
            Error::NoServersAvailable => write!(f, "no servers available (all candidates dead)"),
            Error::NoConnection => write!(f, "could not open a connection to the selected server"),
            Error::ReadOnly => write!(f, "client is read-only"),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::Usage(msg) => write!(f, "usage error: {}", msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn test_display() {
        assert_eq!(
            "no servers available (all candidates dead)",
            format!("{}", Error::NoServersAvailable)
        );
        assert_eq!(
            "protocol error: truncated VALUE line",
            format!("{}", Error::Protocol("truncated VALUE line".into()))
        );
        assert_eq!("client is read-only", format!("{}", Error::ReadOnly));
    }
}
