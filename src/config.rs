//! Client configuration: options recognized at construction, and parsing of
//! the `"host:port[:weight]"` server list syntax.

use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// The default memcached port, used when a server spec omits one.
pub const DEFAULT_PORT: u16 = 11211;
/// The default weight for a server spec that omits one.
pub const DEFAULT_WEIGHT: u32 = 1;

/// Options recognized at client construction. Immutable after construction.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Optional key prefix applied to every wire key, as `"{namespace}:{key}"`.
    pub namespace: Option<String>,
    /// When true, mutating operations fail with [`Error::ReadOnly`] before
    /// touching the network.
    pub readonly: bool,
    /// Wall-clock bound on awaiting a server response.
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            namespace: None,
            readonly: false,
            // Generous relative to the 0.25s connect timeout and 30s dead
            // cooldown: long enough for a loaded server to answer, short
            // enough that a wedged socket doesn't hang a caller forever.
            request_timeout: Duration::from_secs(1),
        }
    }
}

impl ClientOptions {
    /// Qualify a caller-supplied key with the configured namespace, if any.
    pub fn qualify(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, key),
            None => key.to_string(),
        }
    }
}

/// One entry of the server list: an address plus a replication weight in
/// the bucket ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub host: String,
    pub port: u16,
    pub weight: u32,
}

impl ServerSpec {
    /// The canonical `"host:port"` form used as both the dial target and
    /// the key in [`crate::client::Client::stats`]'s response map.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerSpec {
    type Err = Error;

    /// Parse `"host:port"` or `"host:port:weight"`. A missing port defaults
    /// to 11211, a missing weight defaults to 1. An empty host or a port of
    /// zero is a usage error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let host = parts
            .next()
            .ok_or_else(|| Error::Usage(format!("empty server spec: {:?}", s)))?
            .to_string();
        if host.is_empty() {
            return Err(Error::Usage(format!("empty host in server spec: {:?}", s)));
        }

        let port = match parts.next() {
            Some(p) if !p.is_empty() => p
                .parse::<u16>()
                .map_err(|_| Error::Usage(format!("invalid port in server spec: {:?}", s)))?,
            _ => DEFAULT_PORT,
        };
        if port == 0 {
            return Err(Error::Usage(format!("zero port in server spec: {:?}", s)));
        }

        let weight = match parts.next() {
            Some(w) if !w.is_empty() => w
                .parse::<u32>()
                .map_err(|_| Error::Usage(format!("invalid weight in server spec: {:?}", s)))?,
            _ => DEFAULT_WEIGHT,
        };
        if weight == 0 {
            return Err(Error::Usage(format!("zero weight in server spec: {:?}", s)));
        }

        Ok(ServerSpec { host, port, weight })
    }
}

/// Parse a server list given as a single `"host:port[:weight]"` string or a
/// sequence of them. Accepts anything iterable over `&str`.
pub fn parse_server_list<'a, I: IntoIterator<Item = &'a str>>(
    specs: I,
) -> Result<Vec<ServerSpec>, Error> {
    let servers = specs
        .into_iter()
        .map(ServerSpec::from_str)
        .collect::<Result<Vec<_>, _>>()?;
    if servers.is_empty() {
        return Err(Error::Usage("server list must not be empty".into()));
    }
    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_only() {
        let spec: ServerSpec = "localhost".parse().unwrap();
        assert_eq!("localhost", spec.host);
        assert_eq!(DEFAULT_PORT, spec.port);
        assert_eq!(DEFAULT_WEIGHT, spec.weight);
    }

    #[test]
    fn test_host_port() {
        let spec: ServerSpec = "10.0.0.1:11311".parse().unwrap();
        assert_eq!("10.0.0.1", spec.host);
        assert_eq!(11311, spec.port);
        assert_eq!(1, spec.weight);
    }

    #[test]
    fn test_host_port_weight() {
        let spec: ServerSpec = "10.0.0.1:11311:3".parse().unwrap();
        assert_eq!("10.0.0.1", spec.host);
        assert_eq!(11311, spec.port);
        assert_eq!(3, spec.weight);
    }

    #[test]
    fn test_empty_host_is_usage_error() {
        assert!(matches!(
            ":11211".parse::<ServerSpec>(),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn test_zero_port_is_usage_error() {
        assert!(matches!(
            "localhost:0".parse::<ServerSpec>(),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn test_empty_list_is_usage_error() {
        let empty: Vec<&str> = vec![];
        assert!(matches!(parse_server_list(empty), Err(Error::Usage(_))));
    }

    #[test]
    fn test_namespace_qualify() {
        let opts = ClientOptions {
            namespace: Some("ns".into()),
            ..ClientOptions::default()
        };
        assert_eq!("ns:k", opts.qualify("k"));

        let opts = ClientOptions::default();
        assert_eq!("k", opts.qualify("k"));
    }
}
