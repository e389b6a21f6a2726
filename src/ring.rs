//! The bucket ring: a weight-replicated sequence of server indices used to
//! map a hashed key to a server, and the perturbation-retry selection
//! algorithm that routes around dead servers.

use std::net::TcpStream;
use std::time::Duration;

use tracing::warn;

use crate::config::ServerSpec;
use crate::error::Error;
use crate::hash::hash_key;
use crate::server::{Connection, ServerEndpoint};

/// The number of perturbation retries attempted before giving up on a key
/// when more than one server is configured.
const MAX_TRIES: u32 = 20;

/// An ordered, weight-replicated sequence of servers. Rebuilt atomically
/// whenever the server list changes; `len(buckets) == sum(weight)` and each
/// server appears in `buckets` exactly `weight` times (order among repeats
/// is not observable).
#[derive(Debug)]
pub struct Ring<C: Connection = TcpStream> {
    servers: Vec<ServerEndpoint<C>>,
    buckets: Vec<usize>,
}

impl<C: Connection> Ring<C> {
    /// Build a ring from the parsed server list.
    pub fn new(specs: &[ServerSpec]) -> Self {
        let servers = specs.iter().map(ServerEndpoint::new).collect::<Vec<_>>();
        let mut buckets = Vec::with_capacity(specs.iter().map(|s| s.weight as usize).sum());
        for (index, spec) in specs.iter().enumerate() {
            for _ in 0..spec.weight {
                buckets.push(index);
            }
        }
        Self { servers, buckets }
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Iterate over every configured endpoint, regardless of key hashing.
    /// Used by operations that touch every server (`stats`, `reset`).
    pub fn endpoints_mut(&mut self) -> impl Iterator<Item = &mut ServerEndpoint<C>> {
        self.servers.iter_mut()
    }

    /// Look up an already-selected endpoint by index.
    pub fn endpoint_mut(&mut self, index: usize) -> &mut ServerEndpoint<C> {
        &mut self.servers[index]
    }

    /// Look up an already-selected endpoint by index, read-only.
    pub fn endpoint(&self, index: usize) -> &ServerEndpoint<C> {
        &self.servers[index]
    }

    /// Select a live server for `key`, opening its connection as needed.
    /// Returns the server's index into this ring.
    ///
    /// With exactly one configured server, the hash is skipped entirely
    /// (the "fast path" of §4.3); a connect failure there is reported as
    /// [`Error::NoConnection`]. With more than one server, up to
    /// [`MAX_TRIES`] perturbed hashes are attempted before giving up with
    /// [`Error::NoServersAvailable`].
    pub fn select(&mut self, key: &[u8], read_timeout: Duration) -> Result<usize, Error> {
        if self.servers.is_empty() {
            return Err(Error::NoActiveServers);
        }

        if self.servers.len() == 1 {
            return if self.servers[0].ensure_open(read_timeout) {
                Ok(0)
            } else {
                Err(Error::NoConnection)
            };
        }

        let mut h = hash_key(key);
        for t in 0..MAX_TRIES {
            let index = self.buckets[(h as usize) % self.buckets.len()];
            if self.servers[index].ensure_open(read_timeout) {
                return Ok(index);
            }
            warn!(try_index = t, "server unavailable, perturbing hash and retrying");
            let mut perturbed = t.to_string().into_bytes();
            perturbed.extend_from_slice(key);
            h = h.wrapping_add(hash_key(&perturbed));
        }

        Err(Error::NoServersAvailable)
    }
}
