//! The client facade: holds the configuration, the server list, and the
//! bucket ring, and exposes the public cache operations. Two types are
//! provided, per the concurrency split described in the crate's design
//! notes: [`Client`], a single-owner handle with no locking overhead, and
//! [`SharedClient`], which wraps one behind a [`Mutex`] so it can be shared
//! across threads.

use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::Mutex;

use tracing::warn;

use crate::config::{parse_server_list, ClientOptions};
use crate::error::Error;
use crate::protocol::{self, StoreResult};
use crate::ring::Ring;
use crate::serializer::Serializer;
use crate::server::Connection;

/// A handle to a memcached cluster. Takes every operation by `&mut self`
/// and does no locking: callers must guarantee exclusive use. This is a
/// usage contract, not a compile-time one — `Client<TcpStream>` is `Sync`
/// like any other struct of `Sync` fields, so nothing stops two threads
/// from racing on a shared `&Client` if a caller forces it (e.g. through an
/// external `Arc` and unsafe cell). Use [`Client::into_shared`] to share one
/// across threads with real synchronization instead.
#[derive(Debug)]
pub struct Client<C: Connection = TcpStream> {
    ring: Ring<C>,
    options: ClientOptions,
}

impl<C: Connection> Client<C> {
    /// Build a client from a server list (`"host:port[:weight]"` entries)
    /// and the given options.
    pub fn new<'a, I: IntoIterator<Item = &'a str>>(
        servers: I,
        options: ClientOptions,
    ) -> Result<Self, Error> {
        let specs = parse_server_list(servers)?;
        Ok(Self {
            ring: Ring::new(&specs),
            options,
        })
    }

    /// Consume this client and return a [`SharedClient`] wrapping it in a
    /// mutex, so it can be used from more than one thread.
    pub fn into_shared(self) -> SharedClient<C> {
        SharedClient {
            inner: Mutex::new(self),
        }
    }

    fn check_active(&self) -> Result<(), Error> {
        if self.ring.server_count() == 0 {
            Err(Error::NoActiveServers)
        } else {
            Ok(())
        }
    }

    fn check_writable(&self) -> Result<(), Error> {
        self.check_active()?;
        if self.options.readonly {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    /// Fetch a single value, returning `None` on a cache miss.
    pub fn get<V, S: Serializer<V>>(
        &mut self,
        key: &str,
        serializer: &S,
    ) -> Result<Option<V>, Error> {
        self.check_active()?;
        let qkey = self.options.qualify(key);
        let timeout = self.options.request_timeout;
        let index = self.ring.select(qkey.as_bytes(), timeout)?;
        let ep = self.ring.endpoint_mut(index);

        protocol::send_get(ep, std::slice::from_ref(&qkey))?;
        let mut values = protocol::recv_get(ep)?;
        match values.remove(&qkey) {
            Some(bytes) => Ok(Some(serializer.decode(bytes)?)),
            None => Ok(None),
        }
    }

    /// Fetch multiple values in as few round trips as the current server
    /// roster allows (one request per server that owns at least one key).
    /// Keys that miss, or whose server could not be reached, are simply
    /// absent from the result.
    pub fn get_multi<V, S: Serializer<V>>(
        &mut self,
        keys: &[&str],
        serializer: &S,
    ) -> Result<HashMap<String, V>, Error> {
        self.check_active()?;
        let timeout = self.options.request_timeout;

        // Group qualified keys by the server that owns them, remembering
        // the caller's original (unqualified) key for the final mapping.
        let mut groups: HashMap<usize, Vec<(String, String)>> = HashMap::new();
        for &key in keys {
            let qkey = self.options.qualify(key);
            match self.ring.select(qkey.as_bytes(), timeout) {
                Ok(index) => groups
                    .entry(index)
                    .or_insert_with(Vec::new)
                    .push((qkey, key.to_string())),
                Err(err) => {
                    warn!(key = %key, error = %err, "get_multi: could not select a server, skipping key")
                }
            }
        }

        let mut qualified_to_original: HashMap<String, String> = HashMap::new();
        for group in groups.values() {
            for (qkey, original) in group {
                qualified_to_original.insert(qkey.clone(), original.clone());
            }
        }

        let mut raw_values: HashMap<String, Vec<u8>> = HashMap::new();
        let mut any_success = false;
        let mut last_error = None;

        for (index, group) in &groups {
            let qkeys: Vec<String> = group.iter().map(|(q, _)| q.clone()).collect();
            let address = self.ring.endpoint(*index).address();
            let ep = self.ring.endpoint_mut(*index);
            let outcome = match protocol::send_get(ep, &qkeys) {
                Ok(()) => protocol::recv_get(ep),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(values) => {
                    any_success = true;
                    raw_values.extend(values);
                }
                Err(err) => {
                    warn!(server = %address, error = %err, "get_multi: server group failed, treating its keys as misses");
                    last_error = Some(err);
                }
            }
        }

        if !any_success {
            if let Some(err) = last_error {
                return Err(err);
            }
        }

        let mut result = HashMap::with_capacity(raw_values.len());
        for (qkey, bytes) in raw_values {
            if let Some(original) = qualified_to_original.get(&qkey) {
                result.insert(original.clone(), serializer.decode(bytes)?);
            }
        }
        Ok(result)
    }

    /// Store a value unconditionally. The response status line is read (so
    /// the socket stays in a known framing state) but not interpreted, per
    /// the documented contract: `set` returns the value unchanged.
    pub fn set<V, S: Serializer<V>>(
        &mut self,
        key: &str,
        value: V,
        serializer: &S,
        expiry: u32,
    ) -> Result<V, Error> {
        self.check_writable()?;
        let qkey = self.options.qualify(key);
        let timeout = self.options.request_timeout;
        let index = self.ring.select(qkey.as_bytes(), timeout)?;
        let ep = self.ring.endpoint_mut(index);

        let bytes = serializer.encode(&value)?;
        protocol::send_store(ep, "set", &qkey, 0, expiry, &bytes)?;
        protocol::recv_discard_reply(ep)?;
        Ok(value)
    }

    /// Store a value only if the key is not already present. Returns the
    /// submitted value if the server accepted it, `None` otherwise.
    pub fn add<V, S: Serializer<V>>(
        &mut self,
        key: &str,
        value: V,
        serializer: &S,
        expiry: u32,
    ) -> Result<Option<V>, Error> {
        self.check_writable()?;
        let qkey = self.options.qualify(key);
        let timeout = self.options.request_timeout;
        let index = self.ring.select(qkey.as_bytes(), timeout)?;
        let ep = self.ring.endpoint_mut(index);

        let bytes = serializer.encode(&value)?;
        protocol::send_store(ep, "add", &qkey, 0, expiry, &bytes)?;
        match protocol::recv_store_reply(ep)? {
            StoreResult::Stored => Ok(Some(value)),
            StoreResult::NotStored => Ok(None),
        }
    }

    /// Remove a key, with an optional hold-off delay (seconds) before the
    /// key may be re-added. The response status line is read but not
    /// interpreted, matching `delete`'s documented contract.
    pub fn delete(&mut self, key: &str, delay: u32) -> Result<(), Error> {
        self.check_writable()?;
        let qkey = self.options.qualify(key);
        let timeout = self.options.request_timeout;
        let index = self.ring.select(qkey.as_bytes(), timeout)?;
        let ep = self.ring.endpoint_mut(index);

        protocol::send_delete(ep, &qkey, delay)?;
        protocol::recv_discard_reply(ep)?;
        Ok(())
    }

    /// Fetch `stats` from every configured server, keyed by `"host:port"`.
    /// A server that cannot be reached is simply absent from the result.
    pub fn stats(&mut self) -> Result<HashMap<String, HashMap<String, String>>, Error> {
        self.check_active()?;
        let timeout = self.options.request_timeout;
        let mut result = HashMap::new();

        for ep in self.ring.endpoints_mut() {
            let address = ep.address();
            if !ep.ensure_open(timeout) {
                warn!(server = %address, "stats: server unreachable, skipping");
                continue;
            }
            let outcome = match protocol::send_stats(ep) {
                Ok(()) => protocol::recv_stats(ep),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(stats) => {
                    result.insert(address, stats);
                }
                Err(err) => {
                    warn!(server = %address, error = %err, "stats: request failed, skipping");
                }
            }
        }

        Ok(result)
    }

    /// Close every server's socket without marking any of them dead. The
    /// next operation on each reconnects immediately.
    pub fn reset(&mut self) {
        for ep in self.ring.endpoints_mut() {
            ep.close();
        }
    }
}

/// A handle to a memcached cluster shared across threads. Wraps a [`Client`]
/// behind one [`Mutex`] that serializes every operation end to end,
/// including parsing the full response, per the crate's concurrency model.
#[derive(Debug)]
pub struct SharedClient<C: Connection = TcpStream> {
    inner: Mutex<Client<C>>,
}

impl<C: Connection> SharedClient<C> {
    fn lock(&self) -> std::sync::MutexGuard<'_, Client<C>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get<V, S: Serializer<V>>(&self, key: &str, serializer: &S) -> Result<Option<V>, Error> {
        self.lock().get(key, serializer)
    }

    pub fn get_multi<V, S: Serializer<V>>(
        &self,
        keys: &[&str],
        serializer: &S,
    ) -> Result<HashMap<String, V>, Error> {
        self.lock().get_multi(keys, serializer)
    }

    pub fn set<V, S: Serializer<V>>(
        &self,
        key: &str,
        value: V,
        serializer: &S,
        expiry: u32,
    ) -> Result<V, Error> {
        self.lock().set(key, value, serializer, expiry)
    }

    pub fn add<V, S: Serializer<V>>(
        &self,
        key: &str,
        value: V,
        serializer: &S,
        expiry: u32,
    ) -> Result<Option<V>, Error> {
        self.lock().add(key, value, serializer, expiry)
    }

    pub fn delete(&self, key: &str, delay: u32) -> Result<(), Error> {
        self.lock().delete(key, delay)
    }

    pub fn stats(&self) -> Result<HashMap<String, HashMap<String, String>>, Error> {
        self.lock().stats()
    }

    pub fn reset(&self) {
        self.lock().reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerSpec;
    use crate::serializer::RawBytes;
    use crate::server::tests_support::MockConn;

    fn client_with_canned_response(response: &[u8]) -> Client<MockConn> {
        let specs = vec![ServerSpec {
            host: "localhost".into(),
            port: 11211,
            weight: 1,
        }];
        let mut client = Client {
            ring: Ring::new(&specs),
            options: ClientOptions::default(),
        };
        let timeout = client.options.request_timeout;
        let ep = client.ring.endpoint_mut(0);
        ep.ensure_open(timeout);
        ep.swap_connection_for_test(MockConn::preloaded(response));
        client
    }

    #[test]
    fn test_get_hit() {
        let mut client = client_with_canned_response(b"VALUE a 0 5\r\nhello\r\nEND\r\n");
        let value = client.get::<Vec<u8>, _>("a", &RawBytes).unwrap();
        assert_eq!(Some(b"hello".to_vec()), value);
    }

    #[test]
    fn test_get_miss() {
        let mut client = client_with_canned_response(b"END\r\n");
        let value = client.get::<Vec<u8>, _>("missing", &RawBytes).unwrap();
        assert_eq!(None, value);
    }

    #[test]
    fn test_set_returns_value_unchanged() {
        let mut client = client_with_canned_response(b"STORED\r\n");
        let value = client
            .set("a", b"\x04\x08i\x06".to_vec(), &RawBytes, 0)
            .unwrap();
        assert_eq!(b"\x04\x08i\x06".to_vec(), value);
    }

    #[test]
    fn test_add_stored_and_not_stored() {
        let mut client = client_with_canned_response(b"STORED\r\n");
        let result = client.add("a", b"v".to_vec(), &RawBytes, 0).unwrap();
        assert_eq!(Some(b"v".to_vec()), result);

        let mut client = client_with_canned_response(b"NOT_STORED\r\n");
        let result = client.add("a", b"v".to_vec(), &RawBytes, 0).unwrap();
        assert_eq!(None, result);
    }

    #[test]
    fn test_delete_does_not_branch_on_status() {
        let mut client = client_with_canned_response(b"DELETED\r\n");
        assert!(client.delete("a", 0).is_ok());

        let mut client = client_with_canned_response(b"NOT_FOUND\r\n");
        assert!(client.delete("a", 0).is_ok());
    }

    #[test]
    fn test_set_and_delete_ignore_unrecognized_status_line() {
        let mut client = client_with_canned_response(b"SERVER_ERROR out of memory\r\n");
        assert!(client.set("a", b"v".to_vec(), &RawBytes, 0).is_ok());

        let mut client = client_with_canned_response(b"SERVER_ERROR out of memory\r\n");
        assert!(client.delete("a", 0).is_ok());
    }

    #[test]
    fn test_add_unrecognized_status_line_is_not_stored_not_error() {
        let mut client = client_with_canned_response(b"SERVER_ERROR out of memory\r\n");
        let result = client.add("a", b"v".to_vec(), &RawBytes, 0).unwrap();
        assert_eq!(None, result);
    }

    #[test]
    fn test_namespace_qualifies_wire_key() {
        let mut client = client_with_canned_response(b"VALUE ns:a 0 1\r\nv\r\nEND\r\n");
        client.options.namespace = Some("ns".into());
        let value = client.get::<Vec<u8>, _>("a", &RawBytes).unwrap();
        assert_eq!(Some(b"v".to_vec()), value);
    }

    #[test]
    fn test_readonly_rejects_mutation_without_io() {
        let mut client = client_with_canned_response(b"");
        client.options.readonly = true;
        let result = client.set("a", b"v".to_vec(), &RawBytes, 0);
        assert!(matches!(result, Err(Error::ReadOnly)));
    }

    #[test]
    fn test_no_active_servers() {
        let mut client: Client<MockConn> = Client {
            ring: Ring::new(&[]),
            options: ClientOptions::default(),
        };
        assert!(matches!(
            client.get::<Vec<u8>, _>("a", &RawBytes),
            Err(Error::NoActiveServers)
        ));
    }

    #[test]
    fn test_stats_parses_per_server_map() {
        let mut client = client_with_canned_response(b"STAT pid 1\r\nEND\r\n");
        let stats = client.stats().unwrap();
        assert_eq!("1", stats["localhost:11211"]["pid"]);
    }

    #[test]
    fn test_shared_client_delegates() {
        let client = client_with_canned_response(b"VALUE a 0 1\r\nv\r\nEND\r\n");
        let shared = client.into_shared();
        let value = shared.get::<Vec<u8>, _>("a", &RawBytes).unwrap();
        assert_eq!(Some(b"v".to_vec()), value);
    }
}
