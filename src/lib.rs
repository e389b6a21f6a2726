//! A client for a weighted, consistently-enough-hashed memcached cluster.
//!
//! Keys are distributed across the configured servers with a
//! weight-replicated bucket ring (see [`ring`]); a server that stops
//! responding is marked dead for a cooldown window and keys routed to it are
//! rehashed onto an alternate (see [`server`]). The wire protocol is the
//! classic memcached ASCII protocol (see [`protocol`]).
//!
//! ```no_run
//! use mcache::{Client, ClientOptions, RawBytes};
//!
//! # fn main() -> Result<(), mcache::Error> {
//! let mut client: Client = Client::new(["localhost:11211"], ClientOptions::default())?;
//! client.set("greeting", b"hello".to_vec(), &RawBytes, 0)?;
//! let value = client.get::<Vec<u8>, _>("greeting", &RawBytes)?;
//! assert_eq!(Some(b"hello".to_vec()), value);
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod hash;
mod protocol;
mod ring;
mod serializer;
mod server;

pub use client::{Client, SharedClient};
pub use config::{parse_server_list, ClientOptions, ServerSpec, DEFAULT_PORT, DEFAULT_WEIGHT};
pub use error::{Error, Result};
pub use serializer::{RawBytes, Serializer};
pub use server::{Connection, CONNECT_TIMEOUT, DEAD_COOLDOWN};
