//! ASCII wire framing: request encoding and response parsing for the
//! `get`, `set`/`add`, `delete`, and `stats` verbs. Every function here
//! takes an already-selected, already-open [`ServerEndpoint`] and leaves
//! connection lifecycle (retry, dead-marking) to its caller.

use std::collections::HashMap;

use crate::error::Error;
use crate::server::{Connection, ServerEndpoint};

/// Whether `add` was accepted: `STORED` means accepted, anything else
/// (`NOT_STORED`, `SERVER_ERROR ...`, etc) means not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreResult {
    Stored,
    NotStored,
}

fn to_line(s: &str) -> Vec<u8> {
    let mut line = s.as_bytes().to_vec();
    line.extend_from_slice(b"\r\n");
    line
}

/// Send a `get` request for one or more keys in a single round trip.
pub fn send_get<C: Connection>(
    ep: &mut ServerEndpoint<C>,
    keys: &[String],
) -> Result<(), Error> {
    let command = format!("get {}", keys.join(" "));
    ep.write_all(&to_line(&command))
}

/// Read the `VALUE ... \r\n<data>\r\n` blocks of a `get` response up to the
/// terminating `END\r\n`, returning every value keyed by the wire key
/// (namespace-qualified, if a namespace is configured).
pub fn recv_get<C: Connection>(
    ep: &mut ServerEndpoint<C>,
) -> Result<HashMap<String, Vec<u8>>, Error> {
    let mut values = HashMap::new();
    loop {
        let line = ep.read_line()?;
        let line = String::from_utf8(line)
            .map_err(|_| Error::Protocol("non-utf8 response line".into()))?;
        if line == "END" {
            return Ok(values);
        }
        let mut parts = line.split(' ');
        match parts.next() {
            Some("VALUE") => {}
            _ => return Err(Error::Protocol(format!("expected VALUE or END, got {:?}", line))),
        }
        let key = parts
            .next()
            .ok_or_else(|| Error::Protocol("VALUE line missing key".into()))?
            .to_string();
        let _flags: u32 = parts
            .next()
            .ok_or_else(|| Error::Protocol("VALUE line missing flags".into()))?
            .parse()
            .map_err(|_| Error::Protocol("VALUE line has non-numeric flags".into()))?;
        let bytes: usize = parts
            .next()
            .ok_or_else(|| Error::Protocol("VALUE line missing byte count".into()))?
            .parse()
            .map_err(|_| Error::Protocol("VALUE line has non-numeric byte count".into()))?;

        let data = ep.read_exact(bytes)?;
        ep.expect_crlf()?;
        values.insert(key, data);
    }
}

/// Send a `set` or `add` request. `verb` must be `"set"` or `"add"`.
pub fn send_store<C: Connection>(
    ep: &mut ServerEndpoint<C>,
    verb: &str,
    key: &str,
    flags: u32,
    exptime: u32,
    data: &[u8],
) -> Result<(), Error> {
    let header = format!("{} {} {} {} {}", verb, key, flags, exptime, data.len());
    ep.write_all(&to_line(&header))?;
    let mut body = data.to_vec();
    body.extend_from_slice(b"\r\n");
    ep.write_all(&body)
}

/// Read the single-line reply to an `add` request. Only `STORED` counts as
/// acceptance; every other line (`NOT_STORED`, `SERVER_ERROR ...`, a
/// `CLIENT_ERROR ...`, or anything else a server might send) is
/// `NotStored` — this is never a protocol error, per the `add` contract.
pub fn recv_store_reply<C: Connection>(ep: &mut ServerEndpoint<C>) -> Result<StoreResult, Error> {
    let line = ep.read_line()?;
    match line.as_slice() {
        b"STORED" => Ok(StoreResult::Stored),
        _ => Ok(StoreResult::NotStored),
    }
}

/// Send a `delete` request, with the given hold-off delay in seconds.
pub fn send_delete<C: Connection>(
    ep: &mut ServerEndpoint<C>,
    key: &str,
    delay: u32,
) -> Result<(), Error> {
    ep.write_all(&to_line(&format!("delete {} {}", key, delay)))
}

/// Read and discard the single-line reply to a `set` or `delete` request.
/// Neither operation's public contract interprets the line's content.
pub fn recv_discard_reply<C: Connection>(ep: &mut ServerEndpoint<C>) -> Result<(), Error> {
    ep.read_line()?;
    Ok(())
}

/// Send a `stats` request.
pub fn send_stats<C: Connection>(ep: &mut ServerEndpoint<C>) -> Result<(), Error> {
    ep.write_all(&to_line("stats"))
}

/// Read the `STAT <name> <value>\r\n` lines of a `stats` response up to the
/// terminating `END\r\n`.
pub fn recv_stats<C: Connection>(ep: &mut ServerEndpoint<C>) -> Result<HashMap<String, String>, Error> {
    let mut stats = HashMap::new();
    loop {
        let line = ep.read_line()?;
        let line = String::from_utf8(line)
            .map_err(|_| Error::Protocol("non-utf8 response line".into()))?;
        if line == "END" {
            return Ok(stats);
        }
        let mut parts = line.splitn(3, ' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("STAT"), Some(name), Some(value)) => {
                stats.insert(name.to_string(), value.to_string());
            }
            _ => return Err(Error::Protocol(format!("malformed stats line: {:?}", line))),
        }
    }
}
