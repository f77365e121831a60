//! Request acceptors.
//!
//! The transport framing is an external collaborator; the worker only
//! needs "accept the next request cycle" and, per cycle, the
//! [`RequestSource`] view (metadata lookup plus a body stream).

use std::collections::HashMap;
use std::io::{Cursor, Read};

use crate::error::Result;
use crate::request::RequestSource;

/// Yields request cycles, one at a time. `None` means the transport is
/// drained and the worker loop should end.
pub trait Acceptor {
    type Source: RequestSource;

    fn accept(&mut self) -> Result<Option<Self::Source>>;
}

/// The classic CGI degradation: request metadata from the process
/// environment, body from stdin. Serves exactly one cycle.
///
/// This is what a front end speaking plain CGI provides, and it is the
/// default transport of the shipped binary; a FastCGI-framing
/// front-end library plugs in through [`Acceptor`] instead.
#[derive(Debug, Default)]
pub struct EnvAcceptor {
    accepted: bool,
}

impl EnvAcceptor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Acceptor for EnvAcceptor {
    type Source = EnvSource;

    fn accept(&mut self) -> Result<Option<EnvSource>> {
        if self.accepted {
            return Ok(None);
        }
        self.accepted = true;
        Ok(Some(EnvSource {
            stdin: std::io::stdin(),
        }))
    }
}

/// One request cycle backed by environment variables and stdin.
pub struct EnvSource {
    stdin: std::io::Stdin,
}

impl RequestSource for EnvSource {
    fn param(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn body(&mut self) -> &mut dyn Read {
        &mut self.stdin
    }
}

/// In-memory request source for embedding and tests.
#[derive(Debug, Clone)]
pub struct MapSource {
    params: HashMap<String, String>,
    body: Cursor<Vec<u8>>,
}

impl MapSource {
    pub fn new(params: &[(&str, &str)], body: &[u8]) -> Self {
        Self {
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Cursor::new(body.to_vec()),
        }
    }
}

impl RequestSource for MapSource {
    fn param(&self, key: &str) -> Option<String> {
        self.params.get(key).cloned()
    }

    fn body(&mut self) -> &mut dyn Read {
        &mut self.body
    }
}

/// Acceptor over a fixed queue of in-memory cycles, for tests.
#[derive(Debug, Default)]
pub struct QueueAcceptor {
    queue: std::collections::VecDeque<MapSource>,
}

impl QueueAcceptor {
    pub fn new(sources: Vec<MapSource>) -> Self {
        Self {
            queue: sources.into(),
        }
    }
}

impl Acceptor for QueueAcceptor {
    type Source = MapSource;

    fn accept(&mut self) -> Result<Option<MapSource>> {
        Ok(self.queue.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_acceptor_serves_one_cycle() {
        let mut acceptor = EnvAcceptor::new();
        assert!(acceptor.accept().unwrap().is_some());
        assert!(acceptor.accept().unwrap().is_none());
    }

    #[test]
    fn test_map_source_lookup_and_body() {
        let mut source = MapSource::new(&[("REQUEST_METHOD", "GET")], b"body-bytes");
        assert_eq!(source.param("REQUEST_METHOD").as_deref(), Some("GET"));
        assert_eq!(source.param("MISSING"), None);

        let mut buf = Vec::new();
        source.body().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"body-bytes");
    }

    #[test]
    fn test_queue_acceptor_drains_in_order() {
        let mut acceptor = QueueAcceptor::new(vec![
            MapSource::new(&[("QUERY_STRING", "n=1")], b""),
            MapSource::new(&[("QUERY_STRING", "n=2")], b""),
        ]);
        let first = acceptor.accept().unwrap().unwrap();
        assert_eq!(first.param("QUERY_STRING").as_deref(), Some("n=1"));
        assert!(acceptor.accept().unwrap().is_some());
        assert!(acceptor.accept().unwrap().is_none());
    }
}
