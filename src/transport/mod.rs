// Copyright 2024 the palisade developers.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The transport layer of the client: a pool of long-lived connections
//! to upstream name servers and the proxy policies that select one
//! server per query.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;

mod dgram;
mod proxy;
mod stream;

pub use proxy::{NameServers, Proxy, Random, RoundRobin, Target, TlsAddr};

use dgram::DgramConn;
use stream::StreamConn;

use crate::message::{Message, PackError, ParseError};

/// How many stream connections the pool keeps per upstream.
const MAX_STREAM_CONNS_PER_KEY: usize = 4;

////////////////////////////////////////////////////////////////////////
// TRANSPORT                                                          //
////////////////////////////////////////////////////////////////////////

/// A pool of live connections to upstream name servers.
///
/// A `Transport` owns its connections for its lifetime: they are dialed
/// on demand, keyed by network and address, reused across queries, and
/// evicted when they fail or when the remote half closes. Datagram
/// connections multiplex concurrent queries by ID; stream connections
/// are shared but exchanged over one query at a time. Dropping the
/// `Transport` closes every connection.
pub struct Transport {
    proxy: Option<Box<dyn Proxy>>,
    pools: Mutex<Pools>,
}

#[derive(Default)]
struct Pools {
    dgram: HashMap<SocketAddr, Arc<DgramConn>>,
    stream: HashMap<(StreamKind, SocketAddr), Vec<Arc<StreamConn>>>,
}

#[derive(Clone, Copy, Eq, Hash, PartialEq)]
enum StreamKind {
    Tcp,
    Tls,
}

impl Transport {
    /// Creates a `Transport` that selects upstreams with `proxy`.
    pub fn new(proxy: impl Proxy + 'static) -> Self {
        Self {
            proxy: Some(Box::new(proxy)),
            pools: Mutex::new(Pools::default()),
        }
    }

    /// Creates a `Transport` with no proxy policy; queries must carry
    /// their own remote address.
    pub fn unproxied() -> Self {
        Self {
            proxy: None,
            pools: Mutex::new(Pools::default()),
        }
    }

    /// Asks the proxy policy for the upstream to use for the next
    /// query, if a policy is configured.
    pub fn pick(&self) -> Option<Target> {
        self.proxy.as_ref().map(|proxy| proxy.pick())
    }

    /// Round-trips one query over a pooled connection to `target`.
    pub async fn roundtrip(
        &self,
        target: &Target,
        msg: &Message,
        deadline: Duration,
    ) -> Result<Message, Error> {
        match target {
            Target::Udp(addr) => {
                let conn = self.dgram_conn(*addr).await?;
                let result = conn.exchange(msg, deadline).await;
                if conn.is_closed() {
                    self.evict_dgram(*addr, &conn);
                }
                result
            }
            Target::Tcp(_) | Target::Tls(_) => {
                let key = stream_key(target);
                let conn = self.stream_conn(key, target).await?;
                let result = conn.exchange(msg, deadline).await;
                if conn.is_closed() {
                    self.evict_stream(key, &conn);
                }
                result
            }
        }
    }

    /// Closes every pooled connection. The `Transport` remains usable;
    /// later queries dial afresh.
    pub fn close(&self) {
        let mut pools = self.pools.lock().unwrap();
        for conn in pools.dgram.values() {
            conn.close();
        }
        pools.dgram.clear();
        pools.stream.clear();
    }

    async fn dgram_conn(&self, addr: SocketAddr) -> Result<Arc<DgramConn>, Error> {
        if let Some(conn) = self.pools.lock().unwrap().dgram.get(&addr) {
            if !conn.is_closed() {
                return Ok(conn.clone());
            }
        }
        let conn = Arc::new(DgramConn::dial(addr).await?);
        debug!("dialed udp connection to {addr}");
        let mut pools = self.pools.lock().unwrap();
        // Another query may have dialed concurrently; last one in wins
        // and the loser is torn down by its Drop.
        pools.dgram.insert(addr, conn.clone());
        Ok(conn)
    }

    fn evict_dgram(&self, addr: SocketAddr, conn: &Arc<DgramConn>) {
        let mut pools = self.pools.lock().unwrap();
        if let Some(pooled) = pools.dgram.get(&addr) {
            if Arc::ptr_eq(pooled, conn) {
                pools.dgram.remove(&addr);
                debug!("evicted udp connection to {addr}");
            }
        }
    }

    async fn stream_conn(
        &self,
        key: (StreamKind, SocketAddr),
        target: &Target,
    ) -> Result<Arc<StreamConn>, Error> {
        {
            let mut pools = self.pools.lock().unwrap();
            let conns = pools.stream.entry(key).or_default();
            conns.retain(|conn| !conn.is_closed());
            if let Some(idle) = conns.iter().find(|conn| !conn.is_busy()) {
                return Ok(idle.clone());
            }
            if let Some(first) = conns.first() {
                if conns.len() >= MAX_STREAM_CONNS_PER_KEY {
                    // At capacity and all busy: queue on an existing
                    // connection rather than dialing past the cap.
                    return Ok(first.clone());
                }
            }
        }
        let conn = Arc::new(StreamConn::dial(target).await?);
        debug!("dialed stream connection to {}", target.addr());
        let mut pools = self.pools.lock().unwrap();
        pools.stream.entry(key).or_default().push(conn.clone());
        Ok(conn)
    }

    fn evict_stream(&self, key: (StreamKind, SocketAddr), conn: &Arc<StreamConn>) {
        let mut pools = self.pools.lock().unwrap();
        if let Some(conns) = pools.stream.get_mut(&key) {
            conns.retain(|pooled| !Arc::ptr_eq(pooled, conn));
            debug!("evicted stream connection to {}", key.1);
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

fn stream_key(target: &Target) -> (StreamKind, SocketAddr) {
    match target {
        Target::Tcp(addr) => (StreamKind::Tcp, *addr),
        Target::Tls(tls) => (StreamKind::Tls, tls.addr),
        Target::Udp(_) => unreachable!("datagram target keyed as a stream"),
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error produced while round-tripping a query to an upstream name
/// server.
///
/// I/O errors are held behind [`Arc`] so that a single failure can be
/// fanned out to every query waiting on the same connection.
#[derive(Clone, Debug)]
pub enum Error {
    /// The outbound query could not be encoded.
    Pack(PackError),

    /// The upstream response could not be decoded.
    Parse(ParseError),

    /// Dialing the upstream failed.
    Dial(Arc<io::Error>),

    /// Sending the query failed.
    Write(Arc<io::Error>),

    /// Receiving the response failed.
    Read(Arc<io::Error>),

    /// The query deadline expired or the caller went away.
    Cancelled,

    /// No upstream is configured for the query.
    NoUpstream,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Pack(e) => write!(f, "pack: {e}"),
            Self::Parse(e) => write!(f, "parse: {e}"),
            Self::Dial(e) => write!(f, "dial: {e}"),
            Self::Write(e) => write!(f, "write: {e}"),
            Self::Read(e) => write!(f, "read: {e}"),
            Self::Cancelled => f.write_str("query cancelled"),
            Self::NoUpstream => f.write_str("no upstream server"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pack(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Dial(e) | Self::Write(e) | Self::Read(e) => Some(e.as_ref()),
            Self::Cancelled | Self::NoUpstream => None,
        }
    }
}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self {
        Self::Pack(e)
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}
