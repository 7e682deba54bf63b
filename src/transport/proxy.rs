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

//! Upstream name server addresses and the policies that select one.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use rand::RngCore;

////////////////////////////////////////////////////////////////////////
// TARGETS                                                            //
////////////////////////////////////////////////////////////////////////

/// The address of an upstream name server, tagged with the transport
/// used to reach it.
#[derive(Clone, Debug)]
pub enum Target {
    /// Plain DNS over UDP, usually port 53.
    Udp(SocketAddr),

    /// Plain DNS over TCP with 2-octet length framing, usually port 53.
    Tcp(SocketAddr),

    /// DNS over TLS, usually port 853.
    Tls(TlsAddr),
}

impl Target {
    /// Returns the socket address of the upstream.
    pub fn addr(&self) -> SocketAddr {
        match self {
            Self::Udp(addr) | Self::Tcp(addr) => *addr,
            Self::Tls(tls) => tls.addr,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Udp(addr) => write!(f, "udp:{addr}"),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
            Self::Tls(tls) => write!(f, "tls:{} ({})", tls.addr, tls.server_name),
        }
    }
}

/// A TCP endpoint wrapped with the TLS settings needed to speak DNS
/// over TLS to it.
#[derive(Clone)]
pub struct TlsAddr {
    pub addr: SocketAddr,
    pub server_name: String,
    pub config: Arc<rustls::ClientConfig>,
}

impl fmt::Debug for TlsAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TlsAddr")
            .field("addr", &self.addr)
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

////////////////////////////////////////////////////////////////////////
// PROXY POLICIES                                                     //
////////////////////////////////////////////////////////////////////////

/// An upstream-selection policy: maps a query to one name server
/// address.
pub trait Proxy: Send + Sync {
    /// Picks the upstream to use for the next query.
    fn pick(&self) -> Target;
}

impl<P: Proxy + ?Sized> Proxy for Box<P> {
    fn pick(&self) -> Target {
        (**self).pick()
    }
}

/// An ordered set of upstream name servers, convertible into one of the
/// built-in [`Proxy`] policies.
pub struct NameServers(pub Vec<Target>);

impl NameServers {
    /// Converts the set into a policy that walks the servers in order,
    /// wrapping around. Panics if the set is empty.
    pub fn round_robin(self) -> RoundRobin {
        assert!(!self.0.is_empty(), "no name servers configured");
        RoundRobin {
            servers: self.0,
            next: Mutex::new(0),
        }
    }

    /// Converts the set into a policy that picks a server uniformly
    /// using the provided randomness source. Panics if the set is
    /// empty.
    pub fn random<R: RngCore + Send + 'static>(self, rng: R) -> Random {
        assert!(!self.0.is_empty(), "no name servers configured");
        Random {
            servers: self.0,
            rng: Mutex::new(Box::new(rng)),
        }
    }
}

/// The round-robin [`Proxy`] policy.
pub struct RoundRobin {
    servers: Vec<Target>,
    next: Mutex<usize>,
}

impl Proxy for RoundRobin {
    fn pick(&self) -> Target {
        let mut next = self.next.lock().unwrap();
        let target = self.servers[*next % self.servers.len()].clone();
        *next = next.wrapping_add(1);
        target
    }
}

/// The uniform-random [`Proxy`] policy.
pub struct Random {
    servers: Vec<Target>,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl Proxy for Random {
    fn pick(&self) -> Target {
        let index = self.rng.lock().unwrap().next_u32() as usize % self.servers.len();
        self.servers[index].clone()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn servers() -> NameServers {
        NameServers(vec![
            Target::Udp("10.0.0.1:53".parse().unwrap()),
            Target::Udp("10.0.0.2:53".parse().unwrap()),
            Target::Tcp("10.0.0.3:53".parse().unwrap()),
        ])
    }

    #[test]
    fn round_robin_wraps() {
        let proxy = servers().round_robin();
        let picks: Vec<SocketAddr> = (0..7).map(|_| proxy.pick().addr()).collect();
        let expected: Vec<SocketAddr> = ["10.0.0.1:53", "10.0.0.2:53", "10.0.0.3:53"]
            .iter()
            .cycle()
            .take(7)
            .map(|a| a.parse().unwrap())
            .collect();
        assert_eq!(picks, expected);
    }

    #[test]
    fn random_uses_injected_rng() {
        let proxy = servers().random(StepRng::new(0, 1));
        let picks: Vec<SocketAddr> = (0..4).map(|_| proxy.pick().addr()).collect();
        let expected: Vec<SocketAddr> =
            ["10.0.0.1:53", "10.0.0.2:53", "10.0.0.3:53", "10.0.0.1:53"]
                .iter()
                .map(|a| a.parse().unwrap())
                .collect();
        assert_eq!(picks, expected);
    }
}
