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

//! Implements command-line argument parsing.

use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::anyhow;
use clap::{ArgEnum, Parser};

use palisade::transport::Target;

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// The palisade forwarding DNS resolver
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Args {
    /// Set the bind IP address and port
    #[clap(long, default_value = "127.0.0.1:5353", value_name = "IP:PORT")]
    pub bind: SocketAddr,

    /// Add an upstream name server (repeatable)
    #[clap(
        long,
        required = true,
        value_name = "udp:IP:PORT|tcp:IP:PORT",
        value_parser
    )]
    pub upstream: Vec<Upstream>,

    /// Select how an upstream is chosen per query
    #[clap(long, arg_enum, default_value = "round-robin")]
    pub policy: Policy,

    /// Set the per-query deadline in milliseconds
    #[clap(long, default_value_t = 5000, value_name = "MILLIS")]
    pub timeout_ms: u64,

    /// Disable the response cache
    #[clap(long)]
    pub no_cache: bool,
}

#[derive(ArgEnum, Clone, Copy, Debug)]
pub enum Policy {
    RoundRobin,
    Random,
}

/// An upstream name server given on the command line as
/// `udp:IP:PORT` or `tcp:IP:PORT`.
#[derive(Clone, Debug)]
pub struct Upstream(pub Target);

impl FromStr for Upstream {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (proto, addr) = s
            .split_once(':')
            .ok_or_else(|| anyhow!("expected udp:IP:PORT or tcp:IP:PORT"))?;
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| anyhow!("invalid upstream address: {}", e))?;
        match proto {
            "udp" => Ok(Self(Target::Udp(addr))),
            "tcp" => Ok(Self(Target::Tcp(addr))),
            _ => Err(anyhow!("unknown upstream protocol {:?}", proto)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_parsing_works() {
        let udp: Upstream = "udp:8.8.8.8:53".parse().unwrap();
        assert!(matches!(udp.0, Target::Udp(addr) if addr.port() == 53));
        let tcp: Upstream = "tcp:8.8.4.4:53".parse().unwrap();
        assert!(matches!(tcp.0, Target::Tcp(_)));
        assert!("tls:1.1.1.1:853".parse::<Upstream>().is_err());
        assert!("8.8.8.8:53".parse::<Upstream>().is_err());
    }
}
