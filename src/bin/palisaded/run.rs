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

//! Implements running the daemon.

use std::fmt::Write;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info};
use rand::rngs::SmallRng;
use rand::SeedableRng;

use palisade::cache::Cache;
use palisade::client::Client;
use palisade::handler::Recursor;
use palisade::server::Server;
use palisade::transport::{NameServers, Proxy, Transport};

use crate::args::{Args, Policy};

/// Runs the daemon.
pub fn run(args: Args) {
    env_logger::init_from_env(Env::new().default_filter_or("warn"));

    if let Err(e) = try_running(args) {
        let mut message = String::from("Failed to run:");
        for (i, cause) in e.chain().enumerate() {
            write!(message, "\n[{}] {}", i + 1, cause).unwrap();
        }
        message.push_str("\nExiting with failure.");
        error!("{}", message);
        process::exit(1);
    }
    info!("Exiting with success.");
}

fn try_running(args: Args) -> Result<()> {
    info!(
        "palisaded v{} starting with {} upstream(s).",
        env!("CARGO_PKG_VERSION"),
        args.upstream.len(),
    );

    let servers = NameServers(args.upstream.iter().map(|u| u.0.clone()).collect());
    let proxy: Box<dyn Proxy> = match args.policy {
        Policy::RoundRobin => Box::new(servers.round_robin()),
        Policy::Random => Box::new(servers.random(SmallRng::from_entropy())),
    };

    let mut forwarder = Client::new(Transport::new(proxy))
        .with_timeout(Duration::from_millis(args.timeout_ms));
    if !args.no_cache {
        forwarder = forwarder.with_resolver(Arc::new(Cache::new()));
    }

    let server = Server::new(args.bind, Arc::new(Recursor)).with_forwarder(forwarder);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime
        .block_on(server.listen_and_serve())
        .context("failed to serve")?;
    Ok(())
}
