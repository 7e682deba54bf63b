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

//! The DNS client: sends a query over a transport, optionally
//! consulting a resolver first.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::message::Message;
use crate::transport::{Error, Target, Transport};

/// The default per-query deadline.
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

////////////////////////////////////////////////////////////////////////
// QUERIES                                                            //
////////////////////////////////////////////////////////////////////////

/// A DNS query: the message plus the remote address it is bound for
/// (or, on the server side, the address it arrived from).
#[derive(Clone, Debug)]
pub struct Query {
    /// Where to send the query. A client whose transport has a proxy
    /// policy ignores this; the server fills it with the requester's
    /// address on inbound queries.
    pub remote_addr: Option<Target>,

    /// The DNS message itself.
    pub message: Message,
}

impl Query {
    /// Wraps a message with no remote address.
    pub fn new(message: Message) -> Self {
        Self {
            remote_addr: None,
            message,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// RESOLVERS                                                          //
////////////////////////////////////////////////////////////////////////

/// Anything that can answer a query before it is forwarded upstream.
///
/// The cache implements this contract, and so can any other
/// lookup-aside collaborator; a [`Client`] treats them
/// interchangeably.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Tries to answer `query` locally. `None` is a miss, and the
    /// client forwards the query upstream.
    async fn resolve(&self, query: &Query) -> Option<Message>;

    /// Offers a successfully forwarded response for retention. The
    /// default implementation retains nothing.
    fn store(&self, _response: &Message) {}
}

////////////////////////////////////////////////////////////////////////
// CLIENT                                                             //
////////////////////////////////////////////////////////////////////////

/// A DNS client.
///
/// A `Client` answers a query from its resolver when it can, and
/// otherwise selects an upstream through the transport's proxy policy,
/// round-trips the query on a pooled connection, offers the response
/// back to the resolver, and returns it.
pub struct Client {
    transport: Arc<Transport>,
    resolver: Option<Arc<dyn Resolver>>,
    timeout: Duration,
}

impl Client {
    /// Creates a `Client` over `transport`.
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Arc::new(transport),
            resolver: None,
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Sets the resolver consulted before forwarding.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Sets the per-query deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Executes `query` and returns the response message.
    pub async fn send(&self, query: &Query) -> Result<Message, Error> {
        if let Some(resolver) = &self.resolver {
            if let Some(response) = resolver.resolve(query).await {
                debug!("query answered by resolver");
                return Ok(response);
            }
        }

        let target = self
            .transport
            .pick()
            .or_else(|| query.remote_addr.clone())
            .ok_or(Error::NoUpstream)?;
        let response = self
            .transport
            .roundtrip(&target, &query.message, self.timeout)
            .await?;

        if let Some(resolver) = &self.resolver {
            resolver.store(&response);
        }
        Ok(response)
    }
}
