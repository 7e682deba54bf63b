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

//! The [`MessageWriter`] contract handlers build replies through, and
//! the server-side [`ReplyWriter`] implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::class::Class;
use crate::client::{Client, Query};
use crate::message::{Message, Question, Rcode, Record, Resource};
use crate::name::Name;
use crate::transport::Error;

////////////////////////////////////////////////////////////////////////
// THE MESSAGE WRITER CONTRACT                                        //
////////////////////////////////////////////////////////////////////////

/// The surface through which a [`Handler`](crate::handler::Handler)
/// builds its reply.
///
/// The writer starts out pre-populated as a response to the request:
/// ID copied, response bit set, recursion-desired mirrored,
/// recursion-available advertised when the server can recurse, and
/// rcode NOERROR. Records are emitted in the IN class.
///
/// [`MessageWriter::recur`] forwards the writer's unanswered questions
/// to the configured upstream and hands back the raw upstream
/// response; a handler that wants the answers in its reply copies them
/// in itself. [`MessageWriter::reply`] flushes explicitly; otherwise
/// the reply is flushed when the handler returns.
#[async_trait]
pub trait MessageWriter: Send {
    /// Sets the rcode of the reply.
    fn status(&mut self, rcode: Rcode);

    /// Sets or clears the authoritative-answer bit.
    fn authoritative(&mut self, authoritative: bool);

    /// Sets or clears the recursion-available bit.
    fn recursion(&mut self, available: bool);

    /// Appends a record to the answer section.
    fn answer(&mut self, name: Name, ttl: Duration, record: Record);

    /// Appends a record to the authority section.
    fn authority(&mut self, name: Name, ttl: Duration, record: Record);

    /// Appends a record to the additional section.
    fn additional(&mut self, name: Name, ttl: Duration, record: Record);

    /// Forwards the still-unanswered questions upstream and returns
    /// the raw upstream response.
    async fn recur(&mut self) -> Result<Message, Error>;

    /// Forwards an explicit request message upstream. This is the
    /// primitive behind [`MessageWriter::recur`]; the query
    /// multiplexer uses it to send its single merged forward query.
    async fn forward(&mut self, request: Message) -> Result<Message, Error>;

    /// Flushes the reply now instead of on handler return.
    async fn reply(&mut self) -> Result<(), Error>;
}

////////////////////////////////////////////////////////////////////////
// RESPONSE CONSTRUCTION SHARED BY WRITER IMPLEMENTATIONS             //
////////////////////////////////////////////////////////////////////////

/// The response-in-progress state shared by the server's writer and
/// the multiplexer's per-question sub-writers.
#[derive(Debug)]
pub(crate) struct ResponseBuilder {
    pub(crate) msg: Message,
    pub(crate) replied: bool,
}

impl ResponseBuilder {
    /// Starts a response to `request`.
    pub(crate) fn for_request(request: &Message, recursion_available: bool) -> Self {
        Self {
            msg: Message {
                id: request.id,
                response: true,
                opcode: request.opcode,
                recursion_desired: request.recursion_desired,
                recursion_available,
                questions: request.questions.clone(),
                ..Default::default()
            },
            replied: false,
        }
    }

    /// Builds the upstream request carrying the questions that no
    /// emitted answer's owner name covers yet. The transport assigns
    /// the wire ID.
    pub(crate) fn recur_request(&self) -> Message {
        let unanswered: Vec<Question> = self
            .msg
            .questions
            .iter()
            .filter(|q| !self.msg.answers.iter().any(|a| a.name == q.name))
            .cloned()
            .collect();
        Message {
            opcode: self.msg.opcode,
            recursion_desired: self.msg.recursion_desired,
            questions: unanswered,
            ..Default::default()
        }
    }

    pub(crate) fn push(&mut self, section: Section, name: Name, ttl: Duration, record: Record) {
        let resource = Resource {
            name,
            class: Class::IN,
            ttl,
            record,
        };
        match section {
            Section::Answer => self.msg.answers.push(resource),
            Section::Authority => self.msg.authorities.push(resource),
            Section::Additional => self.msg.additionals.push(resource),
        }
    }
}

/// The reply section a record is destined for.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Section {
    Answer,
    Authority,
    Additional,
}

////////////////////////////////////////////////////////////////////////
// THE SERVER'S WRITER                                                //
////////////////////////////////////////////////////////////////////////

/// The server-side [`MessageWriter`]: builds the outgoing reply in
/// place and recurses through the server's forwarder client.
pub struct ReplyWriter {
    builder: ResponseBuilder,
    forwarder: Option<Arc<Client>>,
}

impl ReplyWriter {
    /// Creates a writer pre-populated as a response to `request`.
    /// Recursion is advertised exactly when a forwarder is present.
    pub fn new(request: &Message, forwarder: Option<Arc<Client>>) -> Self {
        Self {
            builder: ResponseBuilder::for_request(request, forwarder.is_some()),
            forwarder,
        }
    }

    /// Finalizes the writer and hands the reply to the caller.
    pub fn into_message(self) -> Message {
        self.builder.msg
    }
}

#[async_trait]
impl MessageWriter for ReplyWriter {
    fn status(&mut self, rcode: Rcode) {
        self.builder.msg.rcode = rcode;
    }

    fn authoritative(&mut self, authoritative: bool) {
        self.builder.msg.authoritative = authoritative;
    }

    fn recursion(&mut self, available: bool) {
        self.builder.msg.recursion_available = available;
    }

    fn answer(&mut self, name: Name, ttl: Duration, record: Record) {
        self.builder.push(Section::Answer, name, ttl, record);
    }

    fn authority(&mut self, name: Name, ttl: Duration, record: Record) {
        self.builder.push(Section::Authority, name, ttl, record);
    }

    fn additional(&mut self, name: Name, ttl: Duration, record: Record) {
        self.builder.push(Section::Additional, name, ttl, record);
    }

    async fn recur(&mut self) -> Result<Message, Error> {
        let request = self.builder.recur_request();
        self.forward(request).await
    }

    async fn forward(&mut self, request: Message) -> Result<Message, Error> {
        let forwarder = self.forwarder.clone().ok_or(Error::NoUpstream)?;
        forwarder.send(&Query::new(request)).await
    }

    async fn reply(&mut self) -> Result<(), Error> {
        self.builder.replied = true;
        Ok(())
    }
}
