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

//! The DNS query multiplexer: routes each question of a query to a
//! handler and merges the handlers' replies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::sync::{mpsc, oneshot};

use crate::client::Query;
use crate::handler::{copy_message, Handler, Recursor};
use crate::message::{Message, Question, Rcode, Record, Type};
use crate::name::Name;
use crate::server::writer::{MessageWriter, ResponseBuilder, Section};
use crate::transport::Error;

////////////////////////////////////////////////////////////////////////
// THE MULTIPLEXER                                                    //
////////////////////////////////////////////////////////////////////////

/// A DNS query multiplexer. It matches a question type and name suffix
/// to a handler.
///
/// Each question of an inbound query is dispatched concurrently to the
/// first table entry whose type matches (or is [`Type::ANY`]) and
/// whose suffix ends the question name; questions nothing matches fall
/// through to the forward-and-copy default handler. The multiplexer
/// merges the recursion intents of its sub-handlers into at most one
/// upstream forward per query, fans the upstream response back out by
/// owner name, and assembles the sub-replies into the outer reply in
/// question order.
pub struct ResolveMux {
    tbl: Vec<MuxEntry>,
    default: Arc<dyn Handler>,
}

struct MuxEntry {
    rr_type: Type,
    suffix: String,
    handler: Arc<dyn Handler>,
}

impl ResolveMux {
    /// Creates an empty multiplexer whose default is the
    /// forward-and-copy recursive handler.
    pub fn new() -> Self {
        Self {
            tbl: Vec::new(),
            default: Arc::new(Recursor),
        }
    }

    /// Registers `handler` for the given question type and name
    /// suffix. Entries are consulted in registration order.
    pub fn handle(&mut self, rr_type: Type, suffix: impl Into<String>, handler: Arc<dyn Handler>) {
        self.tbl.push(MuxEntry {
            rr_type,
            suffix: suffix.into(),
            handler,
        });
    }

    fn lookup(&self, question: &Question) -> Arc<dyn Handler> {
        for entry in &self.tbl {
            if entry.rr_type != question.rr_type && entry.rr_type != Type::ANY {
                continue;
            }
            if question.name.as_str().ends_with(&entry.suffix) {
                return entry.handler.clone();
            }
        }
        self.default.clone()
    }
}

impl Default for ResolveMux {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for ResolveMux {
    async fn serve_dns(&self, query: &Query, w: &mut dyn MessageWriter) {
        let questions = &query.message.questions;
        let n = questions.len();
        if n == 0 {
            return;
        }

        // Fan out: one task per question, each serving a
        // single-question clone of the request through its own
        // sub-writer.
        let (events_tx, mut events_rx) = mpsc::channel(n * 2);
        for (index, question) in questions.iter().enumerate() {
            let handler = self.lookup(question);
            let mut message = query.message.clone();
            message.questions = vec![question.clone()];
            let sub_query = Query {
                remote_addr: query.remote_addr.clone(),
                message,
            };
            let events = events_tx.clone();
            tokio::spawn(async move {
                let mut sub = MuxWriter::new(&sub_query.message, index, events);
                handler.serve_dns(&sub_query, &mut sub).await;
                sub.finish().await;
            });
        }
        drop(events_tx);

        // Rendezvous: once every sub-query has either asked to recur
        // or delivered its reply, perform the single merged upstream
        // forward and fan its result back out.
        let mut settled = vec![false; n];
        let mut settled_count = 0;
        let mut replies: Vec<Option<Message>> = (0..n).map(|_| None).collect();
        let mut done = 0;
        let mut intents: Vec<RecurIntent> = Vec::new();
        let mut forwarded = false;
        while done < n {
            let event = match events_rx.recv().await {
                Some(event) => event,
                None => break,
            };
            let index = event.index();
            if !settled[index] {
                settled[index] = true;
                settled_count += 1;
            }
            match event {
                MuxEvent::Recur(intent) => intents.push(intent),
                MuxEvent::Reply { message, .. } => {
                    replies[index] = Some(message);
                    done += 1;
                }
            }

            if !forwarded && settled_count == n && !intents.is_empty() {
                forwarded = true;
                intents.sort_by_key(|intent| intent.index);
                let mut merged = Message::default();
                for intent in &intents {
                    merge_requests(&mut merged, &intent.request);
                }
                let result = if merged.questions.is_empty() {
                    Ok(Message {
                        response: true,
                        ..Default::default()
                    })
                } else {
                    debug!("forwarding {} merged question(s)", merged.questions.len());
                    w.forward(merged).await
                };
                for intent in intents.drain(..) {
                    let _ = intent.reply_tx.send(result.clone());
                }
            }
        }

        // Assemble the outer reply in question order.
        let mut assembled: Option<Message> = None;
        for reply in replies.into_iter().flatten() {
            match assembled.as_mut() {
                None => assembled = Some(reply),
                Some(into) => merge_responses(into, reply),
            }
        }
        if let Some(assembled) = assembled {
            copy_message(w, &assembled);
        }
    }
}

////////////////////////////////////////////////////////////////////////
// PER-QUESTION SUB-WRITERS                                           //
////////////////////////////////////////////////////////////////////////

/// The events a sub-writer posts to the multiplexer.
enum MuxEvent {
    Recur(RecurIntent),
    Reply { index: usize, message: Message },
}

struct RecurIntent {
    index: usize,
    request: Message,
    reply_tx: oneshot::Sender<Result<Message, Error>>,
}

impl MuxEvent {
    fn index(&self) -> usize {
        match self {
            Self::Recur(intent) => intent.index,
            Self::Reply { index, .. } => *index,
        }
    }
}

/// The per-question [`MessageWriter`] handed to a sub-handler. It
/// builds a single-question reply and rendezvouses with the
/// multiplexer for recursion and for the final reply.
struct MuxWriter {
    builder: ResponseBuilder,
    index: usize,
    events: mpsc::Sender<MuxEvent>,
    recurred: bool,
    finished: bool,
}

impl MuxWriter {
    fn new(request: &Message, index: usize, events: mpsc::Sender<MuxEvent>) -> Self {
        Self {
            builder: ResponseBuilder::for_request(request, false),
            index,
            events,
            recurred: false,
            finished: false,
        }
    }

    /// Posts `request` as this sub-query's recursion intent and waits
    /// for the multiplexer to deliver the shared upstream response.
    async fn rendezvous(&mut self, request: Message) -> Result<Message, Error> {
        if self.recurred {
            // One recursion cycle per sub-query.
            debug!("sub-query {} asked to recur twice", self.index);
            return Err(Error::NoUpstream);
        }
        self.recurred = true;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.events
            .send(MuxEvent::Recur(RecurIntent {
                index: self.index,
                request,
                reply_tx,
            }))
            .await
            .map_err(|_| Error::Cancelled)?;
        reply_rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Delivers the reply once; the multiplexer flushes sub-writers
    /// whose handlers return without an explicit reply.
    async fn finish(mut self) {
        if !self.finished {
            let _ = self.deliver().await;
        }
    }

    async fn deliver(&mut self) -> Result<(), Error> {
        self.finished = true;
        let _ = self
            .events
            .send(MuxEvent::Reply {
                index: self.index,
                message: self.builder.msg.clone(),
            })
            .await;
        Ok(())
    }
}

#[async_trait]
impl MessageWriter for MuxWriter {
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
        let response = self.rendezvous(request).await?;
        Ok(project_for(&self.builder.msg.questions[0], response))
    }

    async fn forward(&mut self, request: Message) -> Result<Message, Error> {
        self.rendezvous(request).await
    }

    async fn reply(&mut self) -> Result<(), Error> {
        if self.finished {
            return Ok(());
        }
        self.deliver().await
    }
}

////////////////////////////////////////////////////////////////////////
// MERGING                                                            //
////////////////////////////////////////////////////////////////////////

/// Folds one sub-query's recursion request into the merged forward
/// query: union of questions in question order, the greater opcode,
/// and the OR of recursion-desired.
fn merge_requests(into: &mut Message, from: &Message) {
    if from.opcode > into.opcode {
        into.opcode = from.opcode;
    }
    into.recursion_desired = into.recursion_desired || from.recursion_desired;
    into.questions.extend(from.questions.iter().cloned());
}

/// Folds a later sub-reply into the assembled response: the AND of
/// authoritative, the OR of recursion-available, the greater rcode,
/// and concatenated sections.
fn merge_responses(into: &mut Message, from: Message) {
    into.authoritative = into.authoritative && from.authoritative;
    into.recursion_available = into.recursion_available || from.recursion_available;
    if from.rcode > into.rcode {
        into.rcode = from.rcode;
    }
    into.answers.extend(from.answers);
    into.authorities.extend(from.authorities);
    into.additionals.extend(from.additionals);
}

/// Projects the shared upstream response down to one sub-query: only
/// the answers owned by the sub-query's question name are kept.
fn project_for(question: &Question, mut response: Message) -> Message {
    response.answers.retain(|answer| answer.name == question.name);
    response
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::class::Class;
    use crate::message::Resource;
    use crate::zone::{record_map, record_set, Zone};

    /// An outer-writer double whose `forward` answers from a canned
    /// response table and records every forwarded request.
    struct ForwardingWriter {
        msg: Message,
        forwards: Vec<Message>,
        canned: Vec<Resource>,
    }

    impl ForwardingWriter {
        fn new(canned: Vec<Resource>) -> Self {
            Self {
                msg: Message::default(),
                forwards: Vec::new(),
                canned,
            }
        }
    }

    #[async_trait]
    impl MessageWriter for ForwardingWriter {
        fn status(&mut self, rcode: Rcode) {
            self.msg.rcode = rcode;
        }

        fn authoritative(&mut self, authoritative: bool) {
            self.msg.authoritative = authoritative;
        }

        fn recursion(&mut self, available: bool) {
            self.msg.recursion_available = available;
        }

        fn answer(&mut self, name: Name, ttl: Duration, record: Record) {
            self.msg.answers.push(Resource {
                name,
                class: Class::IN,
                ttl,
                record,
            });
        }

        fn authority(&mut self, name: Name, ttl: Duration, record: Record) {
            self.msg.authorities.push(Resource {
                name,
                class: Class::IN,
                ttl,
                record,
            });
        }

        fn additional(&mut self, name: Name, ttl: Duration, record: Record) {
            self.msg.additionals.push(Resource {
                name,
                class: Class::IN,
                ttl,
                record,
            });
        }

        async fn recur(&mut self) -> Result<Message, Error> {
            let request = Message::default();
            self.forward(request).await
        }

        async fn forward(&mut self, request: Message) -> Result<Message, Error> {
            self.forwards.push(request.clone());
            let answers = self
                .canned
                .iter()
                .filter(|resource| {
                    request
                        .questions
                        .iter()
                        .any(|question| question.name == resource.name)
                })
                .cloned()
                .collect();
            Ok(Message {
                id: request.id,
                response: true,
                recursion_available: true,
                questions: request.questions,
                answers,
                ..Default::default()
            })
        }

        async fn reply(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    fn question(name: &str) -> Question {
        Question {
            name: name.parse().unwrap(),
            rr_type: Type::A,
            class: Class::IN,
        }
    }

    fn canned_a(name: &str, addr: &str) -> Resource {
        Resource {
            name: name.parse().unwrap(),
            class: Class::IN,
            ttl: Duration::from_secs(30),
            record: Record::A(addr.parse().unwrap()),
        }
    }

    #[tokio::test]
    async fn single_question_forwards_once() {
        let mux = ResolveMux::new();
        let query = Query::new(Message {
            id: 5,
            recursion_desired: true,
            questions: vec![question("foo.xip.io.")],
            ..Default::default()
        });
        let mut w = ForwardingWriter::new(vec![canned_a("foo.xip.io.", "127.0.0.1")]);
        mux.serve_dns(&query, &mut w).await;

        assert_eq!(w.forwards.len(), 1);
        assert_eq!(w.forwards[0].questions, query.message.questions);
        assert!(w.forwards[0].recursion_desired);
        assert_eq!(w.msg.rcode, Rcode::NO_ERROR);
        assert_eq!(w.msg.answers.len(), 1);
        assert_eq!(
            w.msg.answers[0].record,
            Record::A("127.0.0.1".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn local_zone_and_forwarded_question_are_merged() {
        let zone = Zone::new("tld.".parse().unwrap(), Duration::from_secs(3600));
        zone.records().replace_all(record_map([(
            "foo",
            record_set([Record::A("127.0.0.1".parse().unwrap())]),
        )]));

        let mut mux = ResolveMux::new();
        mux.handle(Type::ANY, "tld.", Arc::new(zone));

        let query = Query::new(Message {
            id: 6,
            recursion_desired: true,
            questions: vec![question("foo.tld."), question("x.example.com.")],
            ..Default::default()
        });
        let mut w = ForwardingWriter::new(vec![canned_a("x.example.com.", "10.9.8.7")]);
        mux.serve_dns(&query, &mut w).await;

        // Only the question the zone could not answer went upstream,
        // in a single forward query.
        assert_eq!(w.forwards.len(), 1);
        assert_eq!(
            w.forwards[0].questions,
            vec![question("x.example.com.")]
        );

        // Both answers are present, in question order.
        assert_eq!(w.msg.answers.len(), 2);
        assert_eq!(w.msg.answers[0].name.as_str(), "foo.tld.");
        assert_eq!(
            w.msg.answers[0].record,
            Record::A("127.0.0.1".parse().unwrap())
        );
        assert_eq!(w.msg.answers[1].name.as_str(), "x.example.com.");
        assert_eq!(
            w.msg.answers[1].record,
            Record::A("10.9.8.7".parse().unwrap())
        );

        // The zone was authoritative, the forwarded handler was not.
        assert!(!w.msg.authoritative);
        assert!(w.msg.recursion_available);
        assert_eq!(w.msg.rcode, Rcode::NO_ERROR);
    }

    #[tokio::test]
    async fn worst_rcode_wins_the_merge() {
        let zone = Zone::new("tld.".parse().unwrap(), Duration::from_secs(3600));

        let mut mux = ResolveMux::new();
        mux.handle(Type::ANY, "tld.", Arc::new(zone));

        let query = Query::new(Message {
            questions: vec![question("missing.tld."), question("x.example.com.")],
            ..Default::default()
        });
        let mut w = ForwardingWriter::new(vec![canned_a("x.example.com.", "10.9.8.7")]);
        mux.serve_dns(&query, &mut w).await;

        assert_eq!(w.msg.rcode, Rcode::NX_DOMAIN);
        assert_eq!(w.msg.answers.len(), 1);
    }

    #[tokio::test]
    async fn refuse_needs_no_forward() {
        let mut mux = ResolveMux::new();
        mux.handle(Type::ANY, "tld.", Arc::new(crate::handler::Refuse));

        let query = Query::new(Message {
            questions: vec![question("foo.tld.")],
            ..Default::default()
        });
        let mut w = ForwardingWriter::new(Vec::new());
        mux.serve_dns(&query, &mut w).await;

        assert!(w.forwards.is_empty());
        assert_eq!(w.msg.rcode, Rcode::REFUSED);
    }

    #[tokio::test]
    async fn upstream_answers_are_partitioned_by_name() {
        let mux = ResolveMux::new();
        let query = Query::new(Message {
            recursion_desired: true,
            questions: vec![question("a.example."), question("b.example.")],
            ..Default::default()
        });
        let mut w = ForwardingWriter::new(vec![
            canned_a("a.example.", "10.0.0.1"),
            canned_a("b.example.", "10.0.0.2"),
        ]);
        mux.serve_dns(&query, &mut w).await;

        assert_eq!(w.forwards.len(), 1);
        assert_eq!(w.forwards[0].questions.len(), 2);
        assert_eq!(w.msg.answers.len(), 2);
        assert_eq!(w.msg.answers[0].name.as_str(), "a.example.");
        assert_eq!(w.msg.answers[1].name.as_str(), "b.example.");
    }
}
