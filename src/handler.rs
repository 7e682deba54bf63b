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

//! The [`Handler`] contract and the built-in handlers.

use async_trait::async_trait;

use crate::client::Query;
use crate::message::{Message, Rcode};
use crate::server::writer::MessageWriter;

/// Responds to a DNS query.
///
/// `serve_dns` builds the reply through the [`MessageWriter`], and may
/// optionally call its `reply` method; returning signals that the
/// request is finished and the response is ready to send.
///
/// A recursive handler may call the writer's `recur` method to send a
/// query upstream. Only unanswered questions are included in the
/// upstream query.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn serve_dns(&self, query: &Query, w: &mut dyn MessageWriter);
}

/// Forwards every query upstream and copies the response into the
/// reply. On forwarding failure, answers SERVFAIL.
pub struct Recursor;

#[async_trait]
impl Handler for Recursor {
    async fn serve_dns(&self, _query: &Query, w: &mut dyn MessageWriter) {
        match w.recur().await {
            Ok(response) => copy_message(w, &response),
            Err(_) => w.status(Rcode::SERV_FAIL),
        }
    }
}

/// Responds to every query with REFUSED.
pub struct Refuse;

#[async_trait]
impl Handler for Refuse {
    async fn serve_dns(&self, _query: &Query, w: &mut dyn MessageWriter) {
        w.status(Rcode::REFUSED);
    }
}

/// Copies every reply-relevant field of `response` into the writer:
/// rcode, the authoritative and recursion-available bits, and all
/// three record sections.
pub fn copy_message(w: &mut dyn MessageWriter, response: &Message) {
    w.status(response.rcode);
    w.authoritative(response.authoritative);
    w.recursion(response.recursion_available);
    for answer in &response.answers {
        w.answer(answer.name.clone(), answer.ttl, answer.record.clone());
    }
    for authority in &response.authorities {
        w.authority(authority.name.clone(), authority.ttl, authority.record.clone());
    }
    for additional in &response.additionals {
        w.additional(
            additional.name.clone(),
            additional.ttl,
            additional.record.clone(),
        );
    }
}
