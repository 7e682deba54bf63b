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

//! A TTL-bounded response cache consulted before forwarding.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use log::debug;

use crate::class::Class;
use crate::client::{Query, Resolver};
use crate::message::{Message, Record, Resource, Type};
use crate::name::Name;

/// A lookup-aside cache of answer records keyed by question identity.
///
/// Each cached record carries its absolute expiry (insertion time plus
/// TTL); expired entries are treated as absent and evicted on lookup.
/// The cache implements [`Resolver`], so a client consults it before
/// forwarding and offers successful forwarded responses back to it.
#[derive(Default)]
pub struct Cache {
    entries: Mutex<HashMap<Key, Vec<Entry>>>,
}

#[derive(Clone, Eq, Hash, PartialEq)]
struct Key {
    name: Name,
    rr_type: Type,
    class: Class,
}

struct Entry {
    record: Record,
    expires_at: Instant,
}

impl Cache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live question keys. Expired entries are
    /// evicted as a side effect.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, records| {
            records.retain(|entry| entry.expires_at > now);
            !records.is_empty()
        });
        entries.len()
    }

    /// Returns whether the cache holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Resolver for Cache {
    /// Answers `query` from cache. A hit requires every question to be
    /// satisfiable from live entries; the synthesized response carries
    /// each record's remaining TTL.
    async fn resolve(&self, query: &Query) -> Option<Message> {
        let request = &query.message;
        if request.questions.is_empty() {
            return None;
        }

        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let mut answers = Vec::new();
        for question in &request.questions {
            let key = Key {
                name: question.name.clone(),
                rr_type: question.rr_type,
                class: question.class,
            };
            let records = entries.get_mut(&key)?;
            records.retain(|entry| entry.expires_at > now);
            if records.is_empty() {
                entries.remove(&key);
                return None;
            }
            for entry in records.iter() {
                answers.push(Resource {
                    name: question.name.clone(),
                    class: question.class,
                    ttl: entry.expires_at - now,
                    record: entry.record.clone(),
                });
            }
        }
        debug!("cache hit for {} question(s)", request.questions.len());

        Some(Message {
            id: request.id,
            response: true,
            opcode: request.opcode,
            recursion_desired: request.recursion_desired,
            recursion_available: true,
            questions: request.questions.clone(),
            answers,
            ..Default::default()
        })
    }

    /// Retains the answers of a forwarded response. The records under
    /// each answered (name, type, class) replace whatever the cache
    /// held for it; zero-TTL records are not retained.
    fn store(&self, response: &Message) {
        let now = Instant::now();
        let mut fresh: HashMap<Key, Vec<Entry>> = HashMap::new();
        for answer in &response.answers {
            if answer.ttl.is_zero() {
                continue;
            }
            let key = Key {
                name: answer.name.clone(),
                rr_type: answer.record.rr_type(),
                class: answer.class,
            };
            fresh.entry(key).or_default().push(Entry {
                record: answer.record.clone(),
                expires_at: now + answer.ttl,
            });
        }
        if fresh.is_empty() {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        for (key, records) in fresh {
            entries.insert(key, records);
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
