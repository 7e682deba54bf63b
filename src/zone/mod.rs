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

//! Implementation of DNS zone data structures, for answering
//! authoritative queries from records kept in memory.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::client::Query;
use crate::handler::Handler;
use crate::message::{Rcode, Record, Soa, Type};
use crate::name::Name;
use crate::server::writer::MessageWriter;

mod event;
mod rrset;
pub use event::Event;
pub use rrset::{Observer, RecordSet, RrSet};

/// A contiguous set of DNS records under an origin domain name.
///
/// A `Zone` is created at startup and then serves and is mutated for
/// the lifetime of the server. Its record set is keyed by short name
/// (the owner name with the origin stripped) and guarded by a single
/// lock; see [`RrSet`]. Every reply it produces is authoritative.
pub struct Zone {
    origin: Name,
    ttl: Duration,
    soa: Option<Soa>,
    records: RrSet,
}

impl Zone {
    /// Creates an empty zone under `origin` whose records are served
    /// with the default TTL `ttl`.
    pub fn new(origin: Name, ttl: Duration) -> Self {
        Self {
            origin,
            ttl,
            soa: None,
            records: RrSet::new(),
        }
    }

    /// Attaches the zone's SOA record.
    pub fn with_soa(mut self, soa: Soa) -> Self {
        self.soa = Some(soa);
        self
    }

    /// Returns the zone's origin.
    pub fn origin(&self) -> &Name {
        &self.origin
    }

    /// Returns the zone's default TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the zone's SOA, if one is attached.
    pub fn soa(&self) -> Option<&Soa> {
        self.soa.as_ref()
    }

    /// Returns the zone's record set.
    pub fn records(&self) -> &RrSet {
        &self.records
    }

    /// Returns the zone's record set for observer registration.
    pub fn records_mut(&mut self) -> &mut RrSet {
        &mut self.records
    }
}

#[async_trait]
impl Handler for Zone {
    /// Answers the questions that fall under the zone origin.
    ///
    /// A SOA question for the origin itself is answered from the
    /// zone's SOA. Any other question is answered from the record set
    /// under the question's short name, filtered to the question type.
    /// When recursion is desired and an emitted answer is a CNAME, the
    /// target's records of the original question type are chased and
    /// emitted as well. If nothing was answered at all, the reply is
    /// NXDOMAIN with the SOA (when present) in the authority section.
    async fn serve_dns(&self, query: &Query, w: &mut dyn MessageWriter) {
        w.authoritative(true);

        let mut found = false;
        for question in &query.message.questions {
            if question.rr_type == Type::SOA && question.name == self.origin {
                if let Some(soa) = &self.soa {
                    w.answer(question.name.clone(), self.ttl, Record::Soa(soa.clone()));
                    found = true;
                }
                continue;
            }

            let key = match question.name.strip_origin(&self.origin) {
                Some(key) => key,
                None => continue,
            };
            let records = match self.records.get_key(key) {
                Some(records) => records,
                None => continue,
            };

            for record in records.get(&question.rr_type).into_iter().flatten() {
                w.answer(question.name.clone(), self.ttl, record.clone());
                found = true;

                if query.message.recursion_desired {
                    if let Record::Cname(target) = record {
                        self.chase_cname(target, question.rr_type, w);
                    }
                }
            }
        }

        if !found {
            w.status(Rcode::NX_DOMAIN);
            if let Some(soa) = &self.soa {
                w.authority(self.origin.clone(), self.ttl, Record::Soa(soa.clone()));
            }
        }
    }
}

impl Zone {
    /// Emits the records of the CNAME target that match the original
    /// question type.
    fn chase_cname(&self, target: &Name, rr_type: Type, w: &mut dyn MessageWriter) {
        let key = match target.strip_origin(&self.origin) {
            Some(key) => key,
            None => return,
        };
        if let Some(records) = self.records.get_key(key) {
            for record in records.get(&rr_type).into_iter().flatten() {
                w.answer(target.clone(), self.ttl, record.clone());
            }
        }
    }
}

/// Builds a [`RecordSet`] from records, grouping by type in order.
pub fn record_set(records: impl IntoIterator<Item = Record>) -> RecordSet {
    let mut set = RecordSet::new();
    for record in records {
        set.entry(record.rr_type()).or_default().push(record);
    }
    set
}

/// Builds a whole keyed map from `(key, records)` pairs.
pub fn record_map<'a>(
    entries: impl IntoIterator<Item = (&'a str, RecordSet)>,
) -> HashMap<String, RecordSet> {
    entries
        .into_iter()
        .map(|(key, set)| (key.to_owned(), set))
        .collect()
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use lazy_static::lazy_static;

    use super::*;
    use crate::class::Class;
    use crate::message::{Message, Question, Resource};
    use crate::transport::Error;

    lazy_static! {
        static ref ORIGIN: Name = "tld.".parse().unwrap();
        static ref SOA: Soa = Soa {
            ns: "dns.tld.".parse().unwrap(),
            mbox: "hostmaster.tld.".parse().unwrap(),
            serial: 1234,
            refresh: Duration::from_secs(3600),
            retry: Duration::from_secs(600),
            expire: Duration::from_secs(86400),
            min_ttl: Duration::from_secs(60),
        };
    }

    /// A writer double that records everything a handler emits.
    #[derive(Default)]
    struct RecordingWriter {
        msg: Message,
    }

    #[async_trait]
    impl MessageWriter for RecordingWriter {
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
            Err(Error::NoUpstream)
        }

        async fn forward(&mut self, _request: Message) -> Result<Message, Error> {
            Err(Error::NoUpstream)
        }

        async fn reply(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    fn a(addr: &str) -> Record {
        Record::A(addr.parse().unwrap())
    }

    fn aaaa(addr: &str) -> Record {
        Record::Aaaa(addr.parse().unwrap())
    }

    fn app_zone() -> Zone {
        let zone = Zone::new(ORIGIN.clone(), Duration::from_secs(3600)).with_soa(SOA.clone());
        zone.records().replace_all(record_map([
            (
                "1.app",
                record_set([a("10.42.0.1"), aaaa("dead:beef::1")]),
            ),
            (
                "2.app",
                record_set([a("10.42.0.2"), aaaa("dead:beef::2")]),
            ),
            (
                "3.app",
                record_set([a("10.42.0.3"), aaaa("dead:beef::3")]),
            ),
            (
                "app",
                record_set([
                    a("10.42.0.1"),
                    a("10.42.0.2"),
                    a("10.42.0.3"),
                    aaaa("dead:beef::1"),
                    aaaa("dead:beef::2"),
                    aaaa("dead:beef::3"),
                ]),
            ),
        ]));
        zone
    }

    fn query_for(name: &str, rr_type: Type) -> Query {
        Query::new(Message {
            id: 1,
            questions: vec![Question {
                name: name.parse().unwrap(),
                rr_type,
                class: Class::IN,
            }],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn answers_in_insertion_order() {
        let zone = app_zone();
        let mut w = RecordingWriter::default();
        zone.serve_dns(&query_for("app.tld.", Type::A), &mut w).await;

        assert!(w.msg.authoritative);
        assert_eq!(w.msg.rcode, Rcode::NO_ERROR);
        let answers: Vec<Record> = w.msg.answers.iter().map(|r| r.record.clone()).collect();
        assert_eq!(
            answers,
            vec![a("10.42.0.1"), a("10.42.0.2"), a("10.42.0.3")]
        );
        for answer in &w.msg.answers {
            assert_eq!(answer.name.as_str(), "app.tld.");
            assert_eq!(answer.ttl, Duration::from_secs(3600));
        }
    }

    #[tokio::test]
    async fn missing_name_is_nxdomain_with_soa() {
        let zone = app_zone();
        let mut w = RecordingWriter::default();
        zone.serve_dns(&query_for("missing.tld.", Type::A), &mut w)
            .await;

        assert!(w.msg.authoritative);
        assert_eq!(w.msg.rcode, Rcode::NX_DOMAIN);
        assert!(w.msg.answers.is_empty());
        assert_eq!(w.msg.authorities.len(), 1);
        assert_eq!(w.msg.authorities[0].name.as_str(), "tld.");
        assert_eq!(w.msg.authorities[0].record, Record::Soa(SOA.clone()));
    }

    #[tokio::test]
    async fn soa_question_at_origin_is_answered() {
        let zone = app_zone();
        let mut w = RecordingWriter::default();
        zone.serve_dns(&query_for("tld.", Type::SOA), &mut w).await;

        assert_eq!(w.msg.rcode, Rcode::NO_ERROR);
        assert_eq!(w.msg.answers.len(), 1);
        assert_eq!(w.msg.answers[0].record, Record::Soa(SOA.clone()));
    }

    #[tokio::test]
    async fn questions_outside_the_origin_are_ignored() {
        let zone = app_zone();
        let mut w = RecordingWriter::default();
        zone.serve_dns(&query_for("app.example.", Type::A), &mut w)
            .await;

        assert_eq!(w.msg.rcode, Rcode::NX_DOMAIN);
        assert!(w.msg.answers.is_empty());
    }

    #[tokio::test]
    async fn cname_is_chased_when_recursion_desired() {
        let zone = app_zone();
        // The alias is served for A questions, so it lives under the A
        // key even though the record itself is a CNAME.
        let mut alias = RecordSet::new();
        alias.insert(
            Type::A,
            vec![Record::Cname("app.tld.".parse().unwrap())],
        );
        zone.records().set_key("alias", alias);

        let mut query = query_for("alias.tld.", Type::A);
        query.message.recursion_desired = true;
        let mut w = RecordingWriter::default();
        zone.serve_dns(&query, &mut w).await;

        let answers: Vec<Record> = w.msg.answers.iter().map(|r| r.record.clone()).collect();
        assert_eq!(
            answers,
            vec![
                Record::Cname("app.tld.".parse().unwrap()),
                a("10.42.0.1"),
                a("10.42.0.2"),
                a("10.42.0.3"),
            ]
        );
        assert_eq!(w.msg.answers[1].name.as_str(), "app.tld.");

        // Without recursion desired, the alias is not chased.
        let mut w = RecordingWriter::default();
        zone.serve_dns(&query_for("alias.tld.", Type::A), &mut w)
            .await;
        assert_eq!(w.msg.answers.len(), 1);
    }

    #[tokio::test]
    async fn mutators_are_visible_to_lookups() {
        let zone = app_zone();
        zone.records().append_record("app", a("10.42.0.4"));
        let mut w = RecordingWriter::default();
        zone.serve_dns(&query_for("app.tld.", Type::A), &mut w).await;
        assert_eq!(w.msg.answers.len(), 4);

        zone.records().delete_record("app", &a("10.42.0.2"));
        let mut w = RecordingWriter::default();
        zone.serve_dns(&query_for("app.tld.", Type::A), &mut w).await;
        let answers: Vec<Record> = w.msg.answers.iter().map(|r| r.record.clone()).collect();
        assert_eq!(
            answers,
            vec![a("10.42.0.1"), a("10.42.0.3"), a("10.42.0.4")]
        );

        zone.records().delete_key("app");
        assert_eq!(zone.records().get_key("app"), None);
    }

    #[test]
    fn observers_fire_around_mutations() {
        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let mut zone = Zone::new(ORIGIN.clone(), Duration::from_secs(60));
        {
            let before = before.clone();
            zone.records_mut().set_before_observer(move |event| {
                if let Event::AppendRecord { key, old, new } = event {
                    assert_eq!(key, "app");
                    assert!(old.is_none());
                    assert_eq!(new[&Type::A].len(), 1);
                }
                before.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let after = after.clone();
            zone.records_mut()
                .set_after_observer(move |_| {
                    after.fetch_add(1, Ordering::SeqCst);
                });
        }

        zone.records().append_record("app", a("10.0.0.1"));
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);

        zone.records().clear();
        assert_eq!(before.load(Ordering::SeqCst), 2);
        assert_eq!(after.load(Ordering::SeqCst), 2);
    }
}
