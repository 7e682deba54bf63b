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

//! The keyed record store behind a zone.

use std::collections::HashMap;
use std::sync::Mutex;

use super::event::Event;
use crate::message::{Record, Type};

/// The records of one short name, grouped by type and kept in
/// insertion order within each type.
pub type RecordSet = HashMap<Type, Vec<Record>>;

/// A change observer: a function of the [`Event`] describing the
/// mutation.
pub type Observer = Box<dyn Fn(&Event) + Send + Sync>;

/// A set of resource records indexed by short name and type.
///
/// Keys are short names relative to the zone origin, without a
/// trailing dot (`app`, `1.app`); the zone apex is the empty key. All
/// operations are serialized by a single lock, so each mutator is
/// atomic.
///
/// A single `before` and a single `after` observer may be registered;
/// they are invoked around every mutation with the describing
/// [`Event`]. The `before` observer runs with the lock held and must
/// not call back into the set.
#[derive(Default)]
pub struct RrSet {
    records: Mutex<HashMap<String, RecordSet>>,
    before: Option<Observer>,
    after: Option<Observer>,
}

impl RrSet {
    /// Creates an empty `RrSet`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the observer invoked before each mutation.
    pub fn set_before_observer(&mut self, observer: impl Fn(&Event) + Send + Sync + 'static) {
        self.before = Some(Box::new(observer));
    }

    /// Registers the observer invoked after each mutation.
    pub fn set_after_observer(&mut self, observer: impl Fn(&Event) + Send + Sync + 'static) {
        self.after = Some(Box::new(observer));
    }

    /// Removes every key.
    pub fn clear(&self) {
        let mut records = self.records.lock().unwrap();
        let event = Event::Clear;
        notify(&self.before, &event);
        records.clear();
        drop(records);
        notify(&self.after, &event);
    }

    /// Replaces the whole map.
    pub fn replace_all(&self, new: HashMap<String, RecordSet>) {
        let mut records = self.records.lock().unwrap();
        let event = Event::ReplaceAll {
            old: records.clone(),
            new: new.clone(),
        };
        notify(&self.before, &event);
        *records = new;
        drop(records);
        notify(&self.after, &event);
    }

    /// Sets the record set of one key.
    pub fn set_key(&self, key: &str, value: RecordSet) {
        let mut records = self.records.lock().unwrap();
        let event = Event::SetKey {
            key: key.to_owned(),
            old: records.get(key).cloned(),
            new: value.clone(),
        };
        notify(&self.before, &event);
        records.insert(key.to_owned(), value);
        drop(records);
        notify(&self.after, &event);
    }

    /// Returns a copy of the record set of one key.
    pub fn get_key(&self, key: &str) -> Option<RecordSet> {
        self.records.lock().unwrap().get(key).cloned()
    }

    /// Removes one key.
    pub fn delete_key(&self, key: &str) {
        let mut records = self.records.lock().unwrap();
        let event = Event::DeleteKey {
            key: key.to_owned(),
            old: records.get(key).cloned(),
        };
        notify(&self.before, &event);
        records.remove(key);
        drop(records);
        notify(&self.after, &event);
    }

    /// Removes the first record under `key` that carries the same data
    /// as `record` (per [`Record::same_data`]).
    pub fn delete_record(&self, key: &str, record: &Record) {
        let mut records = self.records.lock().unwrap();
        let old = records.get(key).cloned();
        let new = old.clone().map(|mut set| {
            if let Some(list) = set.get_mut(&record.rr_type()) {
                if let Some(position) = list.iter().position(|r| r.same_data(record)) {
                    list.remove(position);
                }
            }
            set
        });
        let event = Event::DeleteRecord {
            key: key.to_owned(),
            old,
            new: new.clone(),
        };
        notify(&self.before, &event);
        if let Some(new) = new {
            records.insert(key.to_owned(), new);
        }
        drop(records);
        notify(&self.after, &event);
    }

    /// Appends one record under `key`, creating the key as needed.
    pub fn append_record(&self, key: &str, record: Record) {
        let mut records = self.records.lock().unwrap();
        let old = records.get(key).cloned();
        let mut new = old.clone().unwrap_or_default();
        new.entry(record.rr_type()).or_default().push(record);
        let event = Event::AppendRecord {
            key: key.to_owned(),
            old,
            new: new.clone(),
        };
        notify(&self.before, &event);
        records.insert(key.to_owned(), new);
        drop(records);
        notify(&self.after, &event);
    }

    /// Returns the number of keys.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Returns whether the set has no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of the whole map.
    pub fn get_all(&self) -> HashMap<String, RecordSet> {
        self.records.lock().unwrap().clone()
    }
}

fn notify(observer: &Option<Observer>, event: &Event) {
    if let Some(observer) = observer {
        observer(event);
    }
}
