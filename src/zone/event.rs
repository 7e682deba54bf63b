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

//! Change events observed on a zone's record set.

use std::collections::HashMap;

use super::rrset::RecordSet;

/// One mutation of a zone's record set, as delivered to its observers.
///
/// Each variant carries the affected key along with the key's records
/// before (`old`) and after (`new`) the mutation, cloned at the moment
/// of the change.
#[derive(Debug)]
pub enum Event {
    /// Every key was removed.
    Clear,

    /// The whole map was replaced.
    ReplaceAll {
        old: HashMap<String, RecordSet>,
        new: HashMap<String, RecordSet>,
    },

    /// One key was set to a new record set.
    SetKey {
        key: String,
        old: Option<RecordSet>,
        new: RecordSet,
    },

    /// One key was removed.
    DeleteKey {
        key: String,
        old: Option<RecordSet>,
    },

    /// One record was removed from a key.
    DeleteRecord {
        key: String,
        old: Option<RecordSet>,
        new: Option<RecordSet>,
    },

    /// One record was appended under a key.
    AppendRecord {
        key: String,
        old: Option<RecordSet>,
        new: RecordSet,
    },
}
