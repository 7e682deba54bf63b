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

//! A DNS protocol library.
//!
//! The crate is organized around the path a query travels:
//!
//! * [`message`] packs and unpacks DNS messages, including name
//!   compression ([`name`] and [`class`] provide the shared vocabulary
//!   types);
//! * [`zone`] answers authoritative queries from records kept in
//!   memory;
//! * [`cache`] is a TTL-bounded response cache implementing the same
//!   resolver contract a [`client`] consults before forwarding;
//! * [`transport`] pools connections to upstream name servers over
//!   UDP, TCP, and TLS, with pluggable upstream-selection policies;
//! * [`server`] accepts datagram and stream listeners and drives a
//!   [`handler`];
//! * [`mux`] fans a multi-question query out to per-question handlers
//!   and merges their replies, forwarding the unanswered remainder
//!   upstream at most once per query.

pub mod cache;
pub mod class;
pub mod client;
pub mod handler;
pub mod message;
pub mod mux;
pub mod name;
pub mod server;
pub mod transport;
pub mod zone;
