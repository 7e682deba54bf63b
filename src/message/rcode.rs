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

//! Implementation of the [`Rcode`] type.

use std::fmt;

/// The RCODE value of the DNS message header.
///
/// [RFC 1035 § 4.1.1] defines the RCODE field as a four-bit field
/// indicating success or failure in a DNS response. This is a wrapper
/// around [`u8`] with constants for the values this crate works with.
/// Values above 15 cannot be expressed on the wire; packing such a
/// message fails with a field overflow.
///
/// `Rcode`s are ordered by their numeric value, which the query
/// multiplexer uses when merging the outcomes of sub-queries (the
/// worst outcome wins).
///
/// [RFC 1035 § 4.1.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.1
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Rcode(u8);

impl Rcode {
    pub const NO_ERROR: Self = Self(0);
    pub const FORM_ERR: Self = Self(1);
    pub const SERV_FAIL: Self = Self(2);
    pub const NX_DOMAIN: Self = Self(3);
    pub const NOT_IMP: Self = Self(4);
    pub const REFUSED: Self = Self(5);
}

impl From<u8> for Rcode {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<Rcode> for u8 {
    fn from(rcode: Rcode) -> Self {
        rcode.0
    }
}

impl fmt::Debug for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", *self)
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::NO_ERROR => f.write_str("NOERROR"),
            Self::FORM_ERR => f.write_str("FORMERR"),
            Self::SERV_FAIL => f.write_str("SERVFAIL"),
            Self::NX_DOMAIN => f.write_str("NXDOMAIN"),
            Self::NOT_IMP => f.write_str("NOTIMP"),
            Self::REFUSED => f.write_str("REFUSED"),
            Self(value) => write!(f, "RCODE{}", value),
        }
    }
}
