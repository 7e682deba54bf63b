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

//! The [`Class`] code of questions and resource records.

use std::fmt;
use std::str::FromStr;

/// A DNS class code.
///
/// On the wire a class is a 16-bit integer; in practice everything is
/// [`IN`](Class::IN), with [`ANY`](Class::ANY) appearing as a QCLASS
/// wildcard. The wrapper carries the handful of assigned mnemonics and
/// falls back to the `CLASSn` form of [RFC 3597 § 5] for everything
/// else, in both directions.
///
/// [RFC 3597 § 5]: https://datatracker.ietf.org/doc/html/rfc3597#section-5
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Class(u16);

impl Class {
    pub const IN: Self = Self(1);
    pub const CH: Self = Self(3);
    pub const HS: Self = Self(4);

    /// The QCLASS `*`, matching any class.
    pub const ANY: Self = Self(255);

    const MNEMONICS: [(Class, &'static str); 4] = [
        (Self::IN, "IN"),
        (Self::CH, "CH"),
        (Self::HS, "HS"),
        (Self::ANY, "ANY"),
    ];

    /// Returns the mnemonic for the class, if it has one.
    pub fn mnemonic(self) -> Option<&'static str> {
        Self::MNEMONICS
            .iter()
            .find(|(class, _)| *class == self)
            .map(|(_, mnemonic)| *mnemonic)
    }
}

impl From<u16> for Class {
    fn from(value: u16) -> Self {
        Class(value)
    }
}

impl From<Class> for u16 {
    fn from(class: Class) -> Self {
        class.0
    }
}

impl FromStr for Class {
    type Err = UnknownClass;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        for (class, mnemonic) in Self::MNEMONICS {
            if text.eq_ignore_ascii_case(mnemonic) {
                return Ok(class);
            }
        }
        text.get(..5)
            .filter(|prefix| prefix.eq_ignore_ascii_case("CLASS"))
            .and_then(|_| text[5..].parse::<u16>().ok())
            .map(Class)
            .ok_or(UnknownClass)
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", *self)
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.mnemonic() {
            Some(mnemonic) => f.write_str(mnemonic),
            None => write!(f, "CLASS{}", self.0),
        }
    }
}

/// An error signaling that a string names no DNS class.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UnknownClass;

impl fmt::Display for UnknownClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("unrecognized class")
    }
}

impl std::error::Error for UnknownClass {}
