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

//! The [`Type`] code of questions and resource records.

use std::fmt;
use std::str::FromStr;

/// A DNS RR type code.
///
/// On the wire a type is a 16-bit integer. The wrapper carries
/// constants and mnemonics for the types this crate codes, and falls
/// back to the `TYPEn` form of [RFC 3597 § 5] for everything else, in
/// both directions.
///
/// [`Type::ANY`] never appears on the wire: it is the sentinel a
/// multiplexer table entry uses to match every question type.
///
/// [RFC 3597 § 5]: https://datatracker.ietf.org/doc/html/rfc3597#section-5
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Type(u16);

impl Type {
    /// Matches any question type in a multiplexer table entry.
    pub const ANY: Type = Type(0);

    pub const A: Type = Type(1);
    pub const NS: Type = Type(2);
    pub const CNAME: Type = Type(5);
    pub const SOA: Type = Type(6);
    pub const PTR: Type = Type(12);
    pub const MX: Type = Type(15);
    pub const TXT: Type = Type(16);
    pub const AAAA: Type = Type(28);
    pub const SRV: Type = Type(33);
    pub const DNAME: Type = Type(39);
    pub const OPT: Type = Type(41);
    pub const AXFR: Type = Type(252);

    /// The QTYPE `*`, requesting all records for a name.
    pub const ALL: Type = Type(255);

    pub const CAA: Type = Type(257);

    const MNEMONICS: [(Type, &'static str); 15] = [
        (Self::ANY, "ANY"),
        (Self::A, "A"),
        (Self::NS, "NS"),
        (Self::CNAME, "CNAME"),
        (Self::SOA, "SOA"),
        (Self::PTR, "PTR"),
        (Self::MX, "MX"),
        (Self::TXT, "TXT"),
        (Self::AAAA, "AAAA"),
        (Self::SRV, "SRV"),
        (Self::DNAME, "DNAME"),
        (Self::OPT, "OPT"),
        (Self::AXFR, "AXFR"),
        (Self::ALL, "ALL"),
        (Self::CAA, "CAA"),
    ];

    /// Returns the mnemonic for the type, if it has one.
    pub fn mnemonic(self) -> Option<&'static str> {
        Self::MNEMONICS
            .iter()
            .find(|(rr_type, _)| *rr_type == self)
            .map(|(_, mnemonic)| *mnemonic)
    }
}

impl From<u16> for Type {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<Type> for u16 {
    fn from(rr_type: Type) -> Self {
        rr_type.0
    }
}

impl FromStr for Type {
    type Err = UnknownTypeName;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        for (rr_type, mnemonic) in Self::MNEMONICS {
            if text.eq_ignore_ascii_case(mnemonic) {
                return Ok(rr_type);
            }
        }
        text.get(..4)
            .filter(|prefix| prefix.eq_ignore_ascii_case("TYPE"))
            .and_then(|_| text[4..].parse::<u16>().ok())
            .map(Type)
            .ok_or(UnknownTypeName)
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", *self)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.mnemonic() {
            Some(mnemonic) => f.write_str(mnemonic),
            None => write!(f, "TYPE{}", self.0),
        }
    }
}

/// An error signaling that a string names no RR type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UnknownTypeName;

impl fmt::Display for UnknownTypeName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("unrecognized RR type")
    }
}

impl std::error::Error for UnknownTypeName {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonics_survive_a_display_parse_cycle() {
        for (rr_type, _) in Type::MNEMONICS {
            assert_eq!(rr_type.to_string().parse::<Type>(), Ok(rr_type));
            assert_eq!(
                rr_type.to_string().to_lowercase().parse::<Type>(),
                Ok(rr_type)
            );
        }
    }

    #[test]
    fn unassigned_codes_use_the_generic_form() {
        // TYPE65280 is from the private use range, so it stays unknown.
        assert_eq!(Type::from(0xff00).to_string(), "TYPE65280");
        assert_eq!("type65280".parse::<Type>(), Ok(Type::from(0xff00)));
        assert!(Type::from(0xff00).mnemonic().is_none());
    }

    #[test]
    fn unparseable_types_are_rejected() {
        assert_eq!("HOSTADDR".parse::<Type>(), Err(UnknownTypeName));
        assert_eq!("TYPE".parse::<Type>(), Err(UnknownTypeName));
        assert_eq!("TYPEone".parse::<Type>(), Err(UnknownTypeName));
        assert_eq!("TYPE70000".parse::<Type>(), Err(UnknownTypeName));
    }
}
