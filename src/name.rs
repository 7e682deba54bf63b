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

//! Implementation of the [`Name`] type for domain names.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use arrayvec::ArrayVec;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name, including the terminating null label.
pub(crate) const MAX_WIRE_LEN: usize = 255;

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length).
pub(crate) const MAX_LABEL_LEN: usize = 63;

////////////////////////////////////////////////////////////////////////
// NAME STRUCTURE                                                     //
////////////////////////////////////////////////////////////////////////

/// A fully qualified domain name.
///
/// A `Name` is kept in presentation form with a trailing dot
/// (`example.com.`); the DNS root is `.`. Characters that cannot appear
/// literally in presentation form are escaped as in [RFC 4343 § 2.1]:
/// `\.` and `\\` for dots and backslashes inside a label, and `\DDD`
/// (three decimal digits) for arbitrary octets.
///
/// A `Name` is constructed through its [`FromStr`] implementation,
/// which validates that every label is 1–63 octets and that the
/// on-the-wire form fits in 255 octets including the terminating null
/// label. The validated wire length is cached, since the wire codec
/// consults it frequently.
///
/// Equality and hashing operate on the decoded label octets, so two
/// spellings of the same name (`a\046b.` and the label `a.b` written
/// with an escape) compare equal. Comparison is case-sensitive, as in
/// the rest of this crate's query pipeline.
///
/// [RFC 4343 § 2.1]: https://datatracker.ietf.org/doc/html/rfc4343#section-2.1
#[derive(Clone)]
pub struct Name {
    text: Box<str>,
    wire_len: u16,
}

impl Name {
    /// Returns a `Name` representing the DNS root, `.`.
    pub fn root() -> Self {
        Self {
            text: ".".into(),
            wire_len: 1,
        }
    }

    /// Returns whether this `Name` is the DNS root.
    pub fn is_root(&self) -> bool {
        self.wire_len == 1
    }

    /// Returns the presentation form of the `Name`.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns the length of the uncompressed on-the-wire
    /// representation of the `Name`, including the terminating null
    /// label.
    pub fn wire_len(&self) -> usize {
        self.wire_len as usize
    }

    /// Returns an iterator over the labels of the `Name`, decoded to
    /// raw octets. The terminating null label is not yielded.
    pub fn labels(&self) -> Labels {
        Labels {
            spans: self.label_spans(),
        }
    }

    /// Returns an iterator over the labels of the `Name` that also
    /// yields, for each label, the offset within the presentation text
    /// at which the suffix starting with that label begins. The name
    /// compressor keys its table on those suffixes.
    pub(crate) fn label_spans(&self) -> LabelSpans {
        LabelSpans {
            text: if self.is_root() { "" } else { &self.text },
            pos: 0,
        }
    }

    /// Strips `origin` from the end of this `Name`, returning the
    /// remaining short name without its trailing label separator.
    ///
    /// The match must fall on a label boundary: `app.tld.` stripped of
    /// `tld.` yields `app`, while `xtld.` does not match `tld.` at all.
    /// A name equal to the origin yields the empty short name.
    pub fn strip_origin(&self, origin: &Name) -> Option<&str> {
        if self.text == origin.text {
            return Some("");
        }
        self.text
            .strip_suffix(origin.text.as_ref())
            .and_then(|rest| rest.strip_suffix('.'))
            .filter(|key| !key.is_empty())
    }

    /// Constructs a `Name` from parts already validated by the wire
    /// decoder. `text` must be canonical presentation form and
    /// `wire_len` must be the true wire length.
    pub(crate) fn from_validated(text: String, wire_len: u16) -> Self {
        debug_assert!(wire_len as usize <= MAX_WIRE_LEN);
        Self {
            text: text.into_boxed_str(),
            wire_len,
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self.text)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        if self.wire_len != other.wire_len {
            return false;
        }
        self.labels().eq(other.labels())
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for label in self.labels() {
            label.hash(state);
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ITERATION OVER A NAME'S LABELS                                     //
////////////////////////////////////////////////////////////////////////

/// An iterator over the labels of a [`Name`], decoded to raw octets.
#[derive(Clone, Debug)]
pub struct Labels<'a> {
    spans: LabelSpans<'a>,
}

impl Iterator for Labels<'_> {
    type Item = ArrayVec<u8, MAX_LABEL_LEN>;

    fn next(&mut self) -> Option<Self::Item> {
        self.spans.next().map(|(_, label)| label)
    }
}

/// The iterator behind [`Name::label_spans`].
#[derive(Clone, Debug)]
pub(crate) struct LabelSpans<'a> {
    text: &'a str,
    pos: usize,
}

impl Iterator for LabelSpans<'_> {
    type Item = (usize, ArrayVec<u8, MAX_LABEL_LEN>);

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.text.as_bytes();
        if self.pos >= bytes.len() {
            return None;
        }
        let start = self.pos;
        let mut label = ArrayVec::new();
        let mut i = start;
        while i < bytes.len() {
            match bytes[i] {
                b'.' => {
                    i += 1;
                    break;
                }
                b'\\' => {
                    // Validation guarantees a full escape sequence.
                    let (octet, consumed) = decode_escape(&bytes[i + 1..])
                        .expect("validated name contains a bad escape");
                    label.push(octet);
                    i += 1 + consumed;
                }
                octet => {
                    label.push(octet);
                    i += 1;
                }
            }
        }
        self.pos = i;
        Some((start, label))
    }
}

////////////////////////////////////////////////////////////////////////
// PARSING OF NAMES FROM RUST STRINGS                                 //
////////////////////////////////////////////////////////////////////////

/// Allows for conversion of a Rust [`str`] into a [`Name`]. The passed
/// string must be strictly ASCII and fully qualified (ending in an
/// unescaped dot). Escape sequences as defined by [RFC 4343 § 2.1] are
/// supported.
///
/// [RFC 4343 § 2.1]: https://datatracker.ietf.org/doc/html/rfc4343#section-2.1
impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::Empty);
        } else if s == "." {
            return Ok(Name::root());
        }

        let bytes = s.as_bytes();
        let mut wire_len = 1usize; // terminating null label
        let mut label_len = 0usize;
        let mut terminated = false;
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'.' => {
                    if label_len == 0 {
                        return Err(Error::EmptyLabel);
                    }
                    wire_len += 1 + label_len;
                    label_len = 0;
                    terminated = i == bytes.len() - 1;
                    i += 1;
                }
                b'\\' => {
                    let (_, consumed) =
                        decode_escape(&bytes[i + 1..]).ok_or(Error::InvalidEscape)?;
                    label_len += 1;
                    i += 1 + consumed;
                }
                octet if !octet.is_ascii() => return Err(Error::NotAscii),
                _ => {
                    label_len += 1;
                    i += 1;
                }
            }
            if label_len > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong);
            }
        }
        if !terminated {
            return Err(Error::NotFqdn);
        }
        if wire_len > MAX_WIRE_LEN {
            return Err(Error::NameTooLong);
        }
        Ok(Self {
            text: s.into(),
            wire_len: wire_len as u16,
        })
    }
}

/// Decodes an escape sequence. `bytes` must start with the octet
/// immediately *after* the backslash that introduces the sequence. On
/// success, returns the decoded octet and the number of octets
/// consumed after the backslash.
fn decode_escape(bytes: &[u8]) -> Option<(u8, usize)> {
    match bytes {
        [] => None,
        [d, rest @ ..] if d.is_ascii_digit() => {
            if rest.len() < 2 || !rest[0].is_ascii_digit() || !rest[1].is_ascii_digit() {
                return None;
            }
            let value =
                100 * (d - b'0') as u16 + 10 * (rest[0] - b'0') as u16 + (rest[1] - b'0') as u16;
            if value > 255 {
                None
            } else {
                Some((value as u8, 3))
            }
        }
        [octet, ..] if octet.is_ascii() => Some((*octet, 1)),
        _ => None,
    }
}

/// Appends the presentation form of a raw label octet to `out`,
/// escaping as needed.
pub(crate) fn push_escaped(out: &mut String, octet: u8) {
    match octet {
        b'.' | b'\\' => {
            out.push('\\');
            out.push(octet as char);
        }
        0x21..=0x7e => out.push(octet as char),
        _ => {
            out.push('\\');
            out.push_str(&format!("{:03}", octet));
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a string is not a valid domain name.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    Empty,
    NotAscii,
    LabelTooLong,
    NameTooLong,
    EmptyLabel,
    NotFqdn,
    InvalidEscape,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Empty => f.write_str("empty name"),
            Self::NotAscii => f.write_str("name is not ASCII"),
            Self::LabelTooLong => f.write_str("label exceeds 63 octets"),
            Self::NameTooLong => f.write_str("name exceeds 255 octets"),
            Self::EmptyLabel => f.write_str("empty non-terminal label"),
            Self::NotFqdn => f.write_str("name does not end with the root label"),
            Self::InvalidEscape => f.write_str("invalid escape sequence"),
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
