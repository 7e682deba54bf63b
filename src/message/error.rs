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

//! Error types raised by the wire codec.

use std::fmt;

use crate::name;

////////////////////////////////////////////////////////////////////////
// PARSE ERRORS                                                       //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a DNS message (or part of one) could not be
/// decoded from its on-the-wire representation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ParseError {
    /// There were not enough octets left for a fixed-size field.
    BaseLen,

    /// There were not enough octets left for a field whose length is
    /// given by an earlier field.
    CalcLen,

    /// A label started with the reserved `01` or `10` bit prefix.
    ReservedSegPrefix,

    /// Compression pointers were followed more times than the decoder
    /// allows.
    PointerCycle,

    /// A decoded name was not a valid FQDN (it exceeded 255 octets).
    InvalidFqdn,

    /// A compression pointer did not point strictly backward within
    /// the message.
    InvalidPointer,

    /// A resource record was cut short.
    ResourceLen,

    /// A character-string segment exceeded 255 octets.
    SegTooLong,

    /// A character-string segment that must not be empty was empty.
    ZeroSegLen,

    /// A record's RDATA did not fill its RDLENGTH window.
    ResTooLong,

    /// The record type is not in the decoding table.
    UnknownType,

    /// A section was read before the sections preceding it.
    NotStarted,

    /// Every entry of the section has already been read.
    SectionDone,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::BaseLen => f.write_str("insufficient data for base length type"),
            Self::CalcLen => f.write_str("insufficient data for calculated length type"),
            Self::ReservedSegPrefix => f.write_str("segment prefix is reserved"),
            Self::PointerCycle => f.write_str("pointer cycle"),
            Self::InvalidFqdn => f.write_str("invalid FQDN"),
            Self::InvalidPointer => f.write_str("invalid pointer"),
            Self::ResourceLen => f.write_str("insufficient data for resource body length"),
            Self::SegTooLong => f.write_str("segment length too long"),
            Self::ZeroSegLen => f.write_str("zero length segment"),
            Self::ResTooLong => f.write_str("resource length too long"),
            Self::UnknownType => f.write_str("unknown resource type"),
            Self::NotStarted => f.write_str("parsing of this section isn't available yet"),
            Self::SectionDone => f.write_str("parsing of this section has completed"),
        }
    }
}

impl std::error::Error for ParseError {}

////////////////////////////////////////////////////////////////////////
// PACK ERRORS                                                        //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a DNS message could not be encoded into its
/// on-the-wire representation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PackError {
    /// A value does not fit in its wire field (an opcode or rcode above
    /// 15, a TTL or SOA timer outside 32 bits of seconds, or RDATA
    /// longer than 65,535 octets).
    FieldOverflow,

    /// More than 65,535 questions.
    TooManyQuestions,

    /// More than 65,535 answer records.
    TooManyAnswers,

    /// More than 65,535 authority records.
    TooManyAuthorities,

    /// More than 65,535 additional records.
    TooManyAdditionals,

    /// A name's literal wire form exceeds 255 octets.
    InvalidFqdn,

    /// A character-string segment exceeds 255 octets.
    SegTooLong,

    /// A character-string segment that must not be empty is empty.
    ZeroSegLen,
}

impl fmt::Display for PackError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::FieldOverflow => f.write_str("value too large for packed field"),
            Self::TooManyQuestions => f.write_str("too many questions to pack (>65535)"),
            Self::TooManyAnswers => f.write_str("too many answers to pack (>65535)"),
            Self::TooManyAuthorities => f.write_str("too many authorities to pack (>65535)"),
            Self::TooManyAdditionals => f.write_str("too many additionals to pack (>65535)"),
            Self::InvalidFqdn => f.write_str("invalid FQDN"),
            Self::SegTooLong => f.write_str("segment length too long"),
            Self::ZeroSegLen => f.write_str("zero length segment"),
        }
    }
}

impl std::error::Error for PackError {}

impl From<name::Error> for PackError {
    fn from(_: name::Error) -> Self {
        Self::InvalidFqdn
    }
}
