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

//! Implementation of the [`Reader`] type to read on-the-wire DNS
//! messages section by section.

use super::compress::Decompressor;
use super::error::ParseError;
use super::{get_u16, Opcode, Question, Rcode, Resource, HEADER_SIZE};
use super::{FLAG_AA, FLAG_QR, FLAG_RA, FLAG_RD, FLAG_TC, OPCODE_SHIFT};

////////////////////////////////////////////////////////////////////////
// READER                                                             //
////////////////////////////////////////////////////////////////////////

/// A "frame" around a buffer containing a DNS message that reads the
/// message data in wire order.
///
/// A `Reader` is constructed with [`Reader::new`], which requires at
/// least a full 12-octet header. Header fields can be read at any time
/// through the accessor methods. The body is read with a cursor through
/// [`Reader::question`], [`Reader::answer`], [`Reader::authority`],
/// and [`Reader::additional`], which must be called in section order:
/// asking for a later section while an earlier one still has unread
/// entries fails with [`ParseError::NotStarted`], and reading past a
/// section's count fails with [`ParseError::SectionDone`].
pub struct Reader<'a> {
    dec: Decompressor<'a>,
    cursor: usize,
    section: Section,
    read_in_section: u16,
}

/// The section the cursor of a [`Reader`] is positioned in.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum Section {
    Question,
    Answer,
    Authority,
    Additional,
}

impl<'a> Reader<'a> {
    /// Creates a `Reader` over a received message buffer.
    pub fn new(octets: &'a [u8]) -> Result<Self, ParseError> {
        if octets.len() < HEADER_SIZE {
            return Err(ParseError::ResourceLen);
        }
        Ok(Self {
            dec: Decompressor::new(octets),
            cursor: HEADER_SIZE,
            section: Section::Question,
            read_in_section: 0,
        })
    }

    /// Returns the 16-bit ID of the message.
    pub fn id(&self) -> u16 {
        get_u16(self.dec.message(), 0).unwrap()
    }

    fn flags(&self) -> u16 {
        get_u16(self.dec.message(), 2).unwrap()
    }

    /// Returns whether the QR (query response) bit is set.
    pub fn response(&self) -> bool {
        self.flags() & FLAG_QR != 0
    }

    /// Returns the message's opcode.
    pub fn opcode(&self) -> Opcode {
        Opcode::from((self.flags() >> OPCODE_SHIFT) as u8 & 0x0f)
    }

    /// Returns whether the AA (authoritative answer) bit is set.
    pub fn authoritative(&self) -> bool {
        self.flags() & FLAG_AA != 0
    }

    /// Returns whether the TC (truncation) bit is set.
    pub fn truncated(&self) -> bool {
        self.flags() & FLAG_TC != 0
    }

    /// Returns whether the RD (recursion desired) bit is set.
    pub fn recursion_desired(&self) -> bool {
        self.flags() & FLAG_RD != 0
    }

    /// Returns whether the RA (recursion available) bit is set.
    pub fn recursion_available(&self) -> bool {
        self.flags() & FLAG_RA != 0
    }

    /// Returns the RCODE of the message.
    pub fn rcode(&self) -> Rcode {
        Rcode::from(self.flags() as u8 & 0x0f)
    }

    /// Returns the number of questions in the message.
    pub fn qdcount(&self) -> u16 {
        get_u16(self.dec.message(), 4).unwrap()
    }

    /// Returns the number of answers in the message.
    pub fn ancount(&self) -> u16 {
        get_u16(self.dec.message(), 6).unwrap()
    }

    /// Returns the number of authority records in the message.
    pub fn nscount(&self) -> u16 {
        get_u16(self.dec.message(), 8).unwrap()
    }

    /// Returns the number of additional records in the message.
    pub fn arcount(&self) -> u16 {
        get_u16(self.dec.message(), 10).unwrap()
    }

    /// Reads the next question. The cursor is not advanced on failure.
    pub fn question(&mut self) -> Result<Question, ParseError> {
        self.expect_section(Section::Question)?;
        let (question, used) = Question::unpack(&self.dec, self.cursor)?;
        self.cursor += used;
        self.read_in_section += 1;
        Ok(question)
    }

    /// Reads the next answer record. The cursor is not advanced on
    /// failure.
    pub fn answer(&mut self) -> Result<Resource, ParseError> {
        self.resource(Section::Answer)
    }

    /// Reads the next authority record. The cursor is not advanced on
    /// failure.
    pub fn authority(&mut self) -> Result<Resource, ParseError> {
        self.resource(Section::Authority)
    }

    /// Reads the next additional record. The cursor is not advanced on
    /// failure.
    pub fn additional(&mut self) -> Result<Resource, ParseError> {
        self.resource(Section::Additional)
    }

    /// Returns whether the cursor has reached the end of the buffer.
    pub fn at_eom(&self) -> bool {
        self.cursor >= self.dec.message().len()
    }

    fn resource(&mut self, section: Section) -> Result<Resource, ParseError> {
        self.expect_section(section)?;
        let (resource, used) = Resource::unpack(&self.dec, self.cursor)?;
        self.cursor += used;
        self.read_in_section += 1;
        Ok(resource)
    }

    /// Positions the reader in `section`, advancing over exhausted
    /// earlier sections.
    fn expect_section(&mut self, section: Section) -> Result<(), ParseError> {
        while self.section < section {
            if self.read_in_section < self.section_count(self.section) {
                // An earlier section still has unread entries.
                return Err(ParseError::NotStarted);
            }
            self.section = match self.section {
                Section::Question => Section::Answer,
                Section::Answer => Section::Authority,
                Section::Authority | Section::Additional => Section::Additional,
            };
            self.read_in_section = 0;
        }
        if self.section > section {
            return Err(ParseError::NotStarted);
        }
        if self.read_in_section >= self.section_count(section) {
            return Err(ParseError::SectionDone);
        }
        Ok(())
    }

    fn section_count(&self, section: Section) -> u16 {
        match section {
            Section::Question => self.qdcount(),
            Section::Answer => self.ancount(),
            Section::Authority => self.nscount(),
            Section::Additional => self.arcount(),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
