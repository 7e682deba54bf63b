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

//! Implementation of reading and writing of DNS messages.

use std::time::Duration;

pub mod compress;
mod error;
mod opcode;
mod question;
mod rcode;
pub mod reader;
pub mod record;
mod rr_type;

pub use compress::{Compressor, Decompressor};
pub use error::{PackError, ParseError};
pub use opcode::Opcode;
pub use question::Question;
pub use rcode::Rcode;
pub use reader::Reader;
pub use record::{EdnsOption, Record, Soa};
pub use rr_type::{Type, UnknownTypeName};

use crate::class::Class;
use crate::name::Name;

/// The size of a DNS message header.
pub(crate) const HEADER_SIZE: usize = 12;

/// The classic maximum size of a DNS message carried in a UDP
/// datagram. The codec does not enforce it; the server truncates
/// datagram replies that exceed it.
pub const MAX_DATAGRAM_LEN: usize = 512;

// Header flag bits, within the 16-bit flags word.
const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;
const OPCODE_SHIFT: u16 = 11;

////////////////////////////////////////////////////////////////////////
// MESSAGE                                                            //
////////////////////////////////////////////////////////////////////////

/// A DNS message: the header fields and the four sections.
///
/// A `Message` is an owned value living for one request/response
/// exchange. [`Message::pack`] serializes it to the wire (optionally
/// with name compression) and [`Message::unpack`] decodes one from a
/// received buffer. The `Default` value is a minimal QUERY skeleton.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Message {
    pub id: u16,
    pub response: bool,
    pub opcode: Opcode,
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub rcode: Rcode,

    pub questions: Vec<Question>,
    pub answers: Vec<Resource>,
    pub authorities: Vec<Resource>,
    pub additionals: Vec<Resource>,
}

impl Message {
    /// Encodes the message as a byte vector. Domain name compression
    /// is enabled by setting `compress`.
    pub fn pack(&self, compress: bool) -> Result<Vec<u8>, PackError> {
        let mut buf = Vec::with_capacity(MAX_DATAGRAM_LEN);
        self.pack_header(&mut buf)?;
        let mut com = Compressor::new(compress);
        for question in &self.questions {
            question.pack(&mut buf, &mut com)?;
        }
        for section in [&self.answers, &self.authorities, &self.additionals] {
            for resource in section {
                resource.pack(&mut buf, &mut com)?;
            }
        }
        Ok(buf)
    }

    /// Decodes a message from `bytes`. Octets beyond the counted
    /// sections are ignored.
    pub fn unpack(bytes: &[u8]) -> Result<Message, ParseError> {
        let mut reader = Reader::new(bytes)?;
        let mut message = Message {
            id: reader.id(),
            response: reader.response(),
            opcode: reader.opcode(),
            authoritative: reader.authoritative(),
            truncated: reader.truncated(),
            recursion_desired: reader.recursion_desired(),
            recursion_available: reader.recursion_available(),
            rcode: reader.rcode(),
            questions: Vec::with_capacity(reader.qdcount() as usize),
            answers: Vec::with_capacity(reader.ancount() as usize),
            authorities: Vec::with_capacity(reader.nscount() as usize),
            additionals: Vec::with_capacity(reader.arcount() as usize),
        };
        for _ in 0..reader.qdcount() {
            message.questions.push(reader.question()?);
        }
        for _ in 0..reader.ancount() {
            message.answers.push(reader.answer()?);
        }
        for _ in 0..reader.nscount() {
            message.authorities.push(reader.authority()?);
        }
        for _ in 0..reader.arcount() {
            message.additionals.push(reader.additional()?);
        }
        Ok(message)
    }

    fn pack_header(&self, buf: &mut Vec<u8>) -> Result<(), PackError> {
        let opcode = u8::from(self.opcode);
        if opcode > 0x0f {
            return Err(PackError::FieldOverflow);
        }
        let rcode = u8::from(self.rcode);
        if rcode > 0x0f {
            return Err(PackError::FieldOverflow);
        }

        let mut flags = (opcode as u16) << OPCODE_SHIFT | rcode as u16;
        if self.response {
            flags |= FLAG_QR;
        }
        if self.authoritative {
            flags |= FLAG_AA;
        }
        if self.truncated {
            flags |= FLAG_TC;
        }
        if self.recursion_desired {
            flags |= FLAG_RD;
        }
        if self.recursion_available {
            flags |= FLAG_RA;
        }

        let qdcount =
            u16::try_from(self.questions.len()).or(Err(PackError::TooManyQuestions))?;
        let ancount = u16::try_from(self.answers.len()).or(Err(PackError::TooManyAnswers))?;
        let nscount =
            u16::try_from(self.authorities.len()).or(Err(PackError::TooManyAuthorities))?;
        let arcount =
            u16::try_from(self.additionals.len()).or(Err(PackError::TooManyAdditionals))?;

        buf.extend_from_slice(&self.id.to_be_bytes());
        buf.extend_from_slice(&flags.to_be_bytes());
        buf.extend_from_slice(&qdcount.to_be_bytes());
        buf.extend_from_slice(&ancount.to_be_bytes());
        buf.extend_from_slice(&nscount.to_be_bytes());
        buf.extend_from_slice(&arcount.to_be_bytes());
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// RESOURCE                                                           //
////////////////////////////////////////////////////////////////////////

/// A DNS resource record: owner name, class, time to live, and the
/// typed record data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resource {
    pub name: Name,
    pub class: Class,
    pub ttl: Duration,
    pub record: Record,
}

impl Resource {
    /// Packs the resource at the end of `buf`.
    ///
    /// The RDLENGTH field is computed against the compression state
    /// before the RDATA is emitted, so the compressor is consulted
    /// twice but mutated once.
    pub fn pack(&self, buf: &mut Vec<u8>, com: &mut Compressor) -> Result<(), PackError> {
        com.pack_name(buf, &self.name)?;

        let ttl = self.ttl.as_secs();
        if ttl > u32::MAX as u64 {
            return Err(PackError::FieldOverflow);
        }

        let rdlen = self.record.rdata_len(com, buf.len() + 10);
        let rdlen = u16::try_from(rdlen).or(Err(PackError::FieldOverflow))?;

        buf.extend_from_slice(&u16::from(self.record.rr_type()).to_be_bytes());
        buf.extend_from_slice(&u16::from(self.class).to_be_bytes());
        buf.extend_from_slice(&(ttl as u32).to_be_bytes());
        buf.extend_from_slice(&rdlen.to_be_bytes());

        let rdata_start = buf.len();
        self.record.pack_rdata(buf, com)?;
        debug_assert_eq!(buf.len() - rdata_start, rdlen as usize);
        Ok(())
    }

    /// Unpacks a resource starting at `at`, returning it along with the
    /// number of octets it occupied.
    pub fn unpack(dec: &Decompressor, at: usize) -> Result<(Resource, usize), ParseError> {
        let (name, name_len) = dec.unpack_name(at)?;
        let msg = dec.message();
        let fixed = at + name_len;
        let rr_type = get_u16(msg, fixed).ok_or(ParseError::ResourceLen)?;
        let class = get_u16(msg, fixed + 2).ok_or(ParseError::ResourceLen)?;
        let ttl = get_u32(msg, fixed + 4).ok_or(ParseError::ResourceLen)?;
        let rdlen = get_u16(msg, fixed + 8).ok_or(ParseError::ResourceLen)? as usize;
        let record = Record::unpack(rr_type.into(), dec, fixed + 10, rdlen)?;
        Ok((
            Resource {
                name,
                class: class.into(),
                ttl: Duration::from_secs(ttl as u64),
                record,
            },
            name_len + 10 + rdlen,
        ))
    }
}

////////////////////////////////////////////////////////////////////////
// HELPERS FOR READING MULTI-BYTE INTEGERS                            //
////////////////////////////////////////////////////////////////////////

/// Reads a network-byte-order `u16` at offset `at` of `octets`.
pub(crate) fn get_u16(octets: &[u8], at: usize) -> Option<u16> {
    octets
        .get(at..at + 2)
        .map(|bytes| u16::from_be_bytes(bytes.try_into().unwrap()))
}

/// Reads a network-byte-order `u32` at offset `at` of `octets`.
pub(crate) fn get_u32(octets: &[u8], at: usize) -> Option<u32> {
    octets
        .get(at..at + 4)
        .map(|bytes| u32::from_be_bytes(bytes.try_into().unwrap()))
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
