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

//! Implementation of the [`Question`] type.

use super::compress::{Compressor, Decompressor};
use super::error::{PackError, ParseError};
use super::get_u16;
use super::Type;
use crate::class::Class;
use crate::name::Name;

/// A DNS question: the name, type, and class being asked about.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Question {
    pub name: Name,
    pub rr_type: Type,
    pub class: Class,
}

impl Question {
    /// Packs the question at the end of `buf`.
    pub fn pack(&self, buf: &mut Vec<u8>, com: &mut Compressor) -> Result<(), PackError> {
        com.pack_name(buf, &self.name)?;
        buf.extend_from_slice(&u16::from(self.rr_type).to_be_bytes());
        buf.extend_from_slice(&u16::from(self.class).to_be_bytes());
        Ok(())
    }

    /// Unpacks a question starting at `at`, returning it along with the
    /// number of octets it occupied.
    pub fn unpack(dec: &Decompressor, at: usize) -> Result<(Question, usize), ParseError> {
        let (name, name_len) = dec.unpack_name(at)?;
        let msg = dec.message();
        let rr_type = get_u16(msg, at + name_len).ok_or(ParseError::ResourceLen)?;
        let class = get_u16(msg, at + name_len + 2).ok_or(ParseError::ResourceLen)?;
        Ok((
            Question {
                name,
                rr_type: rr_type.into(),
                class: class.into(),
            },
            name_len + 4,
        ))
    }
}
