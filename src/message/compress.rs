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

//! DNS name compression: the [`Compressor`] used while packing and the
//! [`Decompressor`] used while unpacking.

use std::collections::HashMap;

use super::error::{PackError, ParseError};
use crate::name::{self, Name, MAX_WIRE_LEN};

/// The largest message offset a 14-bit compression pointer can target.
const MAX_POINTER_OFFSET: usize = 0x3fff;

/// How many compression pointers the decoder will follow for one name.
/// Pointers must point strictly backward, so a conforming message never
/// comes close; the bound makes decoding of hostile input terminate.
const POINTER_HOP_LIMIT: usize = 127;

////////////////////////////////////////////////////////////////////////
// COMPRESSOR                                                         //
////////////////////////////////////////////////////////////////////////

/// Tracks name suffixes already emitted into a message being packed,
/// keyed on their presentation form, so later occurrences can be
/// replaced by 2-octet pointers (the `11` prefix of [RFC 1035
/// § 4.1.4]).
///
/// A non-compressing `Compressor` packs every name as literal labels
/// and records nothing.
///
/// [RFC 1035 § 4.1.4]: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.4
pub struct Compressor {
    tbl: Option<HashMap<String, u16>>,
}

impl Compressor {
    /// Creates a new `Compressor`. If `compress` is false, the
    /// compressor packs literal labels only.
    pub fn new(compress: bool) -> Self {
        Self {
            tbl: compress.then(HashMap::new),
        }
    }

    /// Packs `name` at the end of `buf`, emitting a pointer for the
    /// longest known suffix and recording the suffixes newly emitted.
    pub fn pack_name(&mut self, buf: &mut Vec<u8>, name: &Name) -> Result<(), PackError> {
        if name.wire_len() > MAX_WIRE_LEN {
            return Err(PackError::InvalidFqdn);
        }
        for (start, label) in name.label_spans() {
            let suffix = &name.as_str()[start..];
            if let Some(&offset) = self.tbl.as_ref().and_then(|tbl| tbl.get(suffix)) {
                buf.extend_from_slice(&(0xc000 | offset).to_be_bytes());
                return Ok(());
            }
            if let Some(tbl) = self.tbl.as_mut() {
                if buf.len() <= MAX_POINTER_OFFSET {
                    tbl.insert(suffix.to_owned(), buf.len() as u16);
                }
            }
            buf.push(label.len() as u8);
            buf.extend_from_slice(&label);
        }
        buf.push(0);
        Ok(())
    }

    /// Returns the number of octets that packing `names`, in order,
    /// would append to a message whose length is currently `at`. The
    /// compressor itself is not modified: suffixes that packing would
    /// record are simulated with a local overlay, so a multi-name
    /// RDATA (SOA) is measured exactly.
    pub fn names_len(&self, at: usize, names: &[&Name]) -> usize {
        let mut overlay: Vec<String> = Vec::new();
        let mut cursor = at;
        for name in names {
            'name: {
                for (start, label) in name.label_spans() {
                    let suffix = &name.as_str()[start..];
                    let known = self
                        .tbl
                        .as_ref()
                        .map_or(false, |tbl| tbl.contains_key(suffix))
                        || overlay.iter().any(|s| s.as_str() == suffix);
                    if known {
                        cursor += 2;
                        break 'name;
                    }
                    if self.tbl.is_some() && cursor <= MAX_POINTER_OFFSET {
                        overlay.push(suffix.to_owned());
                    }
                    cursor += 1 + label.len();
                }
                cursor += 1; // terminating null label
            }
        }
        cursor - at
    }
}

/// Packs `name` as literal labels, bypassing compression entirely.
/// SRV targets are packed this way per RFC 2782.
pub fn pack_name_literal(buf: &mut Vec<u8>, name: &Name) -> Result<(), PackError> {
    if name.wire_len() > MAX_WIRE_LEN {
        return Err(PackError::InvalidFqdn);
    }
    for label in name.labels() {
        buf.push(label.len() as u8);
        buf.extend_from_slice(&label);
    }
    buf.push(0);
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// DECOMPRESSOR                                                       //
////////////////////////////////////////////////////////////////////////

/// A view over a whole received message that resolves compression
/// pointers while decoding names.
pub struct Decompressor<'a> {
    msg: &'a [u8],
}

impl<'a> Decompressor<'a> {
    /// Creates a `Decompressor` over the full message buffer. Pointer
    /// targets are interpreted as offsets into this buffer.
    pub fn new(msg: &'a [u8]) -> Self {
        Self { msg }
    }

    /// Returns the underlying message buffer.
    pub fn message(&self) -> &'a [u8] {
        self.msg
    }

    /// Decodes the name starting at `start`, following pointers.
    ///
    /// On success, returns the name and the number of contiguous octets
    /// it occupies at `start` (for a name that begins with a pointer,
    /// that is 2).
    pub fn unpack_name(&self, start: usize) -> Result<(Name, usize), ParseError> {
        self.unpack_at(start, true)
    }

    /// Like [`Decompressor::unpack_name`], but rejects pointers with
    /// [`ParseError::InvalidPointer`]. SRV targets are decoded this
    /// way per RFC 2782.
    pub fn unpack_name_uncompressed(&self, start: usize) -> Result<(Name, usize), ParseError> {
        self.unpack_at(start, false)
    }

    fn unpack_at(
        &self,
        start: usize,
        allow_pointers: bool,
    ) -> Result<(Name, usize), ParseError> {
        let mut cursor = start;
        let mut consumed = None;
        let mut hops = 0;
        let mut text = String::new();
        let mut wire_len = 1usize;
        loop {
            let len = *self.msg.get(cursor).ok_or(ParseError::BaseLen)?;
            match len & 0xc0 {
                0x00 => {
                    if len == 0 {
                        let used = consumed.unwrap_or_else(|| cursor + 1 - start);
                        if text.is_empty() {
                            text.push('.');
                        }
                        return Ok((Name::from_validated(text, wire_len as u16), used));
                    }
                    let end = cursor + 1 + len as usize;
                    let label = self.msg.get(cursor + 1..end).ok_or(ParseError::CalcLen)?;
                    wire_len += 1 + len as usize;
                    if wire_len > MAX_WIRE_LEN {
                        return Err(ParseError::InvalidFqdn);
                    }
                    for &octet in label {
                        name::push_escaped(&mut text, octet);
                    }
                    text.push('.');
                    cursor = end;
                }
                0xc0 => {
                    if !allow_pointers {
                        return Err(ParseError::InvalidPointer);
                    }
                    let lo = *self.msg.get(cursor + 1).ok_or(ParseError::BaseLen)?;
                    let target = ((len as usize & 0x3f) << 8) | lo as usize;
                    if target >= cursor {
                        return Err(ParseError::InvalidPointer);
                    }
                    if consumed.is_none() {
                        consumed = Some(cursor + 2 - start);
                    }
                    hops += 1;
                    if hops > POINTER_HOP_LIMIT {
                        return Err(ParseError::PointerCycle);
                    }
                    cursor = target;
                }
                _ => return Err(ParseError::ReservedSegPrefix),
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    #[test]
    fn pack_name_emits_labels() {
        let mut com = Compressor::new(true);
        let mut buf = Vec::new();
        com.pack_name(&mut buf, &name("example.com.")).unwrap();
        assert_eq!(buf, b"\x07example\x03com\x00");
    }

    #[test]
    fn pack_name_compresses_repeats() {
        let mut com = Compressor::new(true);
        let mut buf = vec![0; 12]; // stand-in for a header
        com.pack_name(&mut buf, &name("example.com.")).unwrap();
        let first_end = buf.len();
        com.pack_name(&mut buf, &name("www.example.com.")).unwrap();
        // "www" as a literal label, then a pointer to offset 12.
        assert_eq!(&buf[first_end..], b"\x03www\xc0\x0c");
    }

    #[test]
    fn pack_name_shares_suffixes() {
        let mut com = Compressor::new(true);
        let mut buf = Vec::new();
        com.pack_name(&mut buf, &name("a.example.com.")).unwrap();
        let first_end = buf.len();
        com.pack_name(&mut buf, &name("b.example.com.")).unwrap();
        // "b" literal, then a pointer to "example.com." at offset 2.
        assert_eq!(&buf[first_end..], b"\x01b\xc0\x02");
    }

    #[test]
    fn non_compressing_packs_literals() {
        let mut com = Compressor::new(false);
        let mut buf = Vec::new();
        com.pack_name(&mut buf, &name("example.com.")).unwrap();
        com.pack_name(&mut buf, &name("example.com.")).unwrap();
        assert_eq!(buf, b"\x07example\x03com\x00\x07example\x03com\x00");
    }

    #[test]
    fn names_len_matches_pack_for_shared_suffixes() {
        let mut com = Compressor::new(true);
        let mut buf = vec![0; 12];
        com.pack_name(&mut buf, &name("ns.example.com.")).unwrap();

        // A SOA-style pair: the second name can point into the first,
        // even though the first is only recorded during this
        // hypothetical packing.
        let ns = name("ns1.zone.example.com.");
        let mbox = name("hostmaster.zone.example.com.");
        let predicted = com.names_len(buf.len(), &[&ns, &mbox]);

        let mut check = Compressor::new(true);
        let mut check_buf = vec![0; 12];
        check.pack_name(&mut check_buf, &name("ns.example.com.")).unwrap();
        let before = check_buf.len();
        check.pack_name(&mut check_buf, &ns).unwrap();
        check.pack_name(&mut check_buf, &mbox).unwrap();
        assert_eq!(predicted, check_buf.len() - before);
    }

    #[test]
    fn unpack_name_follows_pointers() {
        let msg = b"\x07example\x03com\x00\x03www\xc0\x00";
        let dec = Decompressor::new(msg);
        let (first, used) = dec.unpack_name(0).unwrap();
        assert_eq!(first.as_str(), "example.com.");
        assert_eq!(used, 13);
        let (second, used) = dec.unpack_name(13).unwrap();
        assert_eq!(second.as_str(), "www.example.com.");
        assert_eq!(used, 6);
    }

    #[test]
    fn unpack_name_decodes_root() {
        let dec = Decompressor::new(b"\x00");
        let (root, used) = dec.unpack_name(0).unwrap();
        assert!(root.is_root());
        assert_eq!(used, 1);
    }

    #[test]
    fn unpack_name_rejects_forward_pointer() {
        // The pointer at offset 0 targets offset 2, ahead of itself.
        let dec = Decompressor::new(b"\xc0\x02\x00");
        assert_eq!(dec.unpack_name(0), Err(ParseError::InvalidPointer));
    }

    #[test]
    fn unpack_name_rejects_self_pointer() {
        let dec = Decompressor::new(b"\x01a\xc0\x02");
        assert_eq!(dec.unpack_name(2), Err(ParseError::InvalidPointer));
    }

    #[test]
    fn unpack_name_rejects_reserved_prefix() {
        let dec = Decompressor::new(b"\x41a\x00");
        assert_eq!(dec.unpack_name(0), Err(ParseError::ReservedSegPrefix));
    }

    #[test]
    fn unpack_name_rejects_truncated_label() {
        let dec = Decompressor::new(b"\x07exam");
        assert_eq!(dec.unpack_name(0), Err(ParseError::CalcLen));
    }

    #[test]
    fn unpack_name_bounds_pointer_hops() {
        // A long backward chain of pointers; each hop is legal on its
        // own, but the chain exceeds the hop limit.
        let mut msg = vec![0u8];
        for i in 0..(POINTER_HOP_LIMIT + 2) {
            let target = if i == 0 { 0 } else { 1 + 2 * (i - 1) };
            msg.push(0xc0 | (target >> 8) as u8);
            msg.push(target as u8);
        }
        let start = msg.len() - 2;
        let dec = Decompressor::new(&msg);
        assert_eq!(dec.unpack_name(start), Err(ParseError::PointerCycle));
    }

    #[test]
    fn unpack_name_caps_total_length() {
        // Four 63-octet labels plus the null label exceed 255 octets.
        let mut msg = Vec::new();
        for _ in 0..4 {
            msg.push(63);
            msg.extend_from_slice(&[b'x'; 63]);
        }
        msg.push(0);
        let dec = Decompressor::new(&msg);
        assert_eq!(dec.unpack_name(0), Err(ParseError::InvalidFqdn));
    }

    #[test]
    fn unpack_name_uncompressed_rejects_pointers() {
        let msg = b"\x07example\x03com\x00\xc0\x00";
        let dec = Decompressor::new(msg);
        assert_eq!(
            dec.unpack_name_uncompressed(13),
            Err(ParseError::InvalidPointer)
        );
    }

    #[test]
    fn unpack_name_escapes_special_octets() {
        let msg = b"\x04a.b\xff\x00";
        let dec = Decompressor::new(msg);
        let (decoded, _) = dec.unpack_name(0).unwrap();
        assert_eq!(decoded.as_str(), "a\\.b\\255.");
    }
}
