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

//! Implementation of the [`Record`] type and per-type RDATA processing.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use super::compress::{pack_name_literal, Compressor, Decompressor};
use super::error::{PackError, ParseError};
use super::{get_u16, get_u32};
use super::Type;
use crate::name::Name;

////////////////////////////////////////////////////////////////////////
// RECORD TYPE                                                        //
////////////////////////////////////////////////////////////////////////

/// The typed payload of a resource record.
///
/// Records are plain values: cloning one is cheap enough for the zone
/// and cache layers, and thread safety is the business of whatever owns
/// them. Each variant knows its wire type, how long its RDATA will be
/// against a given compression state, and how to pack and unpack
/// itself.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Record {
    /// An IPv4 host address.
    A(Ipv4Addr),

    /// An IPv6 host address.
    Aaaa(Ipv6Addr),

    /// An authoritative name server.
    Ns(Name),

    /// The canonical name for an alias.
    Cname(Name),

    /// A domain name pointer.
    Ptr(Name),

    /// Delegation of an entire subtree (RFC 6672).
    Dname(Name),

    /// The start of a zone of authority.
    Soa(Soa),

    /// A mail exchange.
    Mx { preference: u16, exchange: Name },

    /// Free-form text: an ordered sequence of character-strings.
    Txt(Vec<Vec<u8>>),

    /// Server selection (RFC 2782). The target is never compressed.
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: Name,
    },

    /// The EDNS(0) pseudo-record, preserved as an opaque option list.
    Opt(Vec<EdnsOption>),

    /// Certification authority authorization (RFC 6844).
    Caa {
        issuer_critical: bool,
        tag: Vec<u8>,
        value: Vec<u8>,
    },
}

/// The RDATA of a SOA record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Soa {
    pub ns: Name,
    pub mbox: Name,
    pub serial: u32,
    pub refresh: Duration,
    pub retry: Duration,
    pub expire: Duration,
    pub min_ttl: Duration,
}

/// A single EDNS(0) option: an opaque code and payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EdnsOption {
    pub code: u16,
    pub data: Vec<u8>,
}

impl Record {
    /// Returns the wire type of the record.
    pub fn rr_type(&self) -> Type {
        match self {
            Self::A(_) => Type::A,
            Self::Aaaa(_) => Type::AAAA,
            Self::Ns(_) => Type::NS,
            Self::Cname(_) => Type::CNAME,
            Self::Ptr(_) => Type::PTR,
            Self::Dname(_) => Type::DNAME,
            Self::Soa(_) => Type::SOA,
            Self::Mx { .. } => Type::MX,
            Self::Txt(_) => Type::TXT,
            Self::Srv { .. } => Type::SRV,
            Self::Opt(_) => Type::OPT,
            Self::Caa { .. } => Type::CAA,
        }
    }

    /// Returns the number of octets the record's RDATA will occupy when
    /// packed into a message of current length `at` with the given
    /// compression state. The compressor is consulted but not
    /// modified.
    pub fn rdata_len(&self, com: &Compressor, at: usize) -> usize {
        match self {
            Self::A(_) => 4,
            Self::Aaaa(_) => 16,
            Self::Ns(name) | Self::Cname(name) | Self::Ptr(name) | Self::Dname(name) => {
                com.names_len(at, &[name])
            }
            Self::Soa(soa) => com.names_len(at, &[&soa.ns, &soa.mbox]) + 20,
            Self::Mx { exchange, .. } => 2 + com.names_len(at + 2, &[exchange]),
            Self::Txt(strings) => strings.iter().map(|s| 1 + s.len()).sum(),
            Self::Srv { target, .. } => 6 + target.wire_len(),
            Self::Opt(options) => options.iter().map(|o| 4 + o.data.len()).sum(),
            Self::Caa { tag, value, .. } => 2 + tag.len() + value.len(),
        }
    }

    /// Packs the record's RDATA at the end of `buf`.
    pub fn pack_rdata(&self, buf: &mut Vec<u8>, com: &mut Compressor) -> Result<(), PackError> {
        match self {
            Self::A(addr) => buf.extend_from_slice(&addr.octets()),
            Self::Aaaa(addr) => buf.extend_from_slice(&addr.octets()),
            Self::Ns(name) | Self::Cname(name) | Self::Ptr(name) | Self::Dname(name) => {
                com.pack_name(buf, name)?;
            }
            Self::Soa(soa) => soa.pack(buf, com)?,
            Self::Mx {
                preference,
                exchange,
            } => {
                buf.extend_from_slice(&preference.to_be_bytes());
                com.pack_name(buf, exchange)?;
            }
            Self::Txt(strings) => {
                for s in strings {
                    if s.len() > 255 {
                        return Err(PackError::SegTooLong);
                    }
                    buf.push(s.len() as u8);
                    buf.extend_from_slice(s);
                }
            }
            Self::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                buf.extend_from_slice(&priority.to_be_bytes());
                buf.extend_from_slice(&weight.to_be_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
                pack_name_literal(buf, target)?;
            }
            Self::Opt(options) => {
                for option in options {
                    if option.data.len() > u16::MAX as usize {
                        return Err(PackError::FieldOverflow);
                    }
                    buf.extend_from_slice(&option.code.to_be_bytes());
                    buf.extend_from_slice(&(option.data.len() as u16).to_be_bytes());
                    buf.extend_from_slice(&option.data);
                }
            }
            Self::Caa {
                issuer_critical,
                tag,
                value,
            } => {
                if tag.is_empty() {
                    return Err(PackError::ZeroSegLen);
                }
                if tag.len() > 255 {
                    return Err(PackError::SegTooLong);
                }
                buf.push(u8::from(*issuer_critical));
                buf.push(tag.len() as u8);
                buf.extend_from_slice(tag);
                buf.extend_from_slice(value);
            }
        }
        Ok(())
    }

    /// Unpacks the RDATA of a record of type `rr_type` from the
    /// RDLENGTH window starting at `at`.
    ///
    /// Fails with [`ParseError::UnknownType`] if `rr_type` has no
    /// constructor and with [`ParseError::ResTooLong`] if the record
    /// did not consume its whole window.
    pub fn unpack(
        rr_type: Type,
        dec: &Decompressor,
        at: usize,
        rdlen: usize,
    ) -> Result<Record, ParseError> {
        let window = dec
            .message()
            .get(at..at + rdlen)
            .ok_or(ParseError::ResourceLen)?;
        let (record, used) = match rr_type {
            Type::A => {
                let octets: [u8; 4] =
                    window.get(0..4).ok_or(ParseError::ResourceLen)?.try_into().unwrap();
                (Self::A(octets.into()), 4)
            }
            Type::AAAA => {
                let octets: [u8; 16] =
                    window.get(0..16).ok_or(ParseError::ResourceLen)?.try_into().unwrap();
                (Self::Aaaa(octets.into()), 16)
            }
            Type::NS => {
                let (name, used) = unpack_windowed_name(dec, at, rdlen)?;
                (Self::Ns(name), used)
            }
            Type::CNAME => {
                let (name, used) = unpack_windowed_name(dec, at, rdlen)?;
                (Self::Cname(name), used)
            }
            Type::PTR => {
                let (name, used) = unpack_windowed_name(dec, at, rdlen)?;
                (Self::Ptr(name), used)
            }
            Type::DNAME => {
                let (name, used) = unpack_windowed_name(dec, at, rdlen)?;
                (Self::Dname(name), used)
            }
            Type::SOA => {
                let (soa, used) = Soa::unpack(dec, at)?;
                (Self::Soa(soa), used)
            }
            Type::MX => {
                let preference = get_u16(window, 0).ok_or(ParseError::ResourceLen)?;
                let (exchange, used) = dec.unpack_name(at + 2)?;
                (
                    Self::Mx {
                        preference,
                        exchange,
                    },
                    2 + used,
                )
            }
            Type::TXT => {
                let mut strings = Vec::new();
                let mut i = 0;
                while i < window.len() {
                    let len = window[i] as usize;
                    let string = window
                        .get(i + 1..i + 1 + len)
                        .ok_or(ParseError::ResourceLen)?;
                    strings.push(string.to_vec());
                    i += 1 + len;
                }
                (Self::Txt(strings), window.len())
            }
            Type::SRV => {
                let priority = get_u16(window, 0).ok_or(ParseError::ResourceLen)?;
                let weight = get_u16(window, 2).ok_or(ParseError::ResourceLen)?;
                let port = get_u16(window, 4).ok_or(ParseError::ResourceLen)?;
                let (target, used) = dec.unpack_name_uncompressed(at + 6)?;
                (
                    Self::Srv {
                        priority,
                        weight,
                        port,
                        target,
                    },
                    6 + used,
                )
            }
            Type::OPT => {
                let mut options = Vec::new();
                let mut i = 0;
                while i < window.len() {
                    let code = get_u16(window, i).ok_or(ParseError::ResourceLen)?;
                    let len = get_u16(window, i + 2).ok_or(ParseError::ResourceLen)? as usize;
                    let data = window
                        .get(i + 4..i + 4 + len)
                        .ok_or(ParseError::ResourceLen)?;
                    options.push(EdnsOption {
                        code,
                        data: data.to_vec(),
                    });
                    i += 4 + len;
                }
                (Self::Opt(options), window.len())
            }
            Type::CAA => {
                let flags = *window.first().ok_or(ParseError::ResourceLen)?;
                let tag_len = *window.get(1).ok_or(ParseError::ResourceLen)? as usize;
                if tag_len == 0 {
                    return Err(ParseError::ZeroSegLen);
                }
                let tag = window
                    .get(2..2 + tag_len)
                    .ok_or(ParseError::ResourceLen)?;
                (
                    Self::Caa {
                        issuer_critical: flags & 0x01 != 0,
                        tag: tag.to_vec(),
                        value: window[2 + tag_len..].to_vec(),
                    },
                    window.len(),
                )
            }
            _ => return Err(ParseError::UnknownType),
        };
        if used < rdlen {
            return Err(ParseError::ResTooLong);
        } else if used > rdlen {
            return Err(ParseError::ResourceLen);
        }
        Ok(record)
    }

    /// Determines whether `other` carries the same data as `self` for
    /// the purposes of record deletion in a zone. Each type compares
    /// by its identifying fields: an address for A/AAAA, the embedded
    /// name for NS/CNAME/PTR/DNAME/MX/SRV, the serial for SOA, and the
    /// full payload otherwise.
    pub fn same_data(&self, other: &Record) -> bool {
        match (self, other) {
            (Self::A(a), Self::A(b)) => a == b,
            (Self::Aaaa(a), Self::Aaaa(b)) => a == b,
            (Self::Ns(a), Self::Ns(b))
            | (Self::Cname(a), Self::Cname(b))
            | (Self::Ptr(a), Self::Ptr(b))
            | (Self::Dname(a), Self::Dname(b)) => a == b,
            (Self::Soa(a), Self::Soa(b)) => a.serial == b.serial,
            (Self::Mx { exchange: a, .. }, Self::Mx { exchange: b, .. }) => a == b,
            (Self::Txt(a), Self::Txt(b)) => a == b,
            (Self::Srv { target: a, .. }, Self::Srv { target: b, .. }) => a == b,
            (Self::Opt(a), Self::Opt(b)) => a == b,
            (
                Self::Caa {
                    tag: tag_a,
                    value: value_a,
                    ..
                },
                Self::Caa {
                    tag: tag_b,
                    value: value_b,
                    ..
                },
            ) => tag_a == tag_b && value_a == value_b,
            _ => false,
        }
    }
}

/// Decodes a lone compressed name that must fill the RDLENGTH window.
fn unpack_windowed_name(
    dec: &Decompressor,
    at: usize,
    rdlen: usize,
) -> Result<(Name, usize), ParseError> {
    let (name, used) = dec.unpack_name(at)?;
    if used > rdlen {
        return Err(ParseError::ResourceLen);
    }
    Ok((name, used))
}

impl Soa {
    fn pack(&self, buf: &mut Vec<u8>, com: &mut Compressor) -> Result<(), PackError> {
        com.pack_name(buf, &self.ns)?;
        com.pack_name(buf, &self.mbox)?;
        buf.extend_from_slice(&self.serial.to_be_bytes());
        for timer in [self.refresh, self.retry, self.expire] {
            buf.extend_from_slice(&duration_as_i32_seconds(timer)?.to_be_bytes());
        }
        let minimum = self.min_ttl.as_secs();
        if minimum > u32::MAX as u64 {
            return Err(PackError::FieldOverflow);
        }
        buf.extend_from_slice(&(minimum as u32).to_be_bytes());
        Ok(())
    }

    fn unpack(dec: &Decompressor, at: usize) -> Result<(Soa, usize), ParseError> {
        let (ns, ns_len) = dec.unpack_name(at)?;
        let (mbox, mbox_len) = dec.unpack_name(at + ns_len)?;
        let msg = dec.message();
        let fixed = at + ns_len + mbox_len;
        let serial = get_u32(msg, fixed).ok_or(ParseError::ResourceLen)?;
        let refresh = get_u32(msg, fixed + 4).ok_or(ParseError::ResourceLen)?;
        let retry = get_u32(msg, fixed + 8).ok_or(ParseError::ResourceLen)?;
        let expire = get_u32(msg, fixed + 12).ok_or(ParseError::ResourceLen)?;
        let minimum = get_u32(msg, fixed + 16).ok_or(ParseError::ResourceLen)?;
        Ok((
            Soa {
                ns,
                mbox,
                serial,
                refresh: Duration::from_secs(refresh as u64),
                retry: Duration::from_secs(retry as u64),
                expire: Duration::from_secs(expire as u64),
                min_ttl: Duration::from_secs(minimum as u64),
            },
            ns_len + mbox_len + 20,
        ))
    }
}

/// Converts a duration to whole seconds that fit the signed 32-bit
/// timer fields of a SOA record.
fn duration_as_i32_seconds(duration: Duration) -> Result<u32, PackError> {
    let seconds = duration.as_secs();
    if seconds > i32::MAX as u64 {
        Err(PackError::FieldOverflow)
    } else {
        Ok(seconds as u32)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(record: Record) -> Record {
        let mut com = Compressor::new(false);
        let mut buf = Vec::new();
        let predicted = record.rdata_len(&com, 0);
        record.pack_rdata(&mut buf, &mut com).unwrap();
        assert_eq!(predicted, buf.len());
        let dec = Decompressor::new(&buf);
        Record::unpack(record.rr_type(), &dec, 0, buf.len()).unwrap()
    }

    #[test]
    fn address_records_round_trip() {
        let a = Record::A("10.42.0.1".parse().unwrap());
        let aaaa = Record::Aaaa("dead:beef::1".parse().unwrap());
        assert_eq!(round_trip(a.clone()), a);
        assert_eq!(round_trip(aaaa.clone()), aaaa);
    }

    #[test]
    fn soa_round_trips() {
        let soa = Record::Soa(Soa {
            ns: "dns.tld.".parse().unwrap(),
            mbox: "hostmaster.tld.".parse().unwrap(),
            serial: 1234,
            refresh: Duration::from_secs(3600),
            retry: Duration::from_secs(600),
            expire: Duration::from_secs(86400),
            min_ttl: Duration::from_secs(60),
        });
        assert_eq!(round_trip(soa.clone()), soa);
    }

    #[test]
    fn soa_rejects_oversized_timer() {
        let soa = Record::Soa(Soa {
            ns: "dns.tld.".parse().unwrap(),
            mbox: "hostmaster.tld.".parse().unwrap(),
            serial: 1,
            refresh: Duration::from_secs(i32::MAX as u64 + 1),
            retry: Duration::ZERO,
            expire: Duration::ZERO,
            min_ttl: Duration::ZERO,
        });
        let mut buf = Vec::new();
        assert_eq!(
            soa.pack_rdata(&mut buf, &mut Compressor::new(false)),
            Err(PackError::FieldOverflow)
        );
    }

    #[test]
    fn txt_round_trips() {
        let txt = Record::Txt(vec![b"hello".to_vec(), b"world".to_vec()]);
        assert_eq!(round_trip(txt.clone()), txt);
    }

    #[test]
    fn txt_rejects_long_segment() {
        let txt = Record::Txt(vec![vec![b'x'; 256]]);
        let mut buf = Vec::new();
        assert_eq!(
            txt.pack_rdata(&mut buf, &mut Compressor::new(false)),
            Err(PackError::SegTooLong)
        );
    }

    #[test]
    fn srv_round_trips_and_rejects_compressed_target() {
        let srv = Record::Srv {
            priority: 10,
            weight: 20,
            port: 443,
            target: "sip.example.com.".parse().unwrap(),
        };
        assert_eq!(round_trip(srv.clone()), srv);

        // A compressed target must be refused per RFC 2782.
        let msg = b"\x03sip\x00\x00\x0a\x00\x14\x01\xbb\xc0\x00";
        let dec = Decompressor::new(msg);
        assert_eq!(
            Record::unpack(Type::SRV, &dec, 5, 8),
            Err(ParseError::InvalidPointer)
        );
    }

    #[test]
    fn opt_round_trips() {
        let opt = Record::Opt(vec![
            EdnsOption {
                code: 10,
                data: vec![1, 2, 3, 4],
            },
            EdnsOption {
                code: 11,
                data: vec![],
            },
        ]);
        assert_eq!(round_trip(opt.clone()), opt);
    }

    #[test]
    fn caa_round_trips() {
        let caa = Record::Caa {
            issuer_critical: true,
            tag: b"issue".to_vec(),
            value: b"ca.example.net".to_vec(),
        };
        assert_eq!(round_trip(caa.clone()), caa);
    }

    #[test]
    fn caa_rejects_empty_tag() {
        let caa = Record::Caa {
            issuer_critical: false,
            tag: Vec::new(),
            value: Vec::new(),
        };
        let mut buf = Vec::new();
        assert_eq!(
            caa.pack_rdata(&mut buf, &mut Compressor::new(false)),
            Err(PackError::ZeroSegLen)
        );
        assert_eq!(
            Record::unpack(Type::CAA, &Decompressor::new(b"\x00\x00"), 0, 2),
            Err(ParseError::ZeroSegLen)
        );
    }

    #[test]
    fn unpack_rejects_unknown_type() {
        let dec = Decompressor::new(b"\x00\x00\x00\x00");
        assert_eq!(
            Record::unpack(Type::from(0xff00), &dec, 0, 4),
            Err(ParseError::UnknownType)
        );
    }

    #[test]
    fn unpack_rejects_oversized_window() {
        // Five octets of RDATA for a four-octet A record.
        let dec = Decompressor::new(b"\x0a\x2a\x00\x01\x00");
        assert_eq!(
            Record::unpack(Type::A, &dec, 0, 5),
            Err(ParseError::ResTooLong)
        );
    }

    #[test]
    fn same_data_compares_identity_fields() {
        let mx_a = Record::Mx {
            preference: 10,
            exchange: "mail.tld.".parse().unwrap(),
        };
        let mx_b = Record::Mx {
            preference: 20,
            exchange: "mail.tld.".parse().unwrap(),
        };
        let mx_c = Record::Mx {
            preference: 10,
            exchange: "backup.tld.".parse().unwrap(),
        };
        assert!(mx_a.same_data(&mx_b));
        assert!(!mx_a.same_data(&mx_c));

        let a = Record::A("127.0.0.1".parse().unwrap());
        assert!(!mx_a.same_data(&a));
    }
}
