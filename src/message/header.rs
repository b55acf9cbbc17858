// Copyright 2022 Matthew Ingwersen.
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

//! DNS message header fields: the [`Opcode`] and [`Rcode`] types, the
//! decoded [`Header`], and bit-level accessors shared by the
//! [`Reader`](super::Reader) and [`Writer`](super::Writer).

use std::fmt;

use super::constants::*;

////////////////////////////////////////////////////////////////////////
// OPCODES                                                            //
////////////////////////////////////////////////////////////////////////

/// The OPCODE of a DNS message, a 4-bit value.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Opcode {
    Query,
    IQuery,
    Status,
    Notify,
    Update,
    Dso,
    Unassigned(u8),
}

impl From<u8> for Opcode {
    /// Converts the low four bits of `raw` into an `Opcode`.
    fn from(raw: u8) -> Self {
        match raw & 0x0f {
            0 => Self::Query,
            1 => Self::IQuery,
            2 => Self::Status,
            4 => Self::Notify,
            5 => Self::Update,
            6 => Self::Dso,
            other => Self::Unassigned(other),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Query => 0,
            Opcode::IQuery => 1,
            Opcode::Status => 2,
            Opcode::Notify => 4,
            Opcode::Update => 5,
            Opcode::Dso => 6,
            Opcode::Unassigned(raw) => raw & 0x0f,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// RCODES                                                             //
////////////////////////////////////////////////////////////////////////

/// The RCODE of a DNS message, the 4-bit value carried in the header.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Rcode {
    NoError,
    FormErr,
    ServFail,
    NxDomain,
    NotImp,
    Refused,
    YxDomain,
    YxRrset,
    NxRrset,
    NotAuth,
    NotZone,
    Unassigned(u8),
}

impl From<u8> for Rcode {
    /// Converts the low four bits of `raw` into an `Rcode`.
    fn from(raw: u8) -> Self {
        match raw & 0x0f {
            0 => Self::NoError,
            1 => Self::FormErr,
            2 => Self::ServFail,
            3 => Self::NxDomain,
            4 => Self::NotImp,
            5 => Self::Refused,
            6 => Self::YxDomain,
            7 => Self::YxRrset,
            8 => Self::NxRrset,
            9 => Self::NotAuth,
            10 => Self::NotZone,
            other => Self::Unassigned(other),
        }
    }
}

impl From<Rcode> for u8 {
    fn from(rcode: Rcode) -> Self {
        match rcode {
            Rcode::NoError => 0,
            Rcode::FormErr => 1,
            Rcode::ServFail => 2,
            Rcode::NxDomain => 3,
            Rcode::NotImp => 4,
            Rcode::Refused => 5,
            Rcode::YxDomain => 6,
            Rcode::YxRrset => 7,
            Rcode::NxRrset => 8,
            Rcode::NotAuth => 9,
            Rcode::NotZone => 10,
            Rcode::Unassigned(raw) => raw & 0x0f,
        }
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoError => f.write_str("NOERROR"),
            Self::FormErr => f.write_str("FORMERR"),
            Self::ServFail => f.write_str("SERVFAIL"),
            Self::NxDomain => f.write_str("NXDOMAIN"),
            Self::NotImp => f.write_str("NOTIMP"),
            Self::Refused => f.write_str("REFUSED"),
            Self::YxDomain => f.write_str("YXDOMAIN"),
            Self::YxRrset => f.write_str("YXRRSET"),
            Self::NxRrset => f.write_str("NXRRSET"),
            Self::NotAuth => f.write_str("NOTAUTH"),
            Self::NotZone => f.write_str("NOTZONE"),
            Self::Unassigned(raw) => write!(f, "RCODE{raw}"),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// DECODED HEADERS                                                    //
////////////////////////////////////////////////////////////////////////

/// All fields of a DNS message header, decoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    pub id: u16,
    pub qr: bool,
    pub opcode: Opcode,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: bool,
    pub ad: bool,
    pub cd: bool,
    pub rcode: Rcode,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    /// Decodes the header at the start of `octets`, which must be at
    /// least [`HEADER_SIZE`] octets long.
    pub(super) fn decode(octets: &[u8]) -> Self {
        Self {
            id: get_u16(octets, ID_START),
            qr: get_flag(octets, QR_BYTE, QR_MASK),
            opcode: Opcode::from((octets[OPCODE_BYTE] & OPCODE_MASK) >> OPCODE_SHIFT),
            aa: get_flag(octets, AA_BYTE, AA_MASK),
            tc: get_flag(octets, TC_BYTE, TC_MASK),
            rd: get_flag(octets, RD_BYTE, RD_MASK),
            ra: get_flag(octets, RA_BYTE, RA_MASK),
            z: get_flag(octets, Z_BYTE, Z_MASK),
            ad: get_flag(octets, AD_BYTE, AD_MASK),
            cd: get_flag(octets, CD_BYTE, CD_MASK),
            rcode: Rcode::from(octets[RCODE_BYTE] & RCODE_MASK),
            qdcount: get_u16(octets, QDCOUNT_START),
            ancount: get_u16(octets, ANCOUNT_START),
            nscount: get_u16(octets, NSCOUNT_START),
            arcount: get_u16(octets, ARCOUNT_START),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// BIT-LEVEL ACCESSORS                                                //
////////////////////////////////////////////////////////////////////////

pub(super) fn get_flag(octets: &[u8], byte: usize, mask: u8) -> bool {
    octets[byte] & mask != 0
}

/// Sets or clears the bits of `mask` in `octets[byte]`, leaving every
/// other bit untouched.
pub(super) fn set_flag(octets: &mut [u8], byte: usize, mask: u8, value: bool) {
    if value {
        octets[byte] |= mask;
    } else {
        octets[byte] &= !mask;
    }
}

/// Replaces the bits of `mask` in `octets[byte]` with `value << shift`.
pub(super) fn set_field(octets: &mut [u8], byte: usize, mask: u8, shift: usize, value: u8) {
    octets[byte] = (octets[byte] & !mask) | ((value << shift) & mask);
}

pub(super) fn get_u16(octets: &[u8], start: usize) -> u16 {
    u16::from_be_bytes([octets[start], octets[start + 1]])
}

pub(super) fn set_u16(octets: &mut [u8], start: usize, value: u16) {
    octets[start..start + 2].copy_from_slice(&value.to_be_bytes());
}

/// Overwrites the transaction ID of the message in `octets`.
pub fn patch_id(octets: &mut [u8], id: u16) {
    set_u16(octets, ID_START, id);
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_flag_only_touches_its_bit() {
        let mut octets = [0xff; HEADER_SIZE];
        set_flag(&mut octets, AA_BYTE, AA_MASK, false);
        assert_eq!(octets[AA_BYTE], 0xfb);
        set_flag(&mut octets, AA_BYTE, AA_MASK, true);
        assert_eq!(octets[AA_BYTE], 0xff);

        let mut octets = [0x00; HEADER_SIZE];
        set_flag(&mut octets, CD_BYTE, CD_MASK, true);
        assert_eq!(octets[CD_BYTE], 0x10);
        assert_eq!(octets[RD_BYTE], 0x00);
    }

    #[test]
    fn set_field_only_touches_its_bits() {
        let mut octets = [0xff; HEADER_SIZE];
        set_field(&mut octets, RCODE_BYTE, RCODE_MASK, 0, Rcode::Refused.into());
        assert_eq!(octets[RCODE_BYTE], 0xf5);
        set_field(
            &mut octets,
            OPCODE_BYTE,
            OPCODE_MASK,
            OPCODE_SHIFT,
            Opcode::Query.into(),
        );
        assert_eq!(octets[OPCODE_BYTE], 0x87);
    }

    #[test]
    fn decode_reads_every_field() {
        let octets = b"\xbe\xef\xac\xb3\x00\x01\x00\x02\x00\x03\x00\x04";
        let header = Header::decode(octets);
        assert_eq!(
            header,
            Header {
                id: 0xbeef,
                qr: true,
                opcode: Opcode::Update,
                aa: true,
                tc: false,
                rd: false,
                ra: true,
                z: false,
                ad: true,
                cd: true,
                rcode: Rcode::NxDomain,
                qdcount: 1,
                ancount: 2,
                nscount: 3,
                arcount: 4,
            }
        );
    }

    #[test]
    fn codes_convert_both_ways() {
        for raw in 0..16 {
            assert_eq!(u8::from(Opcode::from(raw)), raw);
            assert_eq!(u8::from(Rcode::from(raw)), raw);
        }
    }
}
