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

//! Implementation of the [`Record`] and [`Rdata`] types.

use std::fmt;
use std::net::Ipv4Addr;

use super::{Ttl, Type};
use crate::name::{self, Name};

////////////////////////////////////////////////////////////////////////
// RECORDS                                                            //
////////////////////////////////////////////////////////////////////////

/// A resource record of one of the modeled types. The class is always
/// [`IN`](crate::class::Class::IN).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub owner: Name,
    pub ttl: Ttl,
    pub rdata: Rdata,
}

impl Record {
    pub fn new(owner: Name, ttl: Ttl, rdata: Rdata) -> Self {
        Self { owner, ttl, rdata }
    }

    pub fn rr_type(&self) -> Type {
        self.rdata.rr_type()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} IN {} {}",
            self.owner,
            self.ttl,
            self.rr_type(),
            self.rdata
        )
    }
}

////////////////////////////////////////////////////////////////////////
// RDATA                                                              //
////////////////////////////////////////////////////////////////////////

/// The type-specific data of a [`Record`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Rdata {
    A(Ipv4Addr),
    Cname(Name),
    Mx { preference: u16, exchange: Name },
    Ptr(Name),
    Soa(Box<Soa>),
}

/// The RDATA of an SOA record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Soa {
    pub mname: Name,
    pub rname: Name,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl Rdata {
    pub fn rr_type(&self) -> Type {
        match self {
            Self::A(_) => Type::A,
            Self::Cname(_) => Type::CNAME,
            Self::Mx { .. } => Type::MX,
            Self::Ptr(_) => Type::PTR,
            Self::Soa(_) => Type::SOA,
        }
    }

    /// Reads RDATA of type `rr_type` occupying `len` octets at `start`
    /// in `message`, decompressing embedded names. Embedded names must
    /// end within the RDATA, and the RDATA must be consumed exactly.
    /// Types that are not modeled yield `Ok(None)`.
    pub fn read(
        rr_type: Type,
        message: &[u8],
        start: usize,
        len: usize,
    ) -> Result<Option<Self>, ReadRdataError> {
        let end = start + len;
        if end > message.len() {
            return Err(ReadRdataError::UnexpectedEom);
        }
        let mut cursor = start;
        let rdata = match rr_type {
            Type::A => {
                let octets = read_array::<4>(message, &mut cursor, end)?;
                Self::A(Ipv4Addr::from(octets))
            }
            Type::CNAME => Self::Cname(read_name(message, &mut cursor, end)?),
            Type::PTR => Self::Ptr(read_name(message, &mut cursor, end)?),
            Type::MX => {
                let preference = u16::from_be_bytes(read_array(message, &mut cursor, end)?);
                let exchange = read_name(message, &mut cursor, end)?;
                Self::Mx {
                    preference,
                    exchange,
                }
            }
            Type::SOA => {
                let mname = read_name(message, &mut cursor, end)?;
                let rname = read_name(message, &mut cursor, end)?;
                let mut next = || {
                    read_array(message, &mut cursor, end).map(u32::from_be_bytes)
                };
                Self::Soa(Box::new(Soa {
                    mname,
                    rname,
                    serial: next()?,
                    refresh: next()?,
                    retry: next()?,
                    expire: next()?,
                    minimum: next()?,
                }))
            }
            _ => return Ok(None),
        };
        if cursor == end {
            Ok(Some(rdata))
        } else {
            Err(ReadRdataError::ExtraData)
        }
    }
}

fn read_array<const N: usize>(
    message: &[u8],
    cursor: &mut usize,
    end: usize,
) -> Result<[u8; N], ReadRdataError> {
    if *cursor + N > end {
        return Err(ReadRdataError::UnexpectedEom);
    }
    let mut array = [0; N];
    array.copy_from_slice(&message[*cursor..*cursor + N]);
    *cursor += N;
    Ok(array)
}

fn read_name(message: &[u8], cursor: &mut usize, end: usize) -> Result<Name, ReadRdataError> {
    // Pointers may refer anywhere earlier in the message, but the
    // name's own octets must not run past the RDATA.
    let (name, len) = Name::try_from_compressed(&message[..end], *cursor)?;
    *cursor += len;
    Ok(name)
}

impl fmt::Display for Rdata {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::A(address) => write!(f, "{address}"),
            Self::Cname(target) | Self::Ptr(target) => write!(f, "{target}"),
            Self::Mx {
                preference,
                exchange,
            } => write!(f, "{preference} {exchange}"),
            Self::Soa(soa) => write!(
                f,
                "{} {} {} {} {} {} {}",
                soa.mname, soa.rname, soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum
            ),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that RDATA could not be read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadRdataError {
    /// Octets were left over after the RDATA was parsed.
    ExtraData,

    /// An embedded name was invalid.
    InvalidName(name::Error),

    /// The RDATA was shorter than its type requires.
    UnexpectedEom,
}

impl From<name::Error> for ReadRdataError {
    fn from(error: name::Error) -> Self {
        match error {
            name::Error::UnexpectedEom => Self::UnexpectedEom,
            other => Self::InvalidName(other),
        }
    }
}

impl fmt::Display for ReadRdataError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ExtraData => f.write_str("extra data after RDATA"),
            Self::InvalidName(error) => write!(f, "invalid name in RDATA: {error}"),
            Self::UnexpectedEom => f.write_str("RDATA is too short"),
        }
    }
}

impl std::error::Error for ReadRdataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidName(error) => Some(error),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
