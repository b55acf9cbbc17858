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

//! Implementation of the [`Writer`] type to write on-the-wire DNS
//! messages.

use std::fmt;

use super::compressor::{Compressor, Emitted};
use super::constants::*;
use super::header::{get_flag, get_u16, set_field, set_flag, set_u16};
use super::{Opcode, Question, Rcode};
use crate::class::Class;
use crate::name::Name;
use crate::rr::{Rdata, Record, Type};

////////////////////////////////////////////////////////////////////////
// WRITER                                                             //
////////////////////////////////////////////////////////////////////////

/// A "frame" around a buffer that serializes a DNS message into it.
///
/// A `Writer` is constructed using [`Writer::new`], which takes the
/// underlying buffer and a message size limit. The message header is
/// initially zeroed; header fields can be written at any time through
/// the setter methods, each of which touches only its own bits.
///
/// Questions and resource records are written sequentially at a
/// cursor, so they must be added in message order: questions, answer
/// RRs, authority RRs, then additional RRs. Attempts to go back to an
/// earlier section fail with [`Error::OutOfOrder`]. Every domain name
/// goes through the message's [`Compressor`], so a name (or suffix)
/// that was already written is replaced by a pointer.
///
/// Each `add_*` method is atomic: on failure, the cursor, section and
/// compression state are rolled back, so a caller may, for example,
/// stop adding records once the message is full.
///
/// The section counts are written by [`Writer::finish`], together with
/// the OPT pseudo-record if [`Writer::set_edns`] was used.
pub struct Writer<'a> {
    octets: &'a mut [u8],
    cursor: usize,
    available: usize,
    section: Section,
    qdcount: u16,
    ancount: u16,
    nscount: u16,
    arcount: u16,
    compressor: Compressor,
    edns: Option<u16>,
}

/// A type for recording which section of a DNS message a [`Writer`] is
/// currently serializing.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum Section {
    Question,
    Answer,
    Authority,
    Additional,
}

impl<'a> Writer<'a> {
    /// Creates a new `Writer` over `octets`. The message size is
    /// limited to `limit` or `octets.len()`, whichever is smaller. If
    /// that is too small to hold a header, this fails.
    pub fn new(octets: &'a mut [u8], limit: usize) -> Result<Self> {
        let limit = limit.min(octets.len());
        if limit < HEADER_SIZE {
            Err(Error::Truncation)
        } else {
            octets[0..HEADER_SIZE].fill(0);
            Ok(Self {
                octets,
                cursor: HEADER_SIZE,
                available: limit,
                section: Section::Question,
                qdcount: 0,
                ancount: 0,
                nscount: 0,
                arcount: 0,
                compressor: Compressor::new(),
                edns: None,
            })
        }
    }

    /// Returns the 16-bit ID of the message.
    pub fn id(&self) -> u16 {
        get_u16(self.octets, ID_START)
    }

    /// Sets the 16-bit ID of the message.
    pub fn set_id(&mut self, id: u16) {
        set_u16(self.octets, ID_START, id);
    }

    /// Returns the current value of the QR (query response) bit.
    pub fn qr(&self) -> bool {
        get_flag(self.octets, QR_BYTE, QR_MASK)
    }

    /// Sets or clears the QR (query response) bit.
    pub fn set_qr(&mut self, qr: bool) {
        set_flag(self.octets, QR_BYTE, QR_MASK, qr);
    }

    /// Returns the message's current opcode.
    pub fn opcode(&self) -> Opcode {
        Opcode::from((self.octets[OPCODE_BYTE] & OPCODE_MASK) >> OPCODE_SHIFT)
    }

    /// Sets the message's opcode.
    pub fn set_opcode(&mut self, opcode: Opcode) {
        set_field(
            self.octets,
            OPCODE_BYTE,
            OPCODE_MASK,
            OPCODE_SHIFT,
            opcode.into(),
        );
    }

    /// Sets or clears the AA (authoritative answer) bit.
    pub fn set_aa(&mut self, aa: bool) {
        set_flag(self.octets, AA_BYTE, AA_MASK, aa);
    }

    /// Sets or clears the TC (truncation) bit.
    pub fn set_tc(&mut self, tc: bool) {
        set_flag(self.octets, TC_BYTE, TC_MASK, tc);
    }

    /// Sets or clears the RD (recursion desired) bit.
    pub fn set_rd(&mut self, rd: bool) {
        set_flag(self.octets, RD_BYTE, RD_MASK, rd);
    }

    /// Sets or clears the RA (recursion available) bit.
    pub fn set_ra(&mut self, ra: bool) {
        set_flag(self.octets, RA_BYTE, RA_MASK, ra);
    }

    /// Sets or clears the AD (authentic data) bit.
    pub fn set_ad(&mut self, ad: bool) {
        set_flag(self.octets, AD_BYTE, AD_MASK, ad);
    }

    /// Sets or clears the CD (checking disabled) bit.
    pub fn set_cd(&mut self, cd: bool) {
        set_flag(self.octets, CD_BYTE, CD_MASK, cd);
    }

    /// Returns the RCODE of the message.
    pub fn rcode(&self) -> Rcode {
        Rcode::from(self.octets[RCODE_BYTE] & RCODE_MASK)
    }

    /// Sets the RCODE of the message.
    pub fn set_rcode(&mut self, rcode: Rcode) {
        set_field(self.octets, RCODE_BYTE, RCODE_MASK, 0, rcode.into());
    }

    /// Returns the current number of questions in the message.
    pub fn qdcount(&self) -> u16 {
        self.qdcount
    }

    /// Returns the current number of answer RRs in the message.
    pub fn ancount(&self) -> u16 {
        self.ancount
    }

    /// Returns the current number of authority RRs in the message.
    pub fn nscount(&self) -> u16 {
        self.nscount
    }

    /// Returns the current number of additional RRs in the message,
    /// including a reserved OPT record.
    pub fn arcount(&self) -> u16 {
        self.arcount
    }

    /// Adds a question to the message. This must be used before any
    /// resource records are added.
    pub fn add_question(&mut self, question: &Question) -> Result<()> {
        if self.section != Section::Question {
            return Err(Error::OutOfOrder);
        }
        let new_qdcount = self.qdcount.checked_add(1).ok_or(Error::CountOverflow)?;
        self.with_rollback(|this| {
            this.write_name(&question.qname)?;
            this.try_push_u16(question.qtype.into())?;
            this.try_push_u16(question.qclass.into())
        })?;
        self.qdcount = new_qdcount;
        Ok(())
    }

    /// Adds a resource record to the answer section of the message.
    pub fn add_answer(&mut self, record: &Record) -> Result<()> {
        let new_ancount = self.ancount.checked_add(1).ok_or(Error::CountOverflow)?;
        self.add_rr_in_section(Section::Answer, record)?;
        self.ancount = new_ancount;
        Ok(())
    }

    /// Adds a resource record to the authority section of the message.
    pub fn add_authority(&mut self, record: &Record) -> Result<()> {
        let new_nscount = self.nscount.checked_add(1).ok_or(Error::CountOverflow)?;
        self.add_rr_in_section(Section::Authority, record)?;
        self.nscount = new_nscount;
        Ok(())
    }

    /// Adds a resource record to the additional section of the message.
    pub fn add_additional(&mut self, record: &Record) -> Result<()> {
        let new_arcount = self.arcount.checked_add(1).ok_or(Error::CountOverflow)?;
        self.add_rr_in_section(Section::Additional, record)?;
        self.arcount = new_arcount;
        Ok(())
    }

    /// Makes this an EDNS message. Space for the fixed-size OPT record
    /// is reserved at the end of the message, and the record itself is
    /// written by [`Writer::finish`].
    pub fn set_edns(&mut self, udp_payload_size: u16) -> Result<()> {
        if self.edns.is_some() {
            Err(Error::AlreadyEdns)
        } else if self.cursor + OPT_RECORD_SIZE > self.available {
            Err(Error::Truncation)
        } else {
            self.arcount = self.arcount.checked_add(1).ok_or(Error::CountOverflow)?;
            self.available -= OPT_RECORD_SIZE;
            self.edns = Some(udp_payload_size);
            Ok(())
        }
    }

    /// Finishes writing the message: the section counts are written and
    /// any OPT record is appended. The final length of the message is
    /// returned.
    pub fn finish(mut self) -> usize {
        set_u16(self.octets, QDCOUNT_START, self.qdcount);
        set_u16(self.octets, ANCOUNT_START, self.ancount);
        set_u16(self.octets, NSCOUNT_START, self.nscount);
        set_u16(self.octets, ARCOUNT_START, self.arcount);

        if let Some(udp_payload_size) = self.edns {
            // Space for this was reserved by set_edns.
            let start = self.cursor;
            let opt = &mut self.octets[start..start + OPT_RECORD_SIZE];
            opt[0] = 0;
            opt[1..3].copy_from_slice(&u16::from(Type::OPT).to_be_bytes());
            opt[3..5].copy_from_slice(&udp_payload_size.to_be_bytes());
            opt[5..11].fill(0);
            self.cursor += OPT_RECORD_SIZE;
        }

        self.cursor
    }

    /// Switches to `section` (which must not precede the current one)
    /// and writes `record` there atomically.
    fn add_rr_in_section(&mut self, section: Section, record: &Record) -> Result<()> {
        if section < self.section {
            return Err(Error::OutOfOrder);
        }
        self.with_rollback(|this| {
            this.section = section;
            this.add_rr(record)
        })
    }

    /// Writes out an RR at the current cursor. This is for internal
    /// use: the write is not done atomically and may change the cursor
    /// even when an error is returned. This is intended to be used with
    /// [`Writer::with_rollback`].
    fn add_rr(&mut self, record: &Record) -> Result<()> {
        self.write_name(&record.owner)?;
        self.try_push_u16(record.rr_type().into())?;
        self.try_push_u16(Class::IN.into())?;
        self.try_push_u32(record.ttl.into())?;

        // Save two octets for the RDLENGTH field. We must compute and
        // write this field at the end, since it's affected by
        // compression.
        if self.available - self.cursor < 2 {
            return Err(Error::Truncation);
        }
        let rdlength_start = self.cursor;
        self.cursor += 2;

        match &record.rdata {
            Rdata::A(address) => self.try_push(&address.octets())?,
            Rdata::Cname(target) | Rdata::Ptr(target) => {
                self.write_name(target)?;
            }
            Rdata::Mx {
                preference,
                exchange,
            } => {
                self.try_push_u16(*preference)?;
                self.write_name(exchange)?;
            }
            Rdata::Soa(soa) => {
                self.write_name(&soa.mname)?;
                self.write_name(&soa.rname)?;
                for field in [soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum] {
                    self.try_push_u32(field)?;
                }
            }
        }

        let rdlength = self.cursor - rdlength_start - 2;
        set_u16(self.octets, rdlength_start, rdlength as u16);
        Ok(())
    }

    /// Executes `f(self)`, returning the result and rolling back the
    /// section, cursor, and compression state to the current values
    /// first if the result is an error.
    fn with_rollback<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let saved_section = self.section;
        let saved_cursor = self.cursor;
        let checkpoint = self.compressor.checkpoint();
        let result = f(self);
        if result.is_err() {
            self.section = saved_section;
            self.cursor = saved_cursor;
            self.compressor.rollback(checkpoint);
        }
        result
    }

    /// Writes a domain name at the current cursor, compressing it.
    fn write_name(&mut self, name: &Name) -> Result<Emitted> {
        let emitted = self
            .compressor
            .emit(name, self.octets, self.cursor, self.available)
            .ok_or(Error::Truncation)?;
        self.cursor += emitted.len;
        Ok(emitted)
    }

    /// Tries to write `data` to the underlying buffer at the current
    /// cursor, failing if there is not sufficient space.
    fn try_push(&mut self, data: &[u8]) -> Result<()> {
        if self.available - self.cursor >= data.len() {
            self.octets[self.cursor..self.cursor + data.len()].copy_from_slice(data);
            self.cursor += data.len();
            Ok(())
        } else {
            Err(Error::Truncation)
        }
    }

    /// Tries to write `data` in network byte order to the underlying
    /// buffer, failing if there is not sufficient space.
    fn try_push_u16(&mut self, data: u16) -> Result<()> {
        self.try_push(&data.to_be_bytes())
    }

    /// Tries to write `data` in network byte order to the underlying
    /// buffer, failing if there is not sufficient space.
    fn try_push_u32(&mut self, data: u32) -> Result<()> {
        self.try_push(&data.to_be_bytes())
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a [`Writer`] operation could not be
/// completed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// The message already has an OPT record.
    AlreadyEdns,

    /// A section count would exceed 65,535.
    CountOverflow,

    /// A question or RR was added after a later section was started.
    OutOfOrder,

    /// The message would exceed its size limit.
    Truncation,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::AlreadyEdns => f.write_str("message already has an OPT record"),
            Self::CountOverflow => f.write_str("section count overflow"),
            Self::OutOfOrder => f.write_str("message sections written out of order"),
            Self::Truncation => f.write_str("message exceeds its size limit"),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by fallible [`Writer`] methods.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
