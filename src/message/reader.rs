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

//! Implementation of the [`Reader`] type to read on-the-wire DNS
//! messages.

use std::convert::TryFrom;
use std::fmt;
use std::ops::Range;

use super::constants::*;
use super::header::{get_flag, get_u16, Header};
use super::{Opcode, Question, Rcode};
use crate::class::Class;
use crate::name::{self, Name};
use crate::rr::{Rdata, ReadRdataError, Ttl, Type};

////////////////////////////////////////////////////////////////////////
// READER                                                             //
////////////////////////////////////////////////////////////////////////

/// A "frame" around a buffer containing a DNS message that enables
/// reading the message data.
///
/// A `Reader` is constructed using its [`TryFrom`] implementation. Any
/// underlying buffer for a reader must contain at least a full DNS
/// message header of 12 octets; otherwise the construction will fail.
///
/// Since header information is in a fixed position, it can be read
/// at any time through the appropriate `Reader` methods. Questions and
/// RRs are read at a cursor, which initially points just past the
/// header, with [`Reader::read_question`], [`Reader::read_rr`] and
/// [`Reader::skip_rr`]. These must be called in message order. Every
/// RR is delimited by its RDLENGTH, so the number of records read is
/// governed entirely by the header counts; see [`decode`].
#[derive(Eq, PartialEq)]
pub struct Reader<'a> {
    octets: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    /// Returns every header field, decoded.
    pub fn header(&self) -> Header {
        Header::decode(self.octets)
    }

    /// Returns the 16-bit ID of the message.
    pub fn id(&self) -> u16 {
        get_u16(self.octets, ID_START)
    }

    /// Returns whether the QR (query response) bit is set.
    pub fn qr(&self) -> bool {
        get_flag(self.octets, QR_BYTE, QR_MASK)
    }

    /// Returns the message's opcode.
    pub fn opcode(&self) -> Opcode {
        Opcode::from((self.octets[OPCODE_BYTE] & OPCODE_MASK) >> OPCODE_SHIFT)
    }

    /// Returns whether the RD (recursion desired) bit is set.
    pub fn rd(&self) -> bool {
        get_flag(self.octets, RD_BYTE, RD_MASK)
    }

    /// Returns whether the CD (checking disabled) bit is set.
    pub fn cd(&self) -> bool {
        get_flag(self.octets, CD_BYTE, CD_MASK)
    }

    /// Returns the RCODE of the message.
    pub fn rcode(&self) -> Rcode {
        Rcode::from(self.octets[RCODE_BYTE] & RCODE_MASK)
    }

    /// Returns the number of questions in the message.
    pub fn qdcount(&self) -> u16 {
        get_u16(self.octets, QDCOUNT_START)
    }

    /// Returns the number of answers in the message.
    pub fn ancount(&self) -> u16 {
        get_u16(self.octets, ANCOUNT_START)
    }

    /// Returns the number of authority records in the message.
    pub fn nscount(&self) -> u16 {
        get_u16(self.octets, NSCOUNT_START)
    }

    /// Returns the number of additional records in the message.
    pub fn arcount(&self) -> u16 {
        get_u16(self.octets, ARCOUNT_START)
    }

    /// Reads a [`Question`] starting at the current cursor.
    ///
    /// This method is atomic, in that the cursor is not changed on
    /// failure.
    pub fn read_question(&mut self) -> Result<Question> {
        let (qname, qname_len) =
            Name::try_from_compressed(self.octets, self.cursor).map_err(Error::InvalidOwner)?;
        let qname_end = self.cursor + qname_len;
        let qtype = read_u16(self.octets, qname_end)?.into();
        let qclass = read_u16(self.octets, qname_end + 2)?.into();
        self.cursor = qname_end + 4;
        Ok(Question {
            qname,
            qtype,
            qclass,
        })
    }

    /// Reads a resource record at the current cursor, decompressing the
    /// owner and decoding the RDATA of the modeled types.
    ///
    /// This method is atomic, in that the cursor is not changed on
    /// failure.
    pub fn read_rr(&mut self) -> Result<ReadRr> {
        let start = self.cursor;
        let (owner, owner_len) =
            Name::try_from_compressed(self.octets, start).map_err(Error::InvalidOwner)?;
        let fields = read_rr_fields(self.octets, start + owner_len)?;
        let rdata = Rdata::read(
            fields.rr_type,
            self.octets,
            fields.rdata.start,
            fields.rdata.len(),
        )?;
        self.cursor = fields.rdata.end;
        Ok(ReadRr {
            owner,
            rr_type: fields.rr_type,
            class: fields.class,
            ttl: fields.ttl,
            rdata,
            range: start..fields.rdata.end,
        })
    }

    /// Skips the resource record at the current cursor, returning the
    /// range of octets it occupies. The owner is validated only up to
    /// its first pointer, and the RDATA is not examined.
    ///
    /// This method is atomic, in that the cursor is not changed on
    /// failure.
    pub fn skip_rr(&mut self) -> Result<Range<usize>> {
        let start = self.cursor;
        let owner_len =
            Name::skip_compressed(&self.octets[start..]).map_err(Error::InvalidOwner)?;
        let fields = read_rr_fields(self.octets, start + owner_len)?;
        self.cursor = fields.rdata.end;
        Ok(start..fields.rdata.end)
    }

    /// Returns whether the `Reader`'s cursor has reached the end of the
    /// message.
    pub fn at_eom(&self) -> bool {
        self.cursor >= self.octets.len()
    }
}

impl<'a> TryFrom<&'a [u8]> for Reader<'a> {
    type Error = Error;

    fn try_from(octets: &'a [u8]) -> Result<Self> {
        if octets.len() >= HEADER_SIZE {
            Ok(Self {
                octets,
                cursor: HEADER_SIZE,
            })
        } else {
            Err(Error::HeaderTooShort)
        }
    }
}

impl fmt::Debug for Reader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Reader")
            .field("header", &self.header())
            .field("cursor", &self.cursor)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// WHOLE-MESSAGE DECODING                                             //
////////////////////////////////////////////////////////////////////////

/// A message decoded down to record boundaries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Decoded {
    pub header: Header,

    /// The first question, if the message has one.
    pub question: Option<Question>,

    /// The octet ranges of the answer records.
    pub answers: Vec<Range<usize>>,

    /// The octet ranges of the authority records.
    pub authorities: Vec<Range<usize>>,

    /// The octet ranges of the additional records.
    pub additionals: Vec<Range<usize>>,
}

/// Decodes the header, questions and record boundaries of a message.
///
/// Exactly QDCOUNT questions and ANCOUNT, NSCOUNT and ARCOUNT records
/// are read, each record being delimited by its RDLENGTH field. A
/// message that ends before the counts are satisfied is an error;
/// trailing octets after the last counted record are ignored.
pub fn decode(octets: &[u8]) -> Result<Decoded> {
    let mut reader = Reader::try_from(octets)?;
    let header = reader.header();

    let mut question = None;
    for _ in 0..header.qdcount {
        let read = reader.read_question()?;
        question.get_or_insert(read);
    }

    let mut read_section = |count: u16| -> Result<Vec<Range<usize>>> {
        (0..count).map(|_| reader.skip_rr()).collect()
    };
    let answers = read_section(header.ancount)?;
    let authorities = read_section(header.nscount)?;
    let additionals = read_section(header.arcount)?;

    Ok(Decoded {
        header,
        question,
        answers,
        authorities,
        additionals,
    })
}

/// Parses only the header and first question of an incoming query.
/// This is what the request path needs to consult the cache; nothing
/// past the question is examined.
pub fn parse_question(octets: &[u8]) -> Result<(Header, Question)> {
    let mut reader = Reader::try_from(octets)?;
    let header = reader.header();
    if header.qdcount == 0 {
        return Err(Error::NoQuestion);
    }
    let question = reader.read_question()?;
    Ok((header, question))
}

////////////////////////////////////////////////////////////////////////
// HELPERS                                                            //
////////////////////////////////////////////////////////////////////////

/// The fixed fields that follow an RR's owner.
struct RrFields {
    rr_type: Type,
    class: Class,
    ttl: Ttl,
    rdata: Range<usize>,
}

/// Reads TYPE, CLASS, TTL and RDLENGTH at `start`, checking that the
/// RDATA fits in the message.
fn read_rr_fields(octets: &[u8], start: usize) -> Result<RrFields> {
    let rr_type = read_u16(octets, start)?.into();
    let class = read_u16(octets, start + 2)?.into();
    let ttl = read_u32(octets, start + 4)?.into();
    let rdlength = read_u16(octets, start + 8)? as usize;
    let rdata_start = start + 10;
    if rdata_start + rdlength > octets.len() {
        return Err(Error::UnexpectedEomInField);
    }
    Ok(RrFields {
        rr_type,
        class,
        ttl,
        rdata: rdata_start..rdata_start + rdlength,
    })
}

/// Reads a network-byte-order `u16` at `start`.
fn read_u16(octets: &[u8], start: usize) -> Result<u16> {
    octets
        .get(start..start + 2)
        .map(|field| u16::from_be_bytes([field[0], field[1]]))
        .ok_or(Error::UnexpectedEomInField)
}

/// Reads a network-byte-order `u32` at `start`.
fn read_u32(octets: &[u8], start: usize) -> Result<u32> {
    octets
        .get(start..start + 4)
        .map(|field| u32::from_be_bytes([field[0], field[1], field[2], field[3]]))
        .ok_or(Error::UnexpectedEomInField)
}

////////////////////////////////////////////////////////////////////////
// READ RR STRUCTURE                                                  //
////////////////////////////////////////////////////////////////////////

/// A structure containing RR data as returned by [`Reader::read_rr`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadRr {
    pub owner: Name,
    pub rr_type: Type,
    pub class: Class,
    pub ttl: Ttl,

    /// The decoded RDATA, or `None` if the type is not modeled.
    pub rdata: Option<Rdata>,

    /// The octets occupied by the whole record.
    pub range: Range<usize>,
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a message, question or resource record
/// could not be read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    HeaderTooShort,
    UnexpectedEomInField,
    InvalidOwner(name::Error),
    InvalidRdata(ReadRdataError),
    NoQuestion,
}

impl From<ReadRdataError> for Error {
    fn from(err: ReadRdataError) -> Self {
        Self::InvalidRdata(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::HeaderTooShort => f.write_str("header too short"),
            Self::UnexpectedEomInField => f.write_str("unexpected end of message in field"),
            Self::InvalidOwner(err) => write!(f, "invalid owner: {}", err),
            Self::InvalidRdata(err) => err.fmt(f),
            Self::NoQuestion => f.write_str("message has no question"),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by fallible [`Reader`] methods.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Writer;
    use crate::rr::Record;
    use std::net::Ipv4Addr;

    /// This is a reply to a query for example.com. IN NS to a recursive
    /// server, made on January 7, 2022.
    const EXAMPLE_COM_NS_MESSAGE: &[u8] =
        b"\xe2\xd7\x81\x80\x00\x01\x00\x02\x00\x00\x00\x01\x07\x65\x78\x61\
          \x6d\x70\x6c\x65\x03\x63\x6f\x6d\x00\x00\x02\x00\x01\xc0\x0c\x00\
          \x02\x00\x01\x00\x01\x50\xa2\x00\x14\x01\x61\x0c\x69\x61\x6e\x61\
          \x2d\x73\x65\x72\x76\x65\x72\x73\x03\x6e\x65\x74\x00\xc0\x0c\x00\
          \x02\x00\x01\x00\x01\x50\xa2\x00\x04\x01\x62\xc0\x2b\x00\x00\x29\
          \x10\x00\x00\x00\x00\x00\x00\x00";

    #[test]
    fn reader_works() {
        let mut reader = Reader::try_from(EXAMPLE_COM_NS_MESSAGE).unwrap();
        let expected_qname: Name = "example.com.".parse().unwrap();

        // Check the header.
        let header = reader.header();
        assert_eq!(header.id, 0xe2d7);
        assert!(header.qr);
        assert_eq!(header.opcode, Opcode::Query);
        assert!(!header.aa);
        assert!(!header.tc);
        assert!(header.rd);
        assert!(header.ra);
        assert_eq!(header.rcode, Rcode::NoError);
        assert_eq!(reader.qdcount(), 1);
        assert_eq!(reader.ancount(), 2);
        assert_eq!(reader.nscount(), 0);
        assert_eq!(reader.arcount(), 1);

        // Check the question.
        let question = reader.read_question().unwrap();
        assert_eq!(question, Question::new(expected_qname.clone(), Type::NS));

        // Check the answers. NS is not a modeled type.
        let answer_1 = reader.read_rr().unwrap();
        assert_eq!(answer_1.owner, expected_qname);
        assert_eq!(answer_1.rr_type, Type::NS);
        assert_eq!(answer_1.class, Class::IN);
        assert_eq!(answer_1.ttl, Ttl::from(86178));
        assert_eq!(answer_1.rdata, None);
        assert_eq!(answer_1.range, 29..61);
        assert_eq!(reader.skip_rr(), Ok(61..77));

        // Check the OPT record.
        let opt = reader.read_rr().unwrap();
        assert!(opt.owner.is_root());
        assert_eq!(opt.rr_type, Type::OPT);
        assert_eq!(opt.class, Class::from(4096));

        // And that should be it!
        assert!(reader.at_eom());
    }

    #[test]
    fn reader_constructor_rejects_short_message() {
        for size in 0..HEADER_SIZE {
            let buf = vec![0; size];
            assert_eq!(Reader::try_from(buf.as_slice()), Err(Error::HeaderTooShort));
        }
    }

    #[test]
    fn decode_walks_counted_records() {
        let decoded = decode(EXAMPLE_COM_NS_MESSAGE).unwrap();
        assert_eq!(
            decoded.question,
            Some(Question::new("example.com".parse().unwrap(), Type::NS))
        );
        assert_eq!(decoded.answers, vec![29..61, 61..77]);
        assert!(decoded.authorities.is_empty());
        assert_eq!(decoded.additionals, vec![77..88]);
    }

    #[test]
    fn decode_is_not_fooled_by_zero_octets() {
        // Two A records full of zero octets: a TTL of zero and the
        // address 0.0.0.0. A sentinel-based decoder would stop early.
        let mut buf = [0; 512];
        let mut writer = Writer::new(&mut buf, 512).unwrap();
        let owner: Name = "zero.test".parse().unwrap();
        writer
            .add_question(&Question::new(owner.clone(), Type::A))
            .unwrap();
        for address in [Ipv4Addr::UNSPECIFIED, Ipv4Addr::new(0, 0, 0, 1)] {
            writer
                .add_answer(&Record::new(
                    owner.clone(),
                    Ttl::from(0),
                    Rdata::A(address),
                ))
                .unwrap();
        }
        let len = writer.finish();

        let decoded = decode(&buf[..len]).unwrap();
        assert_eq!(decoded.answers.len(), 2);
        assert_eq!(decoded.answers[1].end, len);

        let mut reader = Reader::try_from(&buf[..len]).unwrap();
        reader.read_question().unwrap();
        reader.read_rr().unwrap();
        let second = reader.read_rr().unwrap();
        assert_eq!(second.rdata, Some(Rdata::A(Ipv4Addr::new(0, 0, 0, 1))));
    }

    #[test]
    fn decode_rejects_short_sections() {
        // ANCOUNT claims three answers, but only two are present.
        let mut message = EXAMPLE_COM_NS_MESSAGE[..77].to_vec();
        message[7] = 3;
        message[11] = 0;
        assert_eq!(
            decode(&message),
            Err(Error::InvalidOwner(name::Error::UnexpectedEom))
        );

        // RDLENGTH overruns the message.
        let mut message = EXAMPLE_COM_NS_MESSAGE[..76].to_vec();
        message[11] = 0;
        assert_eq!(decode(&message), Err(Error::UnexpectedEomInField));
    }

    #[test]
    fn parse_question_works() {
        let query = b"\x12\x34\x01\x00\x00\x01\x00\x00\x00\x00\x00\x00\
                      \x03www\x07example\x04test\x00\x00\x0f\x00\x01";
        let (header, question) = parse_question(query).unwrap();
        assert_eq!(header.id, 0x1234);
        assert!(header.rd);
        assert_eq!(
            question,
            Question::new("www.example.test".parse().unwrap(), Type::MX)
        );

        let no_question = b"\x12\x34\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00";
        assert_eq!(parse_question(no_question), Err(Error::NoQuestion));
        assert_eq!(
            parse_question(&query[..30]),
            Err(Error::UnexpectedEomInField)
        );
    }
}
