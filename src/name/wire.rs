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

//! Implementation of parsing of on-the-wire names.

use arrayvec::ArrayVec;

use super::{Error, Name, MAX_LABEL_LEN, MAX_WIRE_LEN};

////////////////////////////////////////////////////////////////////////
// PARSING OF COMPRESSED ON-THE-WIRE NAMES                            //
////////////////////////////////////////////////////////////////////////

/// Parses a compressed name starting at index `start` of `octets`.
/// Pointers are followed. Indices given in pointers are treated as
/// indices of `octets`, so the intention is for an entire DNS message
/// to be passed in `octets`. This is the implementation of
/// [`Name::try_from_compressed`].
pub fn parse_compressed_name(octets: &[u8], start: usize) -> Result<(Name, usize), Error> {
    let mut next_chunk = Some(start);
    let mut wire_len_of_first_chunk = None;
    let mut wire_repr = ArrayVec::<u8, MAX_WIRE_LEN>::new();

    while let Some(chunk_start) = next_chunk {
        let mut finished_with_chunk = false;
        let mut index = chunk_start;

        while !finished_with_chunk {
            let len = *octets.get(index).ok_or(Error::UnexpectedEom)?;
            if len & 0xc0 == 0xc0 {
                next_chunk = Some(parse_pointer(octets, chunk_start, index)? as usize);
                index += 2;
                finished_with_chunk = true;
            } else if len > (MAX_LABEL_LEN as u8) {
                return Err(Error::LabelTooLong);
            } else {
                let end_of_label = index + len as usize + 1;
                if len == 0 {
                    next_chunk = None;
                    finished_with_chunk = true;
                } else if end_of_label >= octets.len() {
                    return Err(Error::UnexpectedEom);
                }
                wire_repr
                    .try_extend_from_slice(&octets[index..end_of_label])
                    .or(Err(Error::NameTooLong))?;
                index = end_of_label;
            }
        }

        if wire_len_of_first_chunk.is_none() {
            wire_len_of_first_chunk = Some(index - chunk_start);
        }
    }

    let first_chunk_len = wire_len_of_first_chunk.unwrap_or_default();
    Ok((Name::from_validated_wire(&wire_repr), first_chunk_len))
}

/// Parses a pointer at `index` in `octets`. This also checks that the
/// pointer refers to an index *earlier* than the start of the chunk it
/// is in (`chunk_start`).
fn parse_pointer(octets: &[u8], chunk_start: usize, index: usize) -> Result<u16, Error> {
    if index + 1 < octets.len() {
        let pointer_bytes = [octets[index], octets[index + 1]];
        let pointer = u16::from_be_bytes(pointer_bytes) & (!0xc000);
        if (pointer as usize) >= chunk_start {
            // RFC 1035 § 4.1.4: pointers refer to a *prior* occurrence
            // of a name. Enforcing this rules out loops.
            Err(Error::InvalidPointer)
        } else {
            Ok(pointer)
        }
    } else {
        Err(Error::UnexpectedEom)
    }
}

////////////////////////////////////////////////////////////////////////
// SKIPPING OF COMPRESSED ON-THE-WIRE NAMES                           //
////////////////////////////////////////////////////////////////////////

/// Skips a compressed name starting at the beginning of `octets`; this
/// is the implementation of [`Name::skip_compressed`].
pub fn skip_compressed_name(octets: &[u8]) -> Result<usize, Error> {
    let mut offset = 0;
    while offset < octets.len() {
        let label_len = octets[offset];
        if label_len & 0xc0 == 0xc0 {
            return if offset + 2 <= octets.len() {
                Ok(offset + 2)
            } else {
                Err(Error::UnexpectedEom)
            };
        } else if label_len > (MAX_LABEL_LEN as u8) {
            return Err(Error::LabelTooLong);
        } else if label_len == 0 {
            return Ok(offset + 1);
        }
        offset += 1 + label_len as usize;
        if offset > MAX_WIRE_LEN {
            return Err(Error::NameTooLong);
        }
    }
    Err(Error::UnexpectedEom)
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
    fn parse_compressed_name_accepts_uncompressed_names() {
        let octets = b"junk\x07example\x04test\x00junk";
        assert_eq!(
            parse_compressed_name(octets, 4),
            Ok((name("example.test."), 14))
        );
    }

    #[test]
    fn parse_compressed_name_follows_pointers() {
        let octets = b"junk\x04test\x00junk\x07example\xc0\x04junk";
        assert_eq!(
            parse_compressed_name(octets, 14),
            Ok((name("example.test."), 10))
        );
    }

    #[test]
    fn parse_compressed_name_accepts_bare_pointer() {
        let octets = b"\x04test\x00\xc0\x00";
        assert_eq!(parse_compressed_name(octets, 6), Ok((name("test."), 2)));
    }

    #[test]
    fn parse_compressed_name_follows_chains_ending_before_start() {
        // www -> example -> test, each chunk earlier than the last.
        let octets = b"\x04test\x00\x07example\xc0\x00\x03www\xc0\x06";
        assert_eq!(
            parse_compressed_name(octets, 16),
            Ok((name("www.example.test."), 6))
        );
    }

    #[test]
    fn parse_compressed_name_rejects_forward_and_self_pointers() {
        assert_eq!(
            parse_compressed_name(b"\xc0\x00", 0),
            Err(Error::InvalidPointer)
        );
        assert_eq!(
            parse_compressed_name(b"\x01x\xc0\x04\x00", 0),
            Err(Error::InvalidPointer)
        );
    }

    #[test]
    fn parse_compressed_name_rejects_truncation() {
        assert_eq!(
            parse_compressed_name(b"\x04test", 0),
            Err(Error::UnexpectedEom)
        );
        assert_eq!(
            parse_compressed_name(b"\x04test\x00\xc0", 6),
            Err(Error::UnexpectedEom)
        );
        assert_eq!(parse_compressed_name(b"", 0), Err(Error::UnexpectedEom));
    }

    #[test]
    fn skip_compressed_name_works() {
        assert_eq!(skip_compressed_name(b"\x07example\x04test\x00junk"), Ok(14));
        assert_eq!(skip_compressed_name(b"\x07example\xc0\x04junk"), Ok(10));
        assert_eq!(skip_compressed_name(b"\xc0\x0c"), Ok(2));
        assert_eq!(
            skip_compressed_name(b"\x07example\xc0"),
            Err(Error::UnexpectedEom)
        );
    }
}
