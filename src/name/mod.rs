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

//! Implementation of the [`Name`] type for domain names.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use arrayvec::ArrayVec;

mod error;
mod wire;
pub use error::Error;

/// The maximum length of a label, not including the length octet.
pub const MAX_LABEL_LEN: usize = 63;

/// The maximum length of a name on the wire.
pub const MAX_WIRE_LEN: usize = 255;

/// The maximum number of labels in a name, including the null label.
/// The shortest non-null label takes two octets on the wire, so no
/// valid name can have more than this.
pub const MAX_N_LABELS: usize = 128;

/// A fully-qualified domain name.
///
/// A `Name` stores its uncompressed on-the-wire representation together
/// with the offset of each label within it. All ASCII letters are
/// folded to lowercase on construction, so derived equality and hashing
/// are the case-insensitive comparisons DNS requires, and a `Name` can
/// serve directly as a cache key.
///
/// The number of labels reported by [`Name::len`] includes the
/// terminal null label; the root name `.` has one label.
///
/// Because the wire representation of every suffix of a name is a tail
/// of the wire representation of the name itself, suffixes are
/// available without allocation through [`Name::suffix_wire_repr`].
/// The [compressor](crate::message::Compressor) relies on this.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Name {
    wire: Box<[u8]>,
    label_offsets: ArrayVec<u8, MAX_N_LABELS>,
}

impl Name {
    /// Returns the root name, `.`.
    pub fn root() -> Self {
        Self::from_validated_wire(&[0])
    }

    /// Builds a `Name` from an uncompressed wire representation that
    /// the caller has already validated.
    fn from_validated_wire(wire: &[u8]) -> Self {
        let mut label_offsets = ArrayVec::new();
        let mut offset = 0;
        loop {
            label_offsets.push(offset as u8);
            let len = wire[offset] as usize;
            if len == 0 {
                break;
            }
            offset += len + 1;
        }
        let mut wire: Box<[u8]> = wire.into();
        wire.make_ascii_lowercase();
        Self {
            wire,
            label_offsets,
        }
    }

    /// Returns the number of labels in this `Name`, including the null
    /// label.
    pub fn len(&self) -> usize {
        self.label_offsets.len()
    }

    /// Returns whether this is the root name.
    pub fn is_root(&self) -> bool {
        self.len() == 1
    }

    /// Returns the (uncompressed) on-the-wire representation of the
    /// `Name`.
    pub fn wire_repr(&self) -> &[u8] {
        &self.wire
    }

    /// Returns the on-the-wire representation of the suffix obtained by
    /// skipping the first `skip` labels. This panics if
    /// `skip >= self.len()`.
    pub fn suffix_wire_repr(&self, skip: usize) -> &[u8] {
        &self.wire[self.label_offsets[skip] as usize..]
    }

    /// Returns the octets of label `index`, without the length octet.
    /// The null label is the empty slice.
    pub fn label(&self, index: usize) -> &[u8] {
        let start = self.label_offsets[index] as usize;
        let len = self.wire[start] as usize;
        &self.wire[start + 1..start + 1 + len]
    }

    /// Returns an iterator over the labels of the `Name`, including the
    /// null label.
    pub fn labels(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.len()).map(|i| self.label(i))
    }

    /// Returns the superdomain obtained by skipping the first `skip`
    /// labels of the `Name`, or `None` if there aren't enough labels.
    pub fn superdomain(&self, skip: usize) -> Option<Self> {
        if skip < self.len() {
            Some(Self::from_validated_wire(self.suffix_wire_repr(skip)))
        } else {
            None
        }
    }

    /// Returns the top-level domain of the `Name` (e.g. `com.` for
    /// `www.example.com.`), or `None` for the root.
    pub fn top_level_domain(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            self.superdomain(self.len() - 2)
        }
    }

    /// Returns the `in-addr.arpa.` name used to look up `address` in
    /// reverse, e.g. `4.3.2.1.in-addr.arpa.` for `1.2.3.4`.
    pub fn in_addr_arpa(address: Ipv4Addr) -> Self {
        let mut wire = ArrayVec::<u8, 30>::new();
        for octet in address.octets().iter().rev() {
            let digits = octet.to_string();
            wire.push(digits.len() as u8);
            wire.extend(digits.bytes());
        }
        wire.extend(b"\x07in-addr\x04arpa\x00".iter().copied());
        Self::from_validated_wire(&wire)
    }

    /// Tries to parse a compressed name present at index `start` of the
    /// provided buffer. Pointers are followed; indices given in
    /// pointers are treated as indices in `octets`, so generally one
    /// will pass an entire DNS message. On success, the name is
    /// returned along with the number of contiguous octets it occupies
    /// at `start` (i.e., the number of octets to skip to reach the next
    /// field).
    pub fn try_from_compressed(octets: &[u8], start: usize) -> Result<(Self, usize), Error> {
        wire::parse_compressed_name(octets, start)
    }

    /// Tries to skip a compressed name at the beginning of `octets`,
    /// returning the number of octets read. This stops at the end of
    /// the name or at the first pointer, whichever comes first, and
    /// does not check the pointer itself.
    pub fn skip_compressed(octets: &[u8]) -> Result<usize, Error> {
        wire::skip_compressed_name(octets)
    }
}

impl FromStr for Name {
    type Err = Error;

    /// Parses a name in the usual dotted notation. A trailing dot is
    /// optional: every name is taken to be fully qualified. The string
    /// `.` is the root. Escape sequences are not supported.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.is_empty() {
            return Err(Error::StrEmpty);
        } else if !text.is_ascii() {
            return Err(Error::StrNotAscii);
        } else if text == "." {
            return Ok(Self::root());
        }

        let text = text.strip_suffix('.').unwrap_or(text);
        let mut wire = ArrayVec::<u8, MAX_WIRE_LEN>::new();
        for label in text.split('.') {
            if label.is_empty() {
                return Err(Error::NullNonTerminal);
            } else if label.len() > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong);
            }
            wire.try_push(label.len() as u8)
                .or(Err(Error::NameTooLong))?;
            wire.try_extend_from_slice(label.as_bytes())
                .or(Err(Error::NameTooLong))?;
        }
        wire.try_push(0).or(Err(Error::NameTooLong))?;
        Ok(Self::from_validated_wire(&wire))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for label in self.labels().take(self.len() - 1) {
            for &octet in label {
                if octet == b'.' || octet == b'\\' {
                    write!(f, "\\{}", octet as char)?;
                } else if octet.is_ascii_graphic() {
                    write!(f, "{}", octet as char)?;
                } else {
                    write!(f, "\\{:03}", octet)?;
                }
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str_works() {
        let name: Name = "www.Example.test".parse().unwrap();
        assert_eq!(name.wire_repr(), b"\x03www\x07example\x04test\x00");
        assert_eq!(name.len(), 4);
        assert_eq!(name, "WWW.example.TEST.".parse().unwrap());
    }

    #[test]
    fn from_str_accepts_root() {
        let root: Name = ".".parse().unwrap();
        assert!(root.is_root());
        assert_eq!(root, Name::root());
        assert_eq!(root.wire_repr(), b"\x00");
    }

    #[test]
    fn from_str_rejects_bad_names() {
        assert_eq!("".parse::<Name>(), Err(Error::StrEmpty));
        assert_eq!("exämple.test".parse::<Name>(), Err(Error::StrNotAscii));
        assert_eq!("example..test".parse::<Name>(), Err(Error::NullNonTerminal));
        assert_eq!(".example".parse::<Name>(), Err(Error::NullNonTerminal));
        let long_label = "x".repeat(64);
        assert_eq!(long_label.parse::<Name>(), Err(Error::LabelTooLong));
        let long_name = ["x"; 128].join(".");
        assert_eq!(long_name.parse::<Name>(), Err(Error::NameTooLong));
    }

    #[test]
    fn display_works() {
        let name: Name = "mail.example.test".parse().unwrap();
        assert_eq!(name.to_string(), "mail.example.test.");
        assert_eq!(Name::root().to_string(), ".");
    }

    #[test]
    fn labels_and_suffixes_work() {
        let name: Name = "a.b.test".parse().unwrap();
        let labels: Vec<&[u8]> = name.labels().collect();
        assert_eq!(labels, [&b"a"[..], b"b", b"test", b""]);
        assert_eq!(name.suffix_wire_repr(1), b"\x01b\x04test\x00");
        assert_eq!(name.suffix_wire_repr(3), b"\x00");
        assert_eq!(name.superdomain(2), Some("test".parse().unwrap()));
        assert_eq!(name.superdomain(3), Some(Name::root()));
        assert_eq!(name.superdomain(4), None);
    }

    #[test]
    fn in_addr_arpa_works() {
        let name = Name::in_addr_arpa(Ipv4Addr::new(192, 0, 2, 10));
        assert_eq!(name, "10.2.0.192.in-addr.arpa".parse().unwrap());
    }

    #[test]
    fn top_level_domain_works() {
        let name: Name = "www.example.com".parse().unwrap();
        assert_eq!(name.top_level_domain(), Some("com".parse().unwrap()));
        let tld: Name = "org".parse().unwrap();
        assert_eq!(tld.top_level_domain(), Some(tld.clone()));
        assert_eq!(Name::root().top_level_domain(), None);
    }
}
