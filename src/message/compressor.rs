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

//! Implementation of the [`Compressor`], which writes domain names into
//! a message under RFC 1035 § 4.1.4 name compression.

use std::collections::HashMap;

use super::constants::{POINTER_FLAG, POINTER_MAX};
use crate::name::Name;

/// The compression state of one message under construction.
///
/// A `Compressor` maps the wire representation of every name (and
/// every suffix of a name) written so far to the absolute message
/// offset where it starts. It lives exactly as long as the
/// [`Writer`](super::Writer) building the message and is never shared
/// between messages.
///
/// An entry, once made, is never redefined: if a suffix is already
/// indexed, later occurrences point to it instead of being indexed
/// again. Suffixes starting beyond [`POINTER_MAX`] cannot be the target
/// of a 14-bit pointer and are not indexed.
#[derive(Debug, Default)]
pub struct Compressor {
    index: HashMap<Box<[u8]>, u16>,
    journal: Vec<Box<[u8]>>,
}

/// The result of [`Compressor::emit`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Emitted {
    /// The number of octets written.
    pub len: usize,

    /// Whether the name ended in a compression pointer.
    pub used_pointer: bool,
}

impl Compressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `name` into `octets` at `position`, which is also the
    /// name's absolute offset in the message. The longest suffix of
    /// `name` (by whole labels) that is already indexed is replaced by
    /// a pointer; the labels before it are written literally and
    /// indexed. Returns `None`, leaving the index untouched, if the
    /// name would not fit before `limit`.
    pub fn emit(
        &mut self,
        name: &Name,
        octets: &mut [u8],
        position: usize,
        limit: usize,
    ) -> Option<Emitted> {
        let wire = name.wire_repr();
        let mut matched = None;
        for skip in 0..name.len() - 1 {
            if let Some(&offset) = self.index.get(name.suffix_wire_repr(skip)) {
                matched = Some((skip, offset));
                break;
            }
        }

        let (n_literal_labels, literal, pointer) = match matched {
            Some((skip, offset)) => {
                let literal_len = wire.len() - name.suffix_wire_repr(skip).len();
                (skip, &wire[..literal_len], Some(offset))
            }
            None => (name.len() - 1, wire, None),
        };
        let len = literal.len() + if pointer.is_some() { 2 } else { 0 };
        if position + len > limit.min(octets.len()) {
            return None;
        }

        octets[position..position + literal.len()].copy_from_slice(literal);
        if let Some(offset) = pointer {
            let pointer_start = position + literal.len();
            octets[pointer_start..pointer_start + 2]
                .copy_from_slice(&(POINTER_FLAG | offset).to_be_bytes());
        }

        for skip in 0..n_literal_labels {
            let suffix = name.suffix_wire_repr(skip);
            let offset = position + (wire.len() - suffix.len());
            if offset > POINTER_MAX {
                break;
            }
            if !self.index.contains_key(suffix) {
                self.index.insert(suffix.into(), offset as u16);
                self.journal.push(suffix.into());
            }
        }

        Some(Emitted {
            len,
            used_pointer: pointer.is_some(),
        })
    }

    /// Returns the offset at which `name` was indexed, if any.
    pub fn offset_of(&self, name: &Name) -> Option<u16> {
        self.index.get(name.wire_repr()).copied()
    }

    /// Returns a checkpoint to which the index can later be rolled back
    /// with [`Compressor::rollback`].
    pub fn checkpoint(&self) -> usize {
        self.journal.len()
    }

    /// Forgets every entry made since `checkpoint` was taken.
    pub fn rollback(&mut self, checkpoint: usize) {
        for suffix in self.journal.drain(checkpoint..) {
            self.index.remove(&suffix);
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
    fn unmatched_names_are_written_literally_and_indexed() {
        let mut compressor = Compressor::new();
        let mut octets = [0; 64];
        let emitted = compressor
            .emit(&name("example.test"), &mut octets, 12, 64)
            .unwrap();
        assert_eq!(
            emitted,
            Emitted {
                len: 14,
                used_pointer: false
            }
        );
        assert_eq!(&octets[12..26], b"\x07example\x04test\x00");
        assert_eq!(compressor.offset_of(&name("example.test")), Some(12));
        assert_eq!(compressor.offset_of(&name("test")), Some(20));
        assert_eq!(compressor.offset_of(&Name::root()), None);
    }

    #[test]
    fn repeated_names_become_pointers() {
        let mut compressor = Compressor::new();
        let mut octets = [0; 64];
        compressor.emit(&name("example.test"), &mut octets, 12, 64);
        let emitted = compressor
            .emit(&name("EXAMPLE.test"), &mut octets, 30, 64)
            .unwrap();
        assert_eq!(
            emitted,
            Emitted {
                len: 2,
                used_pointer: true
            }
        );
        assert_eq!(&octets[30..32], b"\xc0\x0c");
    }

    #[test]
    fn partial_matches_point_to_the_longest_suffix() {
        let mut compressor = Compressor::new();
        let mut octets = [0; 64];
        compressor.emit(&name("example.test"), &mut octets, 12, 64);
        let emitted = compressor
            .emit(&name("www.example.test"), &mut octets, 26, 64)
            .unwrap();
        assert_eq!(emitted.len, 6);
        assert!(emitted.used_pointer);
        assert_eq!(&octets[26..32], b"\x03www\xc0\x0c");
        assert_eq!(compressor.offset_of(&name("www.example.test")), Some(26));

        // The first occurrence stays authoritative.
        assert_eq!(compressor.offset_of(&name("example.test")), Some(12));
    }

    #[test]
    fn suffixes_beyond_pointer_range_are_not_indexed() {
        let mut compressor = Compressor::new();
        let mut octets = vec![0; POINTER_MAX + 64];
        let target = name("far.test");
        compressor
            .emit(&target, &mut octets, POINTER_MAX - 3, POINTER_MAX + 64)
            .unwrap();
        // "far.test" starts in range but "test" does not.
        assert_eq!(compressor.offset_of(&target), Some((POINTER_MAX - 3) as u16));
        assert_eq!(compressor.offset_of(&name("test")), None);

        let emitted = compressor
            .emit(&name("test"), &mut octets, POINTER_MAX + 20, POINTER_MAX + 64)
            .unwrap();
        assert!(!emitted.used_pointer);
        assert_eq!(emitted.len, 6);
    }

    #[test]
    fn emit_fails_cleanly_when_out_of_space() {
        let mut compressor = Compressor::new();
        let mut octets = [0; 64];
        assert_eq!(
            compressor.emit(&name("example.test"), &mut octets, 12, 20),
            None
        );
        assert_eq!(compressor.offset_of(&name("test")), None);
    }

    #[test]
    fn rollback_forgets_later_entries() {
        let mut compressor = Compressor::new();
        let mut octets = [0; 64];
        compressor.emit(&name("test"), &mut octets, 12, 64);
        let checkpoint = compressor.checkpoint();
        compressor.emit(&name("example.test"), &mut octets, 18, 64);
        assert!(compressor.offset_of(&name("example.test")).is_some());
        compressor.rollback(checkpoint);
        assert_eq!(compressor.offset_of(&name("example.test")), None);
        assert_eq!(compressor.offset_of(&name("test")), Some(12));
    }
}
