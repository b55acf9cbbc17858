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

//! The answer cache.
//!
//! A [`CacheMap`] maps (type, name) keys to [`Answer`]s: complete,
//! serialized response messages built ahead of time by the
//! [zone compiler](crate::zone::compile). A [`Cache`] publishes one
//! `CacheMap` at a time. Lookups load the published map without
//! locking; a reload builds a new map off to the side and swaps it in
//! whole, so a lookup sees either the old map or the new one and never
//! a mixture. Reloads are serialized against each other by a mutex
//! that readers never touch.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use log::{debug, info, warn};

use crate::message::{patch_id, Rcode, Reader};
use crate::name::Name;
use crate::rr::Type;
use crate::zone::{self, LoadError, ZoneSource};

////////////////////////////////////////////////////////////////////////
// ANSWERS                                                            //
////////////////////////////////////////////////////////////////////////

/// A prebuilt response message with a zero ID.
///
/// Cloning an `Answer` is cheap; the octets are shared.
#[derive(Clone, Eq, PartialEq)]
pub struct Answer {
    octets: Arc<[u8]>,
}

impl Answer {
    /// Wraps a serialized message. The ID is zeroed.
    pub fn new(octets: &[u8]) -> Self {
        let mut octets: Box<[u8]> = octets.into();
        patch_id(&mut octets, 0);
        Self {
            octets: octets.into(),
        }
    }

    /// Returns the serialized message, with a zero ID.
    pub fn octets(&self) -> &[u8] {
        &self.octets
    }

    pub fn len(&self) -> usize {
        self.octets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.octets.is_empty()
    }

    /// Copies the message into `buf` with its ID set to `id`, returning
    /// the number of octets written, or `None` if `buf` is too small.
    pub fn write_response(&self, id: u16, buf: &mut [u8]) -> Option<usize> {
        let len = self.octets.len();
        let dest = buf.get_mut(..len)?;
        dest.copy_from_slice(&self.octets);
        patch_id(dest, id);
        Some(len)
    }

    /// Returns a copy of the message with its ID set to `id`.
    pub fn to_response(&self, id: u16) -> Vec<u8> {
        let mut octets = self.octets.to_vec();
        patch_id(&mut octets, id);
        octets
    }

    /// Returns the RCODE of the message.
    pub fn rcode(&self) -> Rcode {
        Reader::try_from(self.octets())
            .map(|reader| reader.rcode())
            .unwrap_or(Rcode::ServFail)
    }

    /// Returns the number of records in the answer section.
    pub fn ancount(&self) -> u16 {
        Reader::try_from(self.octets())
            .map(|reader| reader.ancount())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Answer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Answer")
            .field("len", &self.len())
            .field("rcode", &self.rcode())
            .field("ancount", &self.ancount())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// CACHE MAPS                                                         //
////////////////////////////////////////////////////////////////////////

/// An immutable-once-published set of answers keyed by (type, name).
///
/// The map is nested by type so that a lookup borrows the query name
/// rather than building a composite key.
#[derive(Clone, Debug, Default)]
pub struct CacheMap {
    answers: HashMap<Type, HashMap<Name, Answer>>,
    serial: u32,
}

impl CacheMap {
    /// Creates an empty map whose answers were built with SOA serial
    /// `serial`.
    pub fn new(serial: u32) -> Self {
        Self {
            answers: HashMap::new(),
            serial,
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Adds an answer, returning the answer previously stored under the
    /// same key.
    pub fn insert(&mut self, rr_type: Type, name: Name, answer: Answer) -> Option<Answer> {
        self.answers
            .entry(rr_type)
            .or_default()
            .insert(name, answer)
    }

    /// Looks up the answer for (`rr_type`, `name`).
    pub fn get(&self, rr_type: Type, name: &Name) -> Option<&Answer> {
        self.answers.get(&rr_type)?.get(name)
    }

    /// Returns the total number of answers.
    pub fn len(&self) -> usize {
        self.answers.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of answers per type, ordered by type.
    pub fn counts(&self) -> Vec<(Type, usize)> {
        let mut counts: Vec<_> = self
            .answers
            .iter()
            .map(|(rr_type, by_name)| (*rr_type, by_name.len()))
            .collect();
        counts.sort_by_key(|(rr_type, _)| u16::from(*rr_type));
        counts
    }

    /// Logs the per-type answer counts.
    pub fn log_summary(&self) {
        for (rr_type, count) in self.counts() {
            info!("{} answers of type {}", count, rr_type);
        }
    }
}

////////////////////////////////////////////////////////////////////////
// CACHE                                                              //
////////////////////////////////////////////////////////////////////////

/// The published answer map, shared by all workers.
pub struct Cache {
    published: ArcSwap<CacheMap>,
    reload_lock: Mutex<()>,
}

impl Cache {
    /// Creates a `Cache` publishing `map`.
    pub fn new(map: CacheMap) -> Self {
        Self {
            published: ArcSwap::from_pointee(map),
            reload_lock: Mutex::new(()),
        }
    }

    /// Compiles the zone files of `source` and creates a `Cache`
    /// publishing the result.
    pub fn load(source: &ZoneSource) -> Result<Self, LoadError> {
        let map = zone::load(source)?;
        map.log_summary();
        Ok(Self::new(map))
    }

    /// Looks up the answer for a query in the currently published map.
    pub fn get(&self, rr_type: Type, name: &Name) -> Option<Answer> {
        let map = self.published.load();
        let answer = map.get(rr_type, name).cloned();
        debug!(
            "{} {} {}",
            if answer.is_some() { "hit" } else { "miss" },
            name,
            rr_type,
        );
        answer
    }

    /// Returns the currently published map. The map stays valid (and
    /// unchanged) however long the caller holds it.
    pub fn snapshot(&self) -> Arc<CacheMap> {
        self.published.load_full()
    }

    /// Recompiles the zone files of `source` and publishes the result.
    /// On failure the published map is left alone.
    pub fn reload(&self, source: &ZoneSource) -> Result<(), LoadError> {
        self.reload_with(|| zone::load(source))
    }

    /// Builds a new map with `build` and publishes it, unless `build`
    /// fails. Concurrent reloads run one at a time; lookups are never
    /// blocked.
    pub fn reload_with<F, E>(&self, build: F) -> Result<(), E>
    where
        F: FnOnce() -> Result<CacheMap, E>,
    {
        let _guard = self
            .reload_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match build() {
            Ok(map) => {
                info!(
                    "publishing {} answers (serial {}, previously {})",
                    map.len(),
                    map.serial(),
                    self.published.load().serial(),
                );
                map.log_summary();
                self.published.store(Arc::new(map));
                Ok(())
            }
            Err(error) => {
                warn!("reload failed; keeping the current answers");
                Err(error)
            }
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(CacheMap::default())
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Cache")
            .field("answers", &self.published.load().len())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{decode, Question, Writer};
    use crate::rr::{Rdata, Record, Ttl};
    use std::net::Ipv4Addr;
    use std::thread;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn a_answer(owner: &str, address: Ipv4Addr, ttl: u32) -> Answer {
        let owner = name(owner);
        let mut buf = [0; 512];
        let mut writer = Writer::new(&mut buf, 512).unwrap();
        writer.set_qr(true);
        writer.set_aa(true);
        writer
            .add_question(&Question::new(owner.clone(), Type::A))
            .unwrap();
        writer
            .add_answer(&Record::new(owner, Ttl::from(ttl), Rdata::A(address)))
            .unwrap();
        let len = writer.finish();
        Answer::new(&buf[..len])
    }

    fn map_of(generation: u32, names: &[&str]) -> CacheMap {
        let mut map = CacheMap::new(generation);
        for (i, owner) in names.iter().enumerate() {
            let address = Ipv4Addr::new(10, 0, generation as u8, i as u8);
            map.insert(Type::A, name(owner), a_answer(owner, address, generation));
        }
        map
    }

    #[test]
    fn patching_ids_touches_only_the_id() {
        let answer = a_answer("host.test", Ipv4Addr::new(192, 0, 2, 1), 60);
        let first = answer.to_response(0x1234);
        let second = answer.to_response(0xbeef);
        assert_eq!(&first[..2], &[0x12, 0x34]);
        assert_eq!(&second[..2], &[0xbe, 0xef]);
        assert_eq!(first[2..], second[2..]);
        assert_eq!(first[2..], answer.octets()[2..]);

        let mut buf = [0xff; 600];
        assert_eq!(answer.write_response(0xbeef, &mut buf), Some(answer.len()));
        assert_eq!(&buf[..answer.len()], &second[..]);
        assert_eq!(answer.write_response(1, &mut [0; 10]), None);
    }

    #[test]
    fn new_zeroes_the_id() {
        let mut octets = a_answer("host.test", Ipv4Addr::LOCALHOST, 1).to_response(7);
        octets[1] = 9;
        assert_eq!(&Answer::new(&octets).octets()[..2], &[0, 0]);
    }

    #[test]
    fn get_matches_names_case_insensitively() {
        let mut map = CacheMap::new(1);
        let answer = a_answer("www.test", Ipv4Addr::LOCALHOST, 5);
        map.insert(Type::A, name("www.test"), answer.clone());
        assert_eq!(map.get(Type::A, &name("WWW.test")), Some(&answer));
        assert_eq!(map.get(Type::MX, &name("www.test")), None);
        assert_eq!(map.get(Type::CNAME, &name("www.test")), None);
    }

    #[test]
    fn counts_are_per_type() {
        let mut map = map_of(1, &["a.test", "b.test"]);
        map.insert(
            Type::MX,
            name("a.test"),
            a_answer("a.test", Ipv4Addr::LOCALHOST, 1),
        );
        assert_eq!(map.len(), 3);
        assert_eq!(map.counts(), vec![(Type::A, 2), (Type::MX, 1)]);
    }

    #[test]
    fn failed_reload_keeps_current_answers() {
        let cache = Cache::new(map_of(1, &["a.test"]));
        let result: Result<(), &str> = cache.reload_with(|| Err("broken zone"));
        assert_eq!(result, Err("broken zone"));
        assert!(cache.get(Type::A, &name("a.test")).is_some());
        assert_eq!(cache.snapshot().serial(), 1);
    }

    #[test]
    fn concurrent_lookups_get_their_own_answers() {
        let names: Vec<String> = (0..8).map(|i| format!("host{}.test", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let cache = Arc::new(Cache::new(map_of(1, &refs)));

        let handles: Vec<_> = (0..64)
            .map(|t| {
                let cache = cache.clone();
                let owner = name(&names[t % names.len()]);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let answer = cache.get(Type::A, &owner).unwrap();
                        let decoded = decode(answer.octets()).unwrap();
                        assert_eq!(decoded.question.unwrap().qname, owner);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn readers_see_whole_generations() {
        let names = ["a.test", "b.test", "c.test", "d.test"];
        let cache = Arc::new(Cache::new(map_of(1, &names)));

        let reader = {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..2000 {
                    let map = cache.snapshot();
                    let generation = map.serial();
                    assert!(generation == 1 || generation == 2);
                    for owner in names {
                        let answer = map.get(Type::A, &name(owner)).unwrap();
                        let mut reader = Reader::try_from(answer.octets()).unwrap();
                        reader.read_question().unwrap();
                        let rr = reader.read_rr().unwrap();
                        assert_eq!(u32::from(rr.ttl), generation);
                    }
                }
            })
        };

        for i in 0..200 {
            let generation = 1 + (i % 2);
            let result: Result<(), ()> = cache.reload_with(|| Ok(map_of(generation, &names)));
            assert!(result.is_ok());
        }
        reader.join().unwrap();
    }
}
