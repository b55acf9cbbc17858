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

//! Compilation of zone entries into prebuilt answers.
//!
//! Compilation runs in a fixed order, since later steps depend on the
//! address records built by earlier ones:
//!
//! 1. Entries are partitioned by directive, rejecting duplicates and
//!    names that are declared incompatibly (an alias, or a nonexistent
//!    name, cannot also have other data).
//! 2. Each owner with addresses gets an A answer.
//! 3. Each alias chain is followed to the address it ends at. A chain
//!    that revisits a name, or that ends at a name with no address, is
//!    an error.
//! 4. Each owner with mail exchanges gets an MX answer, with the
//!    exchanges' addresses in the additional section. Every exchange
//!    must have an address.
//! 5. Each address with `ptr` owners gets a PTR answer under its
//!    `in-addr.arpa.` name.
//! 6. Each nonexistent name gets an NXDOMAIN answer with an SOA from
//!    the [`authority`](super::authority) table.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use super::authority;
use super::entry::{Directive, ZoneEntry};
use super::error::CompileError;
use crate::cache::{Answer, CacheMap};
use crate::message::constants::EDNS_UDP_PAYLOAD_SIZE;
use crate::message::{writer, Question, Rcode, Writer};
use crate::name::Name;
use crate::rr::{Rdata, Record, Ttl, Type};

/// The preference given to every mail exchange.
pub const MX_PREFERENCE: u16 = 10;

/// Parameters of a compilation run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CompileSettings {
    /// The SOA serial of synthesized authority records.
    pub serial: u32,

    /// The TTL of entries without a `ttl:` flag.
    pub default_ttl: Ttl,
}

/// Compiles `entries` into a [`CacheMap`]. Any problem aborts the whole
/// batch.
pub fn compile(entries: &[ZoneEntry], settings: CompileSettings) -> Result<CacheMap, CompileError> {
    let partition = Partition::new(entries)?;
    let compiler = Compiler {
        partition,
        settings,
    };
    let mut map = CacheMap::new(settings.serial);
    compiler.addresses(&mut map)?;
    compiler.aliases(&mut map)?;
    compiler.exchanges(&mut map)?;
    compiler.pointers(&mut map)?;
    compiler.nonexistent(&mut map)?;
    Ok(map)
}

////////////////////////////////////////////////////////////////////////
// PARTITIONING                                                       //
////////////////////////////////////////////////////////////////////////

/// Entries grouped by owner and directive. Each group keeps file order,
/// and `owners` records the order in which owners first appear, so
/// compilation (and the first error reported) is deterministic.
#[derive(Default)]
struct Partition<'a> {
    owners: Vec<&'a Name>,
    addresses: HashMap<&'a Name, Vec<(Ipv4Addr, &'a ZoneEntry)>>,
    aliases: HashMap<&'a Name, (&'a Name, &'a ZoneEntry)>,
    exchanges: HashMap<&'a Name, Vec<(&'a Name, &'a ZoneEntry)>>,
    nonexistent: HashMap<&'a Name, &'a ZoneEntry>,
    pointers: Vec<(Ipv4Addr, Vec<&'a ZoneEntry>)>,
}

impl<'a> Partition<'a> {
    fn new(entries: &'a [ZoneEntry]) -> Result<Self, CompileError> {
        let mut partition = Self::default();
        for entry in entries {
            partition.add(entry)?;
        }
        Ok(partition)
    }

    fn add(&mut self, entry: &'a ZoneEntry) -> Result<(), CompileError> {
        let owner = &entry.owner;
        let duplicate = || CompileError::Duplicate {
            owner: owner.clone(),
            at: entry.location(),
        };
        let conflict = || CompileError::Conflict {
            owner: owner.clone(),
            at: entry.location(),
        };

        let is_alias = self.aliases.contains_key(owner);
        let is_nonexistent = self.nonexistent.contains_key(owner);
        let has_data = self.addresses.contains_key(owner) || self.exchanges.contains_key(owner);
        if !(is_alias || is_nonexistent || has_data) {
            self.owners.push(owner);
        }

        match &entry.directive {
            Directive::Address { address, ptr } => {
                if is_alias || is_nonexistent {
                    return Err(conflict());
                }
                let group = self.addresses.entry(owner).or_default();
                if group.iter().any(|(a, _)| a == address) {
                    return Err(duplicate());
                }
                group.push((*address, entry));
                if *ptr {
                    match self.pointers.iter_mut().find(|(a, _)| a == address) {
                        Some((_, owners)) => owners.push(entry),
                        None => self.pointers.push((*address, vec![entry])),
                    }
                }
            }
            Directive::Alias(target) => {
                if let Some((previous, _)) = self.aliases.get(owner) {
                    return Err(if *previous == target {
                        duplicate()
                    } else {
                        conflict()
                    });
                } else if is_nonexistent || has_data {
                    return Err(conflict());
                }
                self.aliases.insert(owner, (target, entry));
            }
            Directive::MailExchange(exchange) => {
                if is_alias || is_nonexistent {
                    return Err(conflict());
                }
                let group = self.exchanges.entry(owner).or_default();
                if group.iter().any(|(x, _)| *x == exchange) {
                    return Err(duplicate());
                }
                group.push((exchange, entry));
            }
            Directive::NxDomain => {
                if is_nonexistent {
                    return Err(duplicate());
                } else if is_alias || has_data {
                    return Err(conflict());
                }
                self.nonexistent.insert(owner, entry);
            }
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// COMPILATION STEPS                                                  //
////////////////////////////////////////////////////////////////////////

struct Compiler<'a> {
    partition: Partition<'a>,
    settings: CompileSettings,
}

impl Compiler<'_> {
    fn ttl_of(&self, entry: &ZoneEntry) -> Ttl {
        entry.ttl.unwrap_or(self.settings.default_ttl)
    }

    /// Returns the A records of `owner`, or `None` if it has no
    /// addresses.
    fn address_records(&self, owner: &Name) -> Option<Vec<Record>> {
        let group = self.partition.addresses.get(owner)?;
        Some(
            group
                .iter()
                .map(|(address, entry)| {
                    Record::new(owner.clone(), self.ttl_of(entry), Rdata::A(*address))
                })
                .collect(),
        )
    }

    fn addresses(&self, map: &mut CacheMap) -> Result<(), CompileError> {
        for &owner in &self.partition.owners {
            if let Some(records) = self.address_records(owner) {
                let answer = AnswerBuilder::new(owner, Type::A)
                    .answers(records)
                    .build()?;
                map.insert(Type::A, owner.clone(), answer);
            }
        }
        Ok(())
    }

    fn aliases(&self, map: &mut CacheMap) -> Result<(), CompileError> {
        for &owner in &self.partition.owners {
            if self.partition.aliases.contains_key(owner) {
                // CNAME and A queries get the same chain, each under
                // its own question.
                let records = self.follow_chain(owner)?;
                for qtype in [Type::CNAME, Type::A] {
                    let answer = AnswerBuilder::new(owner, qtype)
                        .answers(records.clone())
                        .build()?;
                    map.insert(qtype, owner.clone(), answer);
                }
            }
        }
        Ok(())
    }

    /// Follows the alias chain starting at `owner`, returning its CNAME
    /// records in order followed by the A records it ends at.
    fn follow_chain(&self, owner: &Name) -> Result<Vec<Record>, CompileError> {
        let mut records = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(owner);
        let mut current = owner;

        while let Some(&(target, entry)) = self.partition.aliases.get(current) {
            records.push(Record::new(
                current.clone(),
                self.ttl_of(entry),
                Rdata::Cname(target.clone()),
            ));
            if !visited.insert(target) {
                return Err(CompileError::CnameLoop {
                    owner: owner.clone(),
                    repeated: target.clone(),
                });
            }
            match self.address_records(target) {
                Some(addresses) => {
                    records.extend(addresses);
                    return Ok(records);
                }
                None if self.partition.aliases.contains_key(target) => current = target,
                None => {
                    return Err(CompileError::DanglingCname {
                        owner: owner.clone(),
                        target: target.clone(),
                        at: entry.location(),
                    })
                }
            }
        }
        Ok(records)
    }

    fn exchanges(&self, map: &mut CacheMap) -> Result<(), CompileError> {
        for &owner in &self.partition.owners {
            let group = match self.partition.exchanges.get(owner) {
                Some(group) => group,
                None => continue,
            };
            let mut records = Vec::new();
            let mut additional = Vec::new();
            for &(exchange, entry) in group {
                let addresses = self.address_records(exchange).ok_or_else(|| {
                    CompileError::MissingExchangeAddress {
                        owner: owner.clone(),
                        exchange: exchange.clone(),
                        at: entry.location(),
                    }
                })?;
                records.push(Record::new(
                    owner.clone(),
                    self.ttl_of(entry),
                    Rdata::Mx {
                        preference: MX_PREFERENCE,
                        exchange: exchange.clone(),
                    },
                ));
                additional.extend(addresses);
            }
            let answer = AnswerBuilder::new(owner, Type::MX)
                .answers(records)
                .additional(additional)
                .build()?;
            map.insert(Type::MX, owner.clone(), answer);
        }
        Ok(())
    }

    fn pointers(&self, map: &mut CacheMap) -> Result<(), CompileError> {
        for (address, entries) in &self.partition.pointers {
            let reverse = Name::in_addr_arpa(*address);
            let records = entries
                .iter()
                .map(|entry| {
                    Record::new(
                        reverse.clone(),
                        self.ttl_of(entry),
                        Rdata::Ptr(entry.owner.clone()),
                    )
                })
                .collect();
            let answer = AnswerBuilder::new(&reverse, Type::PTR)
                .answers(records)
                .build()?;
            map.insert(Type::PTR, reverse, answer);
        }
        Ok(())
    }

    fn nonexistent(&self, map: &mut CacheMap) -> Result<(), CompileError> {
        for &owner in &self.partition.owners {
            if self.partition.nonexistent.contains_key(owner) {
                let (soa_owner, soa) = authority::soa_for(owner, self.settings.serial);
                let record = Record::new(
                    soa_owner,
                    self.settings.default_ttl,
                    Rdata::Soa(Box::new(soa)),
                );
                let answer = AnswerBuilder::new(owner, Type::A)
                    .rcode(Rcode::NxDomain)
                    .authority(vec![record])
                    .build()?;
                map.insert(Type::A, owner.clone(), answer);
            }
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// ANSWER SERIALIZATION                                               //
////////////////////////////////////////////////////////////////////////

/// Collects the sections of one answer and serializes them.
struct AnswerBuilder {
    question: Question,
    rcode: Rcode,
    answers: Vec<Record>,
    authority: Vec<Record>,
    additional: Vec<Record>,
}

impl AnswerBuilder {
    fn new(qname: &Name, qtype: Type) -> Self {
        Self {
            question: Question::new(qname.clone(), qtype),
            rcode: Rcode::NoError,
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    fn rcode(mut self, rcode: Rcode) -> Self {
        self.rcode = rcode;
        self
    }

    fn answers(mut self, records: Vec<Record>) -> Self {
        self.answers = records;
        self
    }

    fn authority(mut self, records: Vec<Record>) -> Self {
        self.authority = records;
        self
    }

    fn additional(mut self, records: Vec<Record>) -> Self {
        self.additional = records;
        self
    }

    /// Serializes the answer. Answers are limited to what fits in an
    /// EDNS UDP payload, and carry an OPT record advertising that size.
    fn build(self) -> Result<Answer, CompileError> {
        let mut buf = [0; EDNS_UDP_PAYLOAD_SIZE as usize];
        let len = self.write(&mut buf).map_err(|error| CompileError::AnswerTooLarge {
            owner: self.question.qname.clone(),
            error,
        })?;
        Ok(Answer::new(&buf[..len]))
    }

    fn write(&self, buf: &mut [u8]) -> writer::Result<usize> {
        let mut writer = Writer::new(buf, EDNS_UDP_PAYLOAD_SIZE as usize)?;
        writer.set_qr(true);
        writer.set_aa(true);
        writer.set_rd(true);
        writer.set_ra(true);
        writer.set_rcode(self.rcode);
        writer.set_edns(EDNS_UDP_PAYLOAD_SIZE)?;
        writer.add_question(&self.question)?;
        for record in &self.answers {
            writer.add_answer(record)?;
        }
        for record in &self.authority {
            writer.add_authority(record)?;
        }
        for record in &self.additional {
            writer.add_additional(record)?;
        }
        Ok(writer.finish())
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{decode, Reader};
    use crate::zone::{parse_entries, Location};

    const SETTINGS: CompileSettings = CompileSettings {
        serial: 1_700_000_000,
        default_ttl: Ttl::DEFAULT,
    };

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn line(line: usize) -> Location {
        Location { file: None, line }
    }

    fn compile_text(text: &str) -> Result<CacheMap, CompileError> {
        let entries = parse_entries(text, &name("example.test")).unwrap();
        compile(&entries, SETTINGS)
    }

    /// Reads every record of an answer as (section, owner, rdata).
    fn records_of(answer: &Answer) -> Vec<(Name, Rdata)> {
        let mut reader = Reader::try_from(answer.octets()).unwrap();
        reader.read_question().unwrap();
        let mut records = Vec::new();
        while !reader.at_eom() {
            let rr = reader.read_rr().unwrap();
            if let Some(rdata) = rr.rdata {
                records.push((rr.owner, rdata));
            }
        }
        records
    }

    #[test]
    fn compiles_cname_chain() {
        let map = compile_text(
            "a.com b.com cname\n\
             b.com c.com cname\n\
             c.com 1.2.3.4\n",
        )
        .unwrap();
        let answer = map.get(Type::CNAME, &name("a.com")).unwrap();
        let decoded = decode(answer.octets()).unwrap();
        let question = decoded.question.unwrap();
        assert_eq!(question.qname, name("a.com"));
        assert_eq!(question.qtype, Type::CNAME);
        assert_eq!(decoded.header.ancount, 3);
        assert!(decoded.header.aa);
        assert_eq!(
            records_of(answer),
            vec![
                (name("a.com"), Rdata::Cname(name("b.com"))),
                (name("b.com"), Rdata::Cname(name("c.com"))),
                (name("c.com"), Rdata::A(Ipv4Addr::new(1, 2, 3, 4))),
            ]
        );

        // The intermediate alias has its own, shorter chain.
        let answer = map.get(Type::CNAME, &name("b.com")).unwrap();
        assert_eq!(answer.ancount(), 2);
    }

    #[test]
    fn alias_answers_echo_the_query_type() {
        let map = compile_text("www 192.0.2.1\nalias www cname\n").unwrap();
        let owner = name("alias.example.test");
        let by_cname = map.get(Type::CNAME, &owner).unwrap();
        let by_a = map.get(Type::A, &owner).unwrap();

        let qtype_of = |answer: &Answer| decode(answer.octets()).unwrap().question.unwrap().qtype;
        assert_eq!(qtype_of(by_cname), Type::CNAME);
        assert_eq!(qtype_of(by_a), Type::A);
        assert_eq!(records_of(by_cname), records_of(by_a));
        assert_eq!(records_of(by_a).len(), 2);
    }

    #[test]
    fn rejects_dangling_cname() {
        assert_eq!(
            compile_text("a.com b.com cname\nb.com c.com cname\n").unwrap_err(),
            CompileError::DanglingCname {
                owner: name("a.com"),
                target: name("c.com"),
                at: line(2),
            }
        );
    }

    #[test]
    fn rejects_cname_loops() {
        assert_eq!(
            compile_text("a.com a.com cname\n").unwrap_err(),
            CompileError::CnameLoop {
                owner: name("a.com"),
                repeated: name("a.com"),
            }
        );
        assert_eq!(
            compile_text("a.com b.com cname\nb.com c.com cname\nc.com a.com cname\n")
                .unwrap_err(),
            CompileError::CnameLoop {
                owner: name("a.com"),
                repeated: name("a.com"),
            }
        );
    }

    #[test]
    fn compiles_nxdomain() {
        let map = compile_text("nosuch.com nxdomain\n").unwrap();
        let answer = map.get(Type::A, &name("nosuch.com")).unwrap();
        let decoded = decode(answer.octets()).unwrap();
        assert_eq!(decoded.header.rcode, Rcode::NxDomain);
        assert_eq!(decoded.header.ancount, 0);
        assert_eq!(decoded.header.nscount, 1);
        assert_eq!(decoded.header.arcount, 1);

        let records = records_of(answer);
        assert_eq!(records.len(), 1);
        let (owner, rdata) = &records[0];
        assert_eq!(owner, &name("com"));
        match rdata {
            Rdata::Soa(soa) => {
                assert_eq!(soa.mname, name("a.gtld-servers.net"));
                assert_eq!(soa.serial, SETTINGS.serial);
                assert_eq!(soa.refresh, authority::REFRESH);
            }
            _ => panic!("expected an SOA record"),
        }
    }

    #[test]
    fn compiles_mx_with_additional_addresses() {
        let map = compile_text(
            "mail 192.0.2.25\n\
             mail 192.0.2.26\n\
             example.test mail mx ttl:60\n",
        )
        .unwrap();
        let answer = map.get(Type::MX, &name("example.test")).unwrap();
        let decoded = decode(answer.octets()).unwrap();
        assert_eq!(decoded.header.ancount, 1);
        assert_eq!(decoded.header.arcount, 3);
        assert_eq!(
            records_of(answer),
            vec![
                (
                    name("example.test"),
                    Rdata::Mx {
                        preference: MX_PREFERENCE,
                        exchange: name("mail.example.test"),
                    }
                ),
                (
                    name("mail.example.test"),
                    Rdata::A(Ipv4Addr::new(192, 0, 2, 25))
                ),
                (
                    name("mail.example.test"),
                    Rdata::A(Ipv4Addr::new(192, 0, 2, 26))
                ),
            ]
        );
    }

    #[test]
    fn rejects_mx_without_address() {
        assert_eq!(
            compile_text("example.test mail mx\n").unwrap_err(),
            CompileError::MissingExchangeAddress {
                owner: name("example.test"),
                exchange: name("mail.example.test"),
                at: line(1),
            }
        );
    }

    #[test]
    fn compiles_ptr() {
        let map = compile_text("host 192.0.2.1 ptr\nalso 192.0.2.1 ptr\n").unwrap();
        let reverse = name("1.2.0.192.in-addr.arpa");
        let answer = map.get(Type::PTR, &reverse).unwrap();
        assert_eq!(
            records_of(answer),
            vec![
                (reverse.clone(), Rdata::Ptr(name("host.example.test"))),
                (reverse.clone(), Rdata::Ptr(name("also.example.test"))),
            ]
        );
        assert!(map.get(Type::A, &name("host.example.test")).is_some());
    }

    #[test]
    fn rejects_conflicts_and_duplicates() {
        assert_eq!(
            compile_text("a.com 192.0.2.1\na.com b.com cname\n").unwrap_err(),
            CompileError::Conflict {
                owner: name("a.com"),
                at: line(2),
            }
        );
        assert_eq!(
            compile_text("a.com nxdomain\na.com 192.0.2.1\n").unwrap_err(),
            CompileError::Conflict {
                owner: name("a.com"),
                at: line(2),
            }
        );
        assert_eq!(
            compile_text("a.com 192.0.2.1\na.com 192.0.2.1 ptr\n").unwrap_err(),
            CompileError::Duplicate {
                owner: name("a.com"),
                at: line(2),
            }
        );
    }

    #[test]
    fn shared_suffixes_are_compressed() {
        let map = compile_text("www.example.test 192.0.2.1\n").unwrap();
        let answer = map.get(Type::A, &name("www.example.test")).unwrap();
        // Header, question (18 + 4), answer with a pointer owner
        // (2 + 10 + 4), OPT record.
        assert_eq!(answer.len(), 12 + 22 + 16 + 11);
        let owner = name("www.example.test");
        let occurrences = answer
            .octets()
            .windows(owner.wire_repr().len())
            .filter(|w| *w == owner.wire_repr())
            .count();
        assert_eq!(occurrences, 1);
    }

    #[test]
    fn compiled_answers_use_default_and_explicit_ttls() {
        let map = compile_text("a.com 192.0.2.1\nb.com 192.0.2.2 ttl:60\n").unwrap();
        let ttl_of = |owner: &str| {
            let answer = map.get(Type::A, &name(owner)).unwrap();
            let mut reader = Reader::try_from(answer.octets()).unwrap();
            reader.read_question().unwrap();
            reader.read_rr().unwrap().ttl
        };
        assert_eq!(ttl_of("a.com"), Ttl::DEFAULT);
        assert_eq!(ttl_of("b.com"), Ttl::from(60));
    }
}
