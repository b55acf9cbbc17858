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

//! Parsing of zone entry lines.
//!
//! A zone file is a sequence of whitespace-delimited lines of the form
//!
//! ```text
//! <owner> <target> [flag ...]
//! ```
//!
//! where `<target>` is an IPv4 address, a hostname (with the `cname`
//! or `mx` flag), or the literal `nxdomain`, and the flags are `ptr`,
//! `cname`, `mx` and `ttl:<seconds>`. Everything after a `#` is a
//! comment. Owners and hostname targets without a dot are qualified
//! with the default domain.
//!
//! ```
//! use dpx::name::Name;
//! use dpx::zone::{parse_entries, Directive};
//!
//! let text = "mail 192.0.2.25 ptr ttl:60 # the mail host\n";
//! let entries = parse_entries(text, &"example.test".parse().unwrap()).unwrap();
//! assert_eq!(entries[0].owner, "mail.example.test".parse::<Name>().unwrap());
//! assert!(matches!(entries[0].directive, Directive::Address { ptr: true, .. }));
//! ```

use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use super::error::{ParseError, ParseErrorKind};
use crate::name::Name;
use crate::rr::Ttl;

/// One parsed zone line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ZoneEntry {
    /// The file the entry was read from, when it came from a file.
    pub file: Option<Arc<Path>>,
    pub line: usize,
    pub owner: Name,
    pub ttl: Option<Ttl>,
    pub directive: Directive,
}

impl ZoneEntry {
    pub fn location(&self) -> Location {
        Location {
            file: self.file.clone(),
            line: self.line,
        }
    }
}

/// Where a zone entry was declared, for error messages.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Location {
    pub file: Option<Arc<Path>>,
    pub line: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}", file.display(), self.line),
            None => write!(f, "line {}", self.line),
        }
    }
}

/// What a [`ZoneEntry`] declares about its owner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Directive {
    /// The owner has this address; with `ptr`, the address also maps
    /// back to the owner.
    Address { address: Ipv4Addr, ptr: bool },

    /// The owner is an alias for another name.
    Alias(Name),

    /// Mail for the owner goes to this exchange.
    MailExchange(Name),

    /// The owner does not exist.
    NxDomain,
}

/// Parses every line of `text`, qualifying dot-less names with
/// `default_domain`. Parsing stops at the first bad line. The entries
/// have no `file`; the caller fills it in.
pub fn parse_entries(text: &str, default_domain: &Name) -> Result<Vec<ZoneEntry>, ParseError> {
    let mut entries = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line_number = index + 1;
        match parse_line(line, default_domain) {
            Ok(Some(entry)) => entries.push(ZoneEntry {
                line: line_number,
                ..entry
            }),
            Ok(None) => (),
            Err(kind) => {
                return Err(ParseError {
                    line: line_number,
                    kind,
                })
            }
        }
    }
    Ok(entries)
}

/// Parses a single line. Blank and comment-only lines yield `None`.
/// The returned entry's `line` is zero.
fn parse_line(line: &str, default_domain: &Name) -> Result<Option<ZoneEntry>, ParseErrorKind> {
    let content = line.split('#').next().unwrap_or_default();
    let mut fields = content.split_whitespace();
    let owner = match fields.next() {
        Some(owner) => owner,
        None => return Ok(None),
    };
    let target = fields.next().ok_or(ParseErrorKind::MissingTarget)?;

    if owner.parse::<Ipv4Addr>().is_ok() {
        return Err(ParseErrorKind::OwnerIsAddress);
    }
    let owner = qualify(owner, default_domain)?;

    let mut flags = Flags::default();
    for flag in fields {
        flags.set(flag)?;
    }

    let directive = if target.eq_ignore_ascii_case("nxdomain") {
        if !flags.is_empty() {
            return Err(ParseErrorKind::NxDomainWithFlags);
        }
        Directive::NxDomain
    } else if let Ok(address) = target.parse::<Ipv4Addr>() {
        if flags.cname || flags.mx {
            return Err(ParseErrorKind::TargetNeedsFlag);
        }
        Directive::Address {
            address,
            ptr: flags.ptr,
        }
    } else if flags.ptr {
        return Err(ParseErrorKind::PtrNeedsAddress);
    } else if flags.cname {
        Directive::Alias(qualify(target, default_domain)?)
    } else if flags.mx {
        Directive::MailExchange(qualify(target, default_domain)?)
    } else {
        return Err(ParseErrorKind::TargetNeedsFlag);
    };

    Ok(Some(ZoneEntry {
        file: None,
        line: 0,
        owner,
        ttl: flags.ttl,
        directive,
    }))
}

/// Validates a hostname and converts it to a [`Name`], appending
/// `default_domain` if it has no dot.
fn qualify(text: &str, default_domain: &Name) -> Result<Name, ParseErrorKind> {
    let valid = text
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-');
    if !valid {
        return Err(ParseErrorKind::InvalidHostname(text.into()));
    }
    let result = if text.contains('.') || default_domain.is_root() {
        text.parse()
    } else {
        format!("{}.{}", text, default_domain).parse()
    };
    result.map_err(ParseErrorKind::InvalidName)
}

////////////////////////////////////////////////////////////////////////
// FLAGS                                                              //
////////////////////////////////////////////////////////////////////////

#[derive(Default)]
struct Flags {
    ptr: bool,
    cname: bool,
    mx: bool,
    ttl: Option<Ttl>,
}

impl Flags {
    fn is_empty(&self) -> bool {
        !(self.ptr || self.cname || self.mx || self.ttl.is_some())
    }

    fn set(&mut self, flag: &str) -> Result<(), ParseErrorKind> {
        let duplicate = || ParseErrorKind::DuplicateFlag(flag.into());
        if let Some(ttl) = flag.strip_prefix("ttl:") {
            if self.ttl.is_some() {
                return Err(duplicate());
            }
            self.ttl = Some(ttl.parse().map_err(ParseErrorKind::InvalidTtl)?);
            return Ok(());
        }

        let (slot, name) = match flag {
            "ptr" => (&mut self.ptr, "ptr"),
            "cname" => (&mut self.cname, "cname"),
            "mx" => (&mut self.mx, "mx"),
            _ => return Err(ParseErrorKind::UnknownFlag(flag.into())),
        };
        if *slot {
            return Err(duplicate());
        }
        *slot = true;

        for (a, b) in [("ptr", "cname"), ("mx", "ptr"), ("mx", "cname")] {
            if (a == name || b == name) && self.get(a) && self.get(b) {
                return Err(ParseErrorKind::ConflictingFlags(a, b));
            }
        }
        Ok(())
    }

    fn get(&self, name: &str) -> bool {
        match name {
            "ptr" => self.ptr,
            "cname" => self.cname,
            "mx" => self.mx,
            _ => false,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
