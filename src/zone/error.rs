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

//! Error types for zone loading.
//!
//! Errors are layered the way loading is: a [`ParseError`] describes
//! one bad line, a [`CompileError`] a problem between lines (dangling
//! aliases, missing mail exchange addresses, conflicts), and a
//! [`LoadError`] wraps either together with the file involved, or an
//! I/O failure.

use std::fmt;
use std::io;
use std::path::PathBuf;

use super::entry::Location;
use crate::message::writer;
use crate::name::{self, Name};

////////////////////////////////////////////////////////////////////////
// PARSE ERRORS                                                       //
////////////////////////////////////////////////////////////////////////

/// A syntax or validation error on one line of a zone file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseError {
    pub line: usize,
    pub kind: ParseErrorKind,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at line {}", self.kind, self.line)
    }
}

impl std::error::Error for ParseError {}

/// Kinds of zone line errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseErrorKind {
    ConflictingFlags(&'static str, &'static str),
    DuplicateFlag(Box<str>),
    InvalidHostname(Box<str>),
    InvalidName(name::Error),
    InvalidTtl(&'static str),
    MissingTarget,
    NxDomainWithFlags,
    OwnerIsAddress,
    PtrNeedsAddress,
    TargetNeedsFlag,
    UnknownFlag(Box<str>),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ConflictingFlags(a, b) => write!(f, "flags {a} and {b} cannot be combined"),
            Self::DuplicateFlag(flag) => write!(f, "flag {flag} is given twice"),
            Self::InvalidHostname(text) => write!(f, "{text:?} is not a valid hostname"),
            Self::InvalidName(error) => write!(f, "invalid name: {error}"),
            Self::InvalidTtl(reason) => write!(f, "invalid TTL: {reason}"),
            Self::MissingTarget => f.write_str("expected an owner and a target"),
            Self::NxDomainWithFlags => f.write_str("nxdomain takes no flags"),
            Self::OwnerIsAddress => f.write_str("owner is an IPv4 address"),
            Self::PtrNeedsAddress => f.write_str("the ptr flag needs an IPv4 target"),
            Self::TargetNeedsFlag => {
                f.write_str("IPv4 targets cannot be aliases or exchanges; hostname targets need cname or mx")
            }
            Self::UnknownFlag(flag) => write!(f, "unknown flag {flag:?}"),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// COMPILE ERRORS                                                     //
////////////////////////////////////////////////////////////////////////

/// An error found while compiling a batch of parsed zone entries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CompileError {
    /// An answer did not fit in a message.
    AnswerTooLarge { owner: Name, error: writer::Error },

    /// An alias chain starting at `owner` revisits `repeated`.
    CnameLoop { owner: Name, repeated: Name },

    /// A name is an alias but also has other data, or is declared
    /// nonexistent but also has data.
    Conflict { owner: Name, at: Location },

    /// An alias chain starting at `owner` ends at `target`, which has no
    /// address.
    DanglingCname {
        owner: Name,
        target: Name,
        at: Location,
    },

    /// The same record is declared twice.
    Duplicate { owner: Name, at: Location },

    /// A mail exchange has no address.
    MissingExchangeAddress {
        owner: Name,
        exchange: Name,
        at: Location,
    },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::AnswerTooLarge { owner, error } => {
                write!(f, "answer for {owner} does not fit in a message: {error}")
            }
            Self::CnameLoop { owner, repeated } => {
                write!(f, "alias chain starting at {owner} loops back to {repeated}")
            }
            Self::Conflict { owner, at } => write!(
                f,
                "{owner} at {at} conflicts with another entry for the same name"
            ),
            Self::DanglingCname { owner, target, at } => write!(
                f,
                "alias chain starting at {owner} ({at}) ends at {target}, which has no A record"
            ),
            Self::Duplicate { owner, at } => write!(f, "duplicate entry for {owner} at {at}"),
            Self::MissingExchangeAddress {
                owner,
                exchange,
                at,
            } => write!(
                f,
                "mail exchange {exchange} for {owner} ({at}) has no A record"
            ),
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::AnswerTooLarge { error, .. } => Some(error),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// LOAD ERRORS                                                        //
////////////////////////////////////////////////////////////////////////

/// An error loading a set of zone files into a cache map.
#[derive(Debug)]
pub enum LoadError {
    Io { path: PathBuf, error: io::Error },
    Parse { path: PathBuf, error: ParseError },
    Compile(CompileError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io { path, .. } => write!(f, "failed to read {}", path.display()),
            Self::Parse { path, .. } => write!(f, "failed to parse {}", path.display()),
            Self::Compile(_) => f.write_str("failed to compile zone entries"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { error, .. } => Some(error),
            Self::Parse { error, .. } => Some(error),
            Self::Compile(error) => Some(error),
        }
    }
}

impl From<CompileError> for LoadError {
    fn from(error: CompileError) -> Self {
        Self::Compile(error)
    }
}
