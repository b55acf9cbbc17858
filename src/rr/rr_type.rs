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

//! Provides the [`Type`] structure for DNS RR types.

use std::fmt;
use std::str::FromStr;

/// Represents the RR type of a DNS record (or the QTYPE of a question).
///
/// On the wire this is an unsigned 16-bit integer, so `Type` is a thin
/// wrapper around [`u16`] with mnemonic [`Display`](fmt::Display) and
/// [`FromStr`] implementations. Values without a mnemonic use the
/// `TYPEnnn` form of RFC 3597 § 5.
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Type(u16);

macro_rules! rr_types {
    ($($mnemonic:ident = $value:literal,)*) => {
        impl Type {
            $(pub const $mnemonic: Type = Type($value);)*

            /// Returns the mnemonic of the type, if it has one.
            pub fn mnemonic(self) -> Option<&'static str> {
                match self {
                    $(Self::$mnemonic => Some(stringify!($mnemonic)),)*
                    _ => None,
                }
            }

            fn from_mnemonic(text: &str) -> Option<Self> {
                $(
                    if text.eq_ignore_ascii_case(stringify!($mnemonic)) {
                        return Some(Self::$mnemonic);
                    }
                )*
                None
            }
        }
    };
}

rr_types! {
    A = 1,
    NS = 2,
    CNAME = 5,
    SOA = 6,
    PTR = 12,
    MX = 15,
    TXT = 16,
    AAAA = 28,
    SRV = 33,
    OPT = 41,
    ANY = 255,
}

impl From<u16> for Type {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<Type> for u16 {
    fn from(rr_type: Type) -> Self {
        rr_type.0
    }
}

impl FromStr for Type {
    type Err = &'static str;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if let Some(rr_type) = Self::from_mnemonic(text) {
            Ok(rr_type)
        } else if text
            .get(0..4)
            .map_or(false, |prefix| prefix.eq_ignore_ascii_case("TYPE"))
        {
            text[4..]
                .parse::<u16>()
                .map(Self::from)
                .or(Err("type value is not a valid unsigned 16-bit integer"))
        } else {
            Err("unknown type")
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.mnemonic() {
            Some(mnemonic) => f.write_str(mnemonic),
            None => write!(f, "TYPE{}", self.0),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonics_round_trip() {
        for rr_type in [Type::A, Type::CNAME, Type::MX, Type::PTR, Type::SOA] {
            assert_eq!(rr_type.to_string().parse(), Ok(rr_type));
        }
        assert_eq!("cname".parse(), Ok(Type::CNAME));
    }

    #[test]
    fn unknown_types_use_rfc3597_form() {
        assert_eq!(Type::from(0xff00).to_string(), "TYPE65280");
        assert_eq!("TYPE15".parse(), Ok(Type::MX));
        assert!("TYPE65536".parse::<Type>().is_err());
        assert!("BOGUS".parse::<Type>().is_err());
    }
}
