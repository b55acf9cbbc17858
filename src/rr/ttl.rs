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

//! Provides the [`Ttl`] structure for DNS RR TTLs.

use std::fmt;
use std::str::FromStr;

/// The time to live (TTL) of a DNS record, in seconds.
///
/// [RFC 2181 § 8] restricts TTLs to 0 through 2³¹ - 1. A `Ttl` never
/// holds a value with the most significant bit set; converting such a
/// value with `Ttl::from(u32)` yields zero, which is how such a TTL
/// must be treated when received.
///
/// [RFC 2181 § 8]: https://datatracker.ietf.org/doc/html/rfc2181#section-8
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Ttl(u32);

impl Ttl {
    /// The TTL given to zone records that do not carry a `ttl:` flag,
    /// unless configured otherwise.
    pub const DEFAULT: Self = Self(300);
}

impl From<u32> for Ttl {
    fn from(raw: u32) -> Self {
        if raw > i32::MAX as u32 {
            Self(0)
        } else {
            Self(raw)
        }
    }
}

impl From<Ttl> for u32 {
    fn from(ttl: Ttl) -> Self {
        ttl.0
    }
}

impl Default for Ttl {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl FromStr for Ttl {
    type Err = &'static str;

    /// Parses a decimal number of seconds. Unlike `Ttl::from(u32)`,
    /// out-of-range values are rejected rather than zeroed.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text.parse::<u32>() {
            Ok(raw) if raw <= i32::MAX as u32 => Ok(Self(raw)),
            Ok(_) => Err("TTL is larger than 2147483647"),
            Err(_) => Err("TTL is not a decimal number of seconds"),
        }
    }
}

impl fmt::Debug for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_wire_ttls_become_zero() {
        assert_eq!(u32::from(Ttl::from(23)), 23);
        assert_eq!(u32::from(Ttl::from(i32::MAX as u32)), i32::MAX as u32);
        assert_eq!(u32::from(Ttl::from(i32::MAX as u32 + 1)), 0);
    }

    #[test]
    fn from_str_rejects_out_of_range() {
        assert_eq!("3600".parse(), Ok(Ttl::from(3600)));
        assert!("2147483648".parse::<Ttl>().is_err());
        assert!("-1".parse::<Ttl>().is_err());
        assert!("1h".parse::<Ttl>().is_err());
    }
}
