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

//! Reference SOA data for synthesized NXDOMAIN answers.
//!
//! A name declared `nxdomain` is answered with an authority SOA whose
//! owner is the name's top-level domain. Only a handful of TLDs have
//! their own reference servers; everything else borrows those of
//! `com.`.

use lazy_static::lazy_static;

use crate::name::Name;
use crate::rr::Soa;

pub const REFRESH: u32 = 1800;
pub const RETRY: u32 = 900;
pub const EXPIRE: u32 = 604800;
pub const MINIMUM: u32 = 86400;

struct Authority {
    tld: &'static str,
    mname: Name,
    rname: Name,
}

lazy_static! {
    static ref AUTHORITIES: [Authority; 4] = [
        Authority {
            tld: "com",
            mname: "a.gtld-servers.net.".parse().unwrap(),
            rname: "nstld.verisign-grs.com.".parse().unwrap(),
        },
        Authority {
            tld: "org",
            mname: "a0.org.afilias-nst.info.".parse().unwrap(),
            rname: "hostmaster.donuts.email.".parse().unwrap(),
        },
        Authority {
            tld: "cz",
            mname: "a.ns.nic.cz.".parse().unwrap(),
            rname: "hostmaster.nic.cz.".parse().unwrap(),
        },
        Authority {
            tld: "au",
            mname: "q.au.".parse().unwrap(),
            rname: "hostmaster.auda.org.au.".parse().unwrap(),
        },
    ];
}

/// Returns the owner and data of the SOA record that denies the
/// existence of `name`. The owner is the top-level domain of `name`
/// (the root for the root itself).
pub fn soa_for(name: &Name, serial: u32) -> (Name, Soa) {
    let owner = name.top_level_domain().unwrap_or_else(Name::root);
    let tld = owner.label(0);
    let authority = AUTHORITIES
        .iter()
        .find(|a| a.tld.as_bytes() == tld)
        .unwrap_or(&AUTHORITIES[0]);
    let soa = Soa {
        mname: authority.mname.clone(),
        rname: authority.rname.clone(),
        serial,
        refresh: REFRESH,
        retry: RETRY,
        expire: EXPIRE,
        minimum: MINIMUM,
    };
    (owner, soa)
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
    fn known_tlds_have_their_own_servers() {
        let (owner, soa) = soa_for(&name("nosuch.example.cz"), 7);
        assert_eq!(owner, name("cz"));
        assert_eq!(soa.mname, name("a.ns.nic.cz"));
        assert_eq!(soa.serial, 7);
        assert_eq!(soa.minimum, MINIMUM);
    }

    #[test]
    fn unknown_tlds_use_com_servers() {
        let (owner, soa) = soa_for(&name("printer.lan"), 1);
        assert_eq!(owner, name("lan"));
        assert_eq!(soa.mname, name("a.gtld-servers.net"));
        assert_eq!(soa.rname, name("nstld.verisign-grs.com"));
    }
}
