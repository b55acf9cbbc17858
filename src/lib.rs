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

//! A caching DNS proxy.
//!
//! Locally defined records are compiled ahead of time into complete,
//! serialized response messages (see [`zone`]) and published in a
//! [`Cache`](cache::Cache). Queries the cache can answer are served by
//! copying the prebuilt response and patching in the query ID; all
//! other queries are relayed to upstream resolvers, or denied when
//! proxying is disabled. See [`server::Server`] for the running
//! service.

pub mod cache;
pub mod class;
pub mod io;
pub mod message;
pub mod name;
pub mod pool;
pub mod rr;
pub mod server;
pub mod zone;
