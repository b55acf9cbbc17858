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

//! Background producers for the request path.
//!
//! A request task should not have to allocate its buffers or decide
//! which upstream to ask. The pools in this module do that work ahead
//! of time in producer tasks, which keep bounded queues topped up:
//!
//! * a [`PacketPool`] supplies zero-filled message buffers, and
//! * a [`DialerPool`] supplies the address of the next upstream
//!   resolver to try, skipping upstreams whose circuit breaker is open.
//!
//! Buffers are handed out and never returned; a request task owns its
//! buffer until it finishes. Producers exit once their pool is dropped.

mod dialer;
mod packet;

pub use dialer::{Breaker, DialerPool, UpstreamHealth};
pub use packet::PacketPool;

/// The default number of items a pool keeps ready.
pub const DEFAULT_POOL_CAPACITY: usize = 64;
