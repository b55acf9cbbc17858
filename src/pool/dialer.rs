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

//! Implementation of the [`DialerPool`] and upstream circuit breakers.
//!
//! Every upstream has a [`Breaker`]. A breaker starts closed. After
//! [`FAILURE_THRESHOLD`] consecutive failures it opens, and the
//! upstream is skipped for a backoff period. When the backoff expires,
//! the upstream is handed out once more as a probe (the breaker is
//! half-open); a success closes the breaker, while a failure reopens it
//! with the backoff doubled, up to [`MAX_BACKOFF`]. If no upstream is
//! available, rotation continues over all of them rather than giving
//! up.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{info, trace, warn};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

/// The number of consecutive failures that opens a breaker.
pub const FAILURE_THRESHOLD: u32 = 3;

/// The first backoff after a breaker opens.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// The longest backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

////////////////////////////////////////////////////////////////////////
// CIRCUIT BREAKERS                                                   //
////////////////////////////////////////////////////////////////////////

/// The circuit breaker of one upstream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Breaker {
    state: BreakerState,
    failures: u32,
    backoff: Duration,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum BreakerState {
    Closed,
    Open { until: Instant },
    HalfOpen { until: Instant },
}

impl Breaker {
    pub fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: 0,
            backoff: INITIAL_BACKOFF,
        }
    }

    /// Returns whether the upstream is healthy (the breaker is closed).
    pub fn is_closed(&self) -> bool {
        self.state == BreakerState::Closed
    }

    /// Returns whether a request may be sent to the upstream at `now`.
    /// An open breaker whose backoff has expired lets one probe through
    /// and becomes half-open; if the probe's result is never reported,
    /// another probe is let through after another backoff.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open { until } | BreakerState::HalfOpen { until } if now >= until => {
                self.state = BreakerState::HalfOpen {
                    until: now + self.backoff,
                };
                true
            }
            _ => false,
        }
    }

    /// Records a successful exchange.
    pub fn record_success(&mut self) {
        self.state = BreakerState::Closed;
        self.failures = 0;
        self.backoff = INITIAL_BACKOFF;
    }

    /// Records a failed exchange, returning whether this opened the
    /// breaker.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed => {
                self.failures += 1;
                if self.failures >= FAILURE_THRESHOLD {
                    self.state = BreakerState::Open {
                        until: now + self.backoff,
                    };
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen { .. } => {
                self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
                self.state = BreakerState::Open {
                    until: now + self.backoff,
                };
                true
            }
            // Late results of requests sent before the breaker opened.
            BreakerState::Open { .. } => false,
        }
    }
}

impl Default for Breaker {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////
// UPSTREAM HEALTH                                                    //
////////////////////////////////////////////////////////////////////////

/// The rotation over a set of upstreams, with their breakers.
pub struct UpstreamHealth {
    upstreams: Vec<SocketAddr>,
    state: Mutex<Rotation>,
}

struct Rotation {
    next: usize,
    breakers: Vec<Breaker>,
}

impl UpstreamHealth {
    /// Creates the rotation, starting at a random upstream. This panics
    /// if `upstreams` is empty.
    pub fn new(upstreams: Vec<SocketAddr>) -> Self {
        assert!(!upstreams.is_empty(), "no upstreams given");
        let next = rand::random::<usize>() % upstreams.len();
        let breakers = vec![Breaker::new(); upstreams.len()];
        Self {
            upstreams,
            state: Mutex::new(Rotation { next, breakers }),
        }
    }

    pub fn upstreams(&self) -> &[SocketAddr] {
        &self.upstreams
    }

    fn lock(&self) -> MutexGuard<Rotation> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Picks the next upstream in rotation whose breaker lets a request
    /// through at `now`. If none does, the next upstream in rotation is
    /// picked regardless.
    pub fn next(&self, now: Instant) -> SocketAddr {
        let mut rotation = self.lock();
        let n = self.upstreams.len();
        let start = rotation.next;
        let index = (0..n)
            .map(|offset| (start + offset) % n)
            .find(|&i| rotation.breakers[i].try_acquire(now))
            .unwrap_or(start);
        rotation.next = (index + 1) % n;
        self.upstreams[index]
    }

    /// Records the outcome of an exchange with `upstream`. Unknown
    /// addresses are ignored.
    pub fn report(&self, upstream: SocketAddr, success: bool, now: Instant) {
        let index = match self.upstreams.iter().position(|u| *u == upstream) {
            Some(index) => index,
            None => return,
        };
        let mut rotation = self.lock();
        let breaker = &mut rotation.breakers[index];
        if success {
            if !breaker.is_closed() {
                info!("upstream {} recovered", upstream);
            }
            breaker.record_success();
        } else if breaker.record_failure(now) {
            warn!(
                "upstream {} degraded; backing off for {:?}",
                upstream, breaker.backoff
            );
        }
    }

    /// Returns whether `upstream`'s breaker is closed.
    pub fn is_healthy(&self, upstream: SocketAddr) -> bool {
        match self.upstreams.iter().position(|u| *u == upstream) {
            Some(index) => self.lock().breakers[index].is_closed(),
            None => false,
        }
    }
}

impl fmt::Debug for UpstreamHealth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("UpstreamHealth")
            .field("upstreams", &self.upstreams)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// DIALER POOL                                                        //
////////////////////////////////////////////////////////////////////////

/// A bounded supply of upstream addresses.
///
/// [`DialerPool::start`] spawns a producer task on the active Tokio
/// runtime that picks upstreams from an [`UpstreamHealth`] rotation
/// and queues them. Request tasks take an address with
/// [`DialerPool::get`] and report how the exchange went with
/// [`DialerPool::report`].
#[derive(Debug)]
pub struct DialerPool {
    receiver: AsyncMutex<mpsc::Receiver<SocketAddr>>,
    health: Arc<UpstreamHealth>,
}

impl DialerPool {
    /// Starts a pool over `upstreams`, which must not be empty. This
    /// must be called within a Tokio runtime.
    pub fn start(upstreams: Vec<SocketAddr>, capacity: usize) -> Self {
        let health = Arc::new(UpstreamHealth::new(upstreams));
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let producer_health = health.clone();
        tokio::spawn(async move {
            while sender
                .send(producer_health.next(Instant::now()))
                .await
                .is_ok()
            {}
            trace!("dialer pool producer exiting");
        });
        Self {
            receiver: AsyncMutex::new(receiver),
            health,
        }
    }

    /// Takes the next upstream address.
    pub async fn get(&self) -> SocketAddr {
        match self.receiver.lock().await.recv().await {
            Some(upstream) => upstream,
            None => self.health.next(Instant::now()),
        }
    }

    /// Records the outcome of an exchange with `upstream`.
    pub fn report(&self, upstream: SocketAddr, success: bool) {
        self.health.report(upstream, success, Instant::now());
    }

    pub fn health(&self) -> &UpstreamHealth {
        &self.health
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 0, 2, 1], port))
    }

    #[test]
    fn breaker_opens_after_threshold() {
        let now = Instant::now();
        let mut breaker = Breaker::new();
        assert!(!breaker.record_failure(now));
        assert!(!breaker.record_failure(now));
        assert!(breaker.record_failure(now));
        assert!(!breaker.try_acquire(now));
        assert!(!breaker.try_acquire(now + INITIAL_BACKOFF / 2));
    }

    #[test]
    fn breaker_probes_and_recovers() {
        let now = Instant::now();
        let mut breaker = Breaker::new();
        for _ in 0..FAILURE_THRESHOLD {
            breaker.record_failure(now);
        }
        let later = now + INITIAL_BACKOFF;
        assert!(breaker.try_acquire(later));
        assert!(!breaker.try_acquire(later));
        breaker.record_success();
        assert!(breaker.is_closed());
        assert!(breaker.try_acquire(later));
    }

    #[test]
    fn failed_probes_double_backoff_up_to_max() {
        let mut now = Instant::now();
        let mut breaker = Breaker::new();
        for _ in 0..FAILURE_THRESHOLD {
            breaker.record_failure(now);
        }
        let mut expected = INITIAL_BACKOFF;
        for _ in 0..10 {
            now += expected;
            assert!(breaker.try_acquire(now));
            assert!(breaker.record_failure(now));
            expected = (expected * 2).min(MAX_BACKOFF);
            assert_eq!(breaker.backoff, expected);
        }
        assert_eq!(breaker.backoff, MAX_BACKOFF);
    }

    #[test]
    fn rotation_skips_degraded_upstreams() {
        let health = UpstreamHealth::new(vec![addr(1), addr(2), addr(3)]);
        let now = Instant::now();
        for _ in 0..FAILURE_THRESHOLD {
            health.report(addr(2), false, now);
        }
        assert!(!health.is_healthy(addr(2)));
        for _ in 0..9 {
            assert_ne!(health.next(now), addr(2));
        }

        // Once the backoff expires, a probe goes to the degraded upstream.
        let later = now + INITIAL_BACKOFF;
        let picked: Vec<_> = (0..3).map(|_| health.next(later)).collect();
        assert!(picked.contains(&addr(2)));
        health.report(addr(2), true, later);
        assert!(health.is_healthy(addr(2)));
    }

    #[test]
    fn rotation_continues_when_all_are_degraded() {
        let health = UpstreamHealth::new(vec![addr(1), addr(2)]);
        let now = Instant::now();
        for upstream in [addr(1), addr(2)] {
            for _ in 0..FAILURE_THRESHOLD {
                health.report(upstream, false, now);
            }
        }
        let first = health.next(now);
        let second = health.next(now);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn pool_hands_out_configured_upstreams() {
        let upstreams = vec![addr(1), addr(2)];
        let pool = DialerPool::start(upstreams.clone(), 2);
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(pool.get().await);
        }
        assert!(seen.iter().all(|u| upstreams.contains(u)));
        assert!(seen.contains(&addr(1)) && seen.contains(&addr(2)));
    }
}
