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

//! Network workers.
//!
//! A worker owns one receive loop over a listening socket: a UDP
//! receiver ([`spawn_udp_worker`]) or a TCP acceptor
//! ([`spawn_tcp_worker`]). Each received query is handed to a
//! [`Dispatcher`](crate::server::Dispatcher) in its own Tokio task, so a
//! slow upstream never holds up other clients.
//!
//! Workers move through the states of [`WorkerState`]. When shutdown
//! is requested through the [`shutdown`] mechanism, a worker stops
//! receiving, waits for its in-flight requests to finish, and then
//! reports itself stopped.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::info;
use tokio::sync::Notify;

use crate::server::Transport;

pub mod shutdown;
mod tcp;
mod udp;

pub use tcp::spawn_tcp_worker;
pub use udp::spawn_udp_worker;

/// How long to pause after a failed accept before trying again, so
/// that a persistent error (such as running out of file descriptors)
/// does not spin.
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// The maximum amount of time a TCP client is allowed to take to send
/// its query. Slower connections are closed.
const READ_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

////////////////////////////////////////////////////////////////////////
// WORKER STATE                                                       //
////////////////////////////////////////////////////////////////////////

/// The lifecycle of a worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerState {
    /// The socket is bound, but the loop has not started.
    Starting,

    /// The loop is receiving queries.
    Serving,

    /// Shutdown was requested; in-flight requests are finishing.
    Draining,

    /// Every request has finished.
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Starting => f.write_str("starting"),
            Self::Serving => f.write_str("serving"),
            Self::Draining => f.write_str("draining"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// The shared, observable status of one worker.
#[derive(Debug)]
pub struct WorkerStatus {
    transport: Transport,
    local_addr: SocketAddr,
    state: Mutex<WorkerState>,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl WorkerStatus {
    fn new(transport: Transport, local_addr: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            transport,
            local_addr,
            state: Mutex::new(WorkerState::Starting),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        })
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the number of requests currently being handled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
        info!("{} worker on {} {}", self.transport, self.local_addr, state);
    }

    /// Counts a request as in flight until the returned guard is
    /// dropped.
    fn begin_request(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight {
            status: self.clone(),
        }
    }

    /// Resolves once no requests are in flight.
    async fn drained(&self) {
        loop {
            // The future must exist before the check so that a guard
            // dropped in between is not missed.
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Moves from serving to stopped once every request has finished.
    async fn drain(&self) {
        self.set_state(WorkerState::Draining);
        self.drained().await;
        self.set_state(WorkerState::Stopped);
    }
}

/// Marks a request as in flight on a worker.
struct InFlight {
    status: Arc<WorkerStatus>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.status.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.status.idle.notify_waiters();
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> Arc<WorkerStatus> {
        WorkerStatus::new(Transport::Udp, "127.0.0.1:53".parse().unwrap())
    }

    #[test]
    fn in_flight_guards_count() {
        let status = status();
        let first = status.begin_request();
        let second = status.begin_request();
        assert_eq!(status.in_flight(), 2);
        drop(first);
        assert_eq!(status.in_flight(), 1);
        drop(second);
        assert_eq!(status.in_flight(), 0);
    }

    #[tokio::test]
    async fn drain_waits_for_in_flight_requests() {
        let status = status();
        assert_eq!(status.state(), WorkerState::Starting);
        let guard = status.begin_request();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });
        status.drain().await;
        assert_eq!(status.in_flight(), 0);
        assert_eq!(status.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn drain_of_idle_worker_is_immediate() {
        let status = status();
        status.drain().await;
        assert_eq!(status.state(), WorkerState::Stopped);
    }

    #[test]
    fn state_display() {
        assert_eq!(WorkerState::Draining.to_string(), "draining");
    }
}
