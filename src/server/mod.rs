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

//! The caching proxy server.
//!
//! The [`Server`] structure is the heart of this module; see its
//! documentation for details. Per-query logic lives in
//! [`Dispatcher`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use log::info;
use tokio::net::{TcpListener, UdpSocket};

use crate::cache::Cache;
use crate::io::shutdown::{make_shutdown_channels, ShutdownController};
use crate::io::{spawn_tcp_worker, spawn_udp_worker, WorkerState, WorkerStatus};
use crate::message::constants::MAX_UDP_MESSAGE_SIZE;
use crate::pool::{PacketPool, DEFAULT_POOL_CAPACITY};
use crate::zone::{LoadError, ZoneSource};

mod dispatch;
mod watch;

pub use dispatch::{
    Dispatcher, MissPolicy, ProxyConfig, ReceivedInfo, Response, Stats, StatsSnapshot, Transport,
    DEFAULT_UPSTREAM_TIMEOUT, MIN_UDP_PAYLOAD_SIZE,
};
pub use watch::{ZoneStamps, POLL_INTERVAL};

////////////////////////////////////////////////////////////////////////
// CONFIGURATION                                                      //
////////////////////////////////////////////////////////////////////////

/// What triggers a reload of the zone files.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReloadTrigger {
    /// Reloads happen only through [`Server::reload`], which the daemon
    /// calls on `SIGHUP`.
    #[default]
    Signal,

    /// The zone files are polled for changes every
    /// [`POLL_INTERVAL`].
    FileChange,
}

/// The validated settings a [`Server`] is started with.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Each address gets a UDP socket and a TCP listener.
    pub listeners: Vec<SocketAddr>,

    /// The number of UDP workers per listener.
    pub udp_workers: usize,

    /// The number of TCP workers per listener.
    pub tcp_workers: usize,

    /// Where cache misses are forwarded; `None` disables proxying.
    pub proxy: Option<ProxyConfig>,

    /// How cache misses are answered when proxying is disabled.
    pub miss_policy: MissPolicy,

    pub zones: ZoneSource,
    pub reload: ReloadTrigger,
}

////////////////////////////////////////////////////////////////////////
// SERVER                                                             //
////////////////////////////////////////////////////////////////////////

/// A running caching DNS proxy.
///
/// [`Server::start`] binds the configured listeners and spawns the
/// workers on the active Tokio runtime. Every worker shares one
/// [`Cache`], one [`PacketPool`] and one [`Dispatcher`] (which owns the
/// [`DialerPool`](crate::pool::DialerPool) when proxying is enabled).
///
/// The `Server` must be held as long as it should keep running.
/// [`Server::shut_down`] asks every worker to drain and waits until
/// they have; dropping the `Server` also stops the workers, but
/// without waiting.
pub struct Server {
    cache: Arc<Cache>,
    zones: Arc<ZoneSource>,
    dispatcher: Arc<Dispatcher>,
    workers: Vec<Arc<WorkerStatus>>,
    shutdown: ShutdownController,
}

impl Server {
    /// Binds the listeners and starts the workers (plus the zone file
    /// watcher, if configured). `cache` should already hold the
    /// initial answers, and `baseline` should have been taken before
    /// they were compiled; the watcher reloads as soon as the files
    /// differ from it. This must be called within a Tokio runtime.
    pub async fn start(
        config: ServerConfig,
        cache: Arc<Cache>,
        baseline: ZoneStamps,
    ) -> io::Result<Self> {
        let mut udp_sockets = Vec::new();
        let mut tcp_listeners = Vec::new();
        for &addr in &config.listeners {
            udp_sockets.push(Arc::new(UdpSocket::bind(addr).await?));
            tcp_listeners.push(Arc::new(TcpListener::bind(addr).await?));
        }

        let packets = Arc::new(PacketPool::start(
            DEFAULT_POOL_CAPACITY,
            MAX_UDP_MESSAGE_SIZE,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            cache.clone(),
            config.proxy,
            config.miss_policy,
        ));
        let zones = Arc::new(config.zones);
        let (shutdown, shutdown_handle) = make_shutdown_channels();

        let mut workers = Vec::new();
        for socket in udp_sockets {
            for _ in 0..config.udp_workers {
                workers.push(spawn_udp_worker(
                    socket.clone(),
                    dispatcher.clone(),
                    packets.clone(),
                    shutdown_handle.clone(),
                )?);
            }
        }
        for listener in tcp_listeners {
            for _ in 0..config.tcp_workers {
                workers.push(spawn_tcp_worker(
                    listener.clone(),
                    dispatcher.clone(),
                    packets.clone(),
                    shutdown_handle.clone(),
                )?);
            }
        }

        if config.reload == ReloadTrigger::FileChange {
            tokio::spawn(watch::watch_zone_files(
                cache.clone(),
                zones.clone(),
                baseline,
                shutdown_handle,
            ));
        }

        info!(
            "started {} workers; proxying {}",
            workers.len(),
            if dispatcher.is_proxying() { "enabled" } else { "disabled" }
        );
        Ok(Self {
            cache,
            zones,
            dispatcher,
            workers,
            shutdown,
        })
    }

    /// Recompiles the zone files and publishes the result. On failure
    /// the current answers stay in place. This blocks on file I/O.
    pub fn reload(&self) -> Result<(), LoadError> {
        info!("reloading zone files");
        self.cache.reload(&self.zones)
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.dispatcher.stats().snapshot()
    }

    pub fn workers(&self) -> &[Arc<WorkerStatus>] {
        &self.workers
    }

    /// Returns the distinct local addresses of the workers using
    /// `transport`, in listener order.
    pub fn local_addrs(&self, transport: Transport) -> Vec<SocketAddr> {
        let mut addrs: Vec<SocketAddr> = Vec::new();
        for worker in self.workers.iter().filter(|w| w.transport() == transport) {
            if !addrs.contains(&worker.local_addr()) {
                addrs.push(worker.local_addr());
            }
        }
        addrs
    }

    /// Asks every worker to drain, and waits until all of them have
    /// stopped.
    pub async fn shut_down(self) {
        info!("draining workers");
        let Self {
            dispatcher,
            workers,
            shutdown,
            ..
        } = self;
        shutdown.shut_down().await;
        log_shutdown(&dispatcher, &workers);
    }
}

fn log_shutdown(dispatcher: &Dispatcher, workers: &[Arc<WorkerStatus>]) {
    let stopped = workers
        .iter()
        .filter(|worker| worker.state() == WorkerState::Stopped)
        .count();
    info!("{} of {} workers stopped", stopped, workers.len());
    info!("served {}", dispatcher.stats().snapshot());
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
