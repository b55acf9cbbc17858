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

//! Implements the `run` command (i.e., running the proxy).

use std::fmt::Write;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use dpx::cache::Cache;
use dpx::server::{ReloadTrigger, Server, ZoneStamps};

use crate::args::RunArgs;
use crate::config;

/// Runs the proxy.
pub fn run(args: RunArgs) {
    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::init_from_env(Env::new().default_filter_or(default_filter));

    if let Err(e) = try_running(args) {
        log_error_chain("Failed to run:", &e);
        error!("Exiting with failure.");
        log::logger().flush();
        process::exit(1);
    }
    info!("Exiting with success.");
    log::logger().flush();
}

fn try_running(args: RunArgs) -> Result<()> {
    info!(
        "dpx daemon v{}.{}.{} starting.",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
    );

    info!("Loading the configuration from {}.", args.config.display());
    let config =
        config::load_from_path(&args.config).context("failed to load the configuration")?;
    let server_config = config.server_config();
    let reload_trigger = server_config.reload;

    // Zone errors are fatal at startup; later reloads keep the old
    // answers instead.
    info!("Compiling the zone files.");
    let baseline = ZoneStamps::take(&server_config.zones);
    let cache = Arc::new(
        Cache::load(&server_config.zones).context("failed to load the zone files")?,
    );

    // Set up signal handling.
    let mut signals = set_up_signal_handling().context("failed to set up signal handling")?;

    // Start the workers.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the Tokio runtime")?;
    let server = runtime
        .block_on(Server::start(server_config, cache, baseline))
        .context("failed to start the server")?;
    info!("Set-up is complete; serving.");

    // Process incoming signals.
    for signal in signals.forever() {
        match signal {
            s @ (SIGINT | SIGTERM) => {
                let name = match s {
                    SIGINT => "SIGINT",
                    SIGTERM => "SIGTERM",
                    _ => unreachable!(),
                };
                info!("Received {}; shutting down.", name);
                break;
            }
            SIGHUP if reload_trigger == ReloadTrigger::Signal => {
                info!("Received SIGHUP; reloading the zone files.");
                if let Err(e) = server.reload() {
                    log_error_chain("Failed to reload the zone files:", &e.into());
                }
            }
            SIGHUP => info!("Received SIGHUP; zone files are reloaded on change, so ignoring it."),
            _ => unreachable!(),
        }
    }

    // Drain the workers.
    runtime.block_on(server.shut_down());
    info!("Shutdown complete.");
    Ok(())
}

fn set_up_signal_handling() -> Result<Signals> {
    let all_signals = &[SIGHUP, SIGINT, SIGTERM];
    let term_signals = &[SIGINT, SIGTERM];
    let already_terminating = Arc::new(AtomicBool::new(false));

    // This sets up signal handlers to exit immediately if a second
    // termination signal arrives before the workers finish draining.
    for sig in term_signals {
        signal_hook::flag::register_conditional_shutdown(*sig, 1, already_terminating.clone())?;
        signal_hook::flag::register(*sig, already_terminating.clone())?;
    }

    Signals::new(all_signals).map_err(Into::into)
}

/// Logs an error with its causes, one per line.
fn log_error_chain(heading: &str, e: &anyhow::Error) {
    let mut message = String::from(heading);
    for (i, cause) in e.chain().enumerate() {
        write!(message, "\n[{}] {}", i + 1, cause).unwrap();
    }
    error!("{}", message);
}
