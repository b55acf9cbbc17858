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

//! Implements the `check` command, which compiles the zone files
//! without serving them.

use std::process;

use anyhow::{Context, Result};
use env_logger::Env;

use dpx::zone;

use crate::args::CheckArgs;
use crate::config;

/// Compiles the configured zone files and prints what they produce.
pub fn check(args: CheckArgs) {
    env_logger::init_from_env(Env::new().default_filter_or("warn"));

    if let Err(e) = try_checking(args) {
        eprintln!("Check failed:");
        for (i, cause) in e.chain().enumerate() {
            eprintln!("[{}] {}", i + 1, cause);
        }
        process::exit(1);
    }
}

fn try_checking(args: CheckArgs) -> Result<()> {
    let config =
        config::load_from_path(&args.config).context("failed to load the configuration")?;
    let source = config.zone_source();
    let paths = source
        .paths()
        .context("failed to list the zone directory")?;
    let map = zone::load(&source).context("failed to compile the zone files")?;

    println!("{} zone files:", paths.len());
    for path in &paths {
        println!("  {}", path.display());
    }
    println!("{} answers:", map.len());
    for (rr_type, count) in map.counts() {
        println!("  {:>6} {}", count, rr_type);
    }
    Ok(())
}
