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

//! Implements command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// The dpx caching DNS proxy
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the proxy
    Run(RunArgs),

    /// Compile the zone files and report what they contain
    Check(CheckArgs),
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Set the configuration file to use
    #[clap(long, value_name = "FILE")]
    pub config: PathBuf,

    /// Log at the debug level unless RUST_LOG says otherwise
    #[clap(long)]
    pub debug: bool,
}

#[derive(Debug, Parser)]
pub struct CheckArgs {
    /// Set the configuration file to use
    #[clap(long, value_name = "FILE")]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_line_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn run_accepts_debug() {
        let args = Args::try_parse_from(["dpxd", "run", "--config", "dpx.toml", "--debug"]).unwrap();
        match args.command {
            Command::Run(run_args) => {
                assert_eq!(run_args.config, PathBuf::from("dpx.toml"));
                assert!(run_args.debug);
            }
            Command::Check(_) => panic!("parsed the wrong subcommand"),
        }
    }

    #[test]
    fn config_is_required() {
        assert!(Args::try_parse_from(["dpxd", "check"]).is_err());
    }
}
