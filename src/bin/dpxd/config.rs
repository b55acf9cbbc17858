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

//! Implements the configuration file.

use std::fmt::{self, Write};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::Level::Debug;
use log::{debug, log_enabled, warn};
use paste::paste;
use serde::{de, Deserialize};

use dpx::name::Name;
use dpx::rr::Ttl;
use dpx::server::{MissPolicy, ProxyConfig, ReloadTrigger, ServerConfig};
use dpx::zone::ZoneSource;

/// The largest number of workers of one kind per listener.
const MAX_WORKERS: usize = 64;

////////////////////////////////////////////////////////////////////////
// CONFIGURATION LOADING                                              //
////////////////////////////////////////////////////////////////////////

/// Loads and validates the configuration from the file given by `path`.
/// Relative zone paths are interpreted relative to the configuration
/// file's directory.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let dir = match path.as_ref().parent() {
        Some(p) => p,
        None => return Err(anyhow!("the configuration file path has no parent")),
    };
    let raw_config = fs::read(path.as_ref()).context("failed to read the configuration file")?;
    let mut config: Config =
        toml::from_slice(&raw_config).context("failed to parse the configuration file")?;
    config.resolve_paths(dir);
    config.validate()?;
    log_config_summary(&config);
    Ok(config)
}

/// Summarizes the configuration in the log, if the debug log level is
/// enabled.
fn log_config_summary(config: &Config) {
    if !log_enabled!(Debug) {
        // Don't compute the message if it will never be printed.
        return;
    }

    let mut message = format!(
        "Configuration loaded:\n\
         Listeners:      {}\n\
         Workers:        {} UDP, {} TCP per listener\n\
         Proxy:          ",
        join(&config.listeners),
        config.udp_workers,
        config.tcp_workers,
    );
    if config.proxy.enabled {
        write!(
            message,
            "{} ({}s timeout)",
            join(&config.proxy.upstreams),
            config.proxy.timeout
        )
        .unwrap();
    } else {
        write!(message, "disabled, misses get {:?}", config.proxy.miss_policy).unwrap();
    }
    write!(
        message,
        "\nDefault domain: {}\nDefault TTL:    {}\nReload on:      {:?}\nZone files:     ",
        config.zones.default_domain.0, config.zones.ttl, config.zones.reload,
    )
    .unwrap();
    match config.zones.directory {
        Some(ref directory) => write!(message, "{}/*.rr", directory.display()).unwrap(),
        None => message.push_str("no directory"),
    }
    for file in &config.zones.files {
        write!(message, "\n  {}", file.display()).unwrap();
    }
    debug!("{}", message);
}

fn join(addrs: &[SocketAddr]) -> String {
    let strings: Vec<String> = addrs.iter().map(ToString::to_string).collect();
    strings.join(", ")
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION FILE STRUCTURE                                       //
////////////////////////////////////////////////////////////////////////

/// The complete configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_listeners")]
    pub listeners: Vec<SocketAddr>,
    #[serde(default = "default_udp_workers")]
    pub udp_workers: usize,
    #[serde(default = "default_tcp_workers")]
    pub tcp_workers: usize,
    #[serde(default)]
    pub proxy: ProxySection,
    pub zones: ZonesSection,
}

fn default_listeners() -> Vec<SocketAddr> {
    vec![SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 53)]
}

fn default_udp_workers() -> usize {
    4
}

fn default_tcp_workers() -> usize {
    2
}

impl Config {
    /// Makes relative zone paths relative to `dir`.
    fn resolve_paths(&mut self, dir: &Path) {
        if let Some(ref mut directory) = self.zones.directory {
            if directory.is_relative() {
                *directory = dir.join(directory.as_path());
            }
        }
        for file in &mut self.zones.files {
            if file.is_relative() {
                *file = dir.join(file.as_path());
            }
        }
    }

    /// Checks the constraints that deserialization cannot express.
    fn validate(&self) -> Result<()> {
        if self.listeners.is_empty() {
            return Err(anyhow!("at least one listener is required"));
        }
        for (name, count) in [
            ("udp_workers", self.udp_workers),
            ("tcp_workers", self.tcp_workers),
        ] {
            if !(1..=MAX_WORKERS).contains(&count) {
                return Err(anyhow!("{} must be from 1 to {}", name, MAX_WORKERS));
            }
        }
        if self.proxy.enabled {
            if self.proxy.upstreams.is_empty() {
                return Err(anyhow!("proxying is enabled, but no upstreams are configured"));
            }
            if self.proxy.timeout == 0 {
                return Err(anyhow!("the upstream timeout must be at least one second"));
            }
        }
        if self.zones.directory.is_none() && self.zones.files.is_empty() {
            warn!("No zone directory or files are configured; every query is a cache miss.");
        }
        Ok(())
    }

    /// Returns where the zone files are.
    pub fn zone_source(&self) -> ZoneSource {
        ZoneSource {
            directory: self.zones.directory.clone(),
            files: self.zones.files.clone(),
            default_domain: self.zones.default_domain.0.clone(),
            default_ttl: Ttl::from(self.zones.ttl),
        }
    }

    /// Converts the configuration into the settings of a
    /// [`Server`](dpx::server::Server).
    pub fn server_config(&self) -> ServerConfig {
        let proxy = self.proxy.enabled.then(|| ProxyConfig {
            upstreams: self.proxy.upstreams.clone(),
            timeout: Duration::from_secs(self.proxy.timeout),
        });
        ServerConfig {
            listeners: self.listeners.clone(),
            udp_workers: self.udp_workers,
            tcp_workers: self.tcp_workers,
            proxy,
            miss_policy: self.proxy.miss_policy.into(),
            zones: self.zone_source(),
            reload: self.zones.reload.into(),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: PROXY                                       //
////////////////////////////////////////////////////////////////////////

/// The configuration of upstream proxying.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxySection {
    #[serde(default = "default_proxy_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub upstreams: Vec<SocketAddr>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub miss_policy: ConfigMissPolicy,
}

fn default_proxy_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    dpx::server::DEFAULT_UPSTREAM_TIMEOUT.as_secs()
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            enabled: default_proxy_enabled(),
            upstreams: Vec::new(),
            timeout: default_timeout(),
            miss_policy: ConfigMissPolicy::default(),
        }
    }
}

/// A deserializable wrapper over [`MissPolicy`].
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub enum ConfigMissPolicy {
    #[default]
    #[serde(rename = "refused")]
    Refused,
    #[serde(rename = "nxdomain")]
    NxDomain,
}

impl From<ConfigMissPolicy> for MissPolicy {
    fn from(config_policy: ConfigMissPolicy) -> Self {
        match config_policy {
            ConfigMissPolicy::Refused => Self::Refused,
            ConfigMissPolicy::NxDomain => Self::NxDomain,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: ZONES                                       //
////////////////////////////////////////////////////////////////////////

/// The configuration of the zone files.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZonesSection {
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub files: Vec<PathBuf>,
    #[serde(default = "default_domain")]
    pub default_domain: ConfigName,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub reload: ConfigReloadTrigger,
}

fn default_domain() -> ConfigName {
    ConfigName("local".parse().unwrap())
}

fn default_ttl() -> u32 {
    u32::from(Ttl::DEFAULT)
}

/// A deserializable wrapper over [`ReloadTrigger`].
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub enum ConfigReloadTrigger {
    #[default]
    #[serde(rename = "signal")]
    Signal,
    #[serde(rename = "file-change")]
    FileChange,
}

impl From<ConfigReloadTrigger> for ReloadTrigger {
    fn from(config_trigger: ConfigReloadTrigger) -> Self {
        match config_trigger {
            ConfigReloadTrigger::Signal => Self::Signal,
            ConfigReloadTrigger::FileChange => Self::FileChange,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// WRAPPERS OVER DPX TYPES FOR SERDE                                  //
////////////////////////////////////////////////////////////////////////

/// Generates a deserializable `ConfigX` structure wrapping an `X` type
/// from [`dpx`], using its [`FromStr`](std::str::FromStr)
/// implementation.
macro_rules! make_serde_wrapper {
    ($wrapper:ident, $over:ty, $description:literal) => {
        /// A macro-generated deserializable wrapper over a [`dpx`]
        /// type.
        #[derive(Clone, Debug)]
        pub struct $wrapper(pub $over);

        impl<'de> Deserialize<'de> for $wrapper {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: de::Deserializer<'de>,
            {
                deserializer.deserialize_str(paste! { [<$wrapper Visitor>] })
            }
        }

        paste! {
            /// A macro-generated [`Visitor`](de::Visitor).
            #[derive(Debug)]
            struct [<$wrapper Visitor>];
        }

        impl<'de> de::Visitor<'de> for paste! { [<$wrapper Visitor>] } {
            type Value = $wrapper;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str($description)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value
                    .parse()
                    .map($wrapper)
                    .map_err(|e| E::custom(format!("invalid {}: {}", $description, e)))
            }
        }
    };
}

make_serde_wrapper!(ConfigName, Name, "domain name");

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
