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

//! Loading of local zone data.
//!
//! Zone files are parsed into [`ZoneEntry`]s (see [`parse_entries`]),
//! and all entries from all files are [compiled](compile) together
//! into a [`CacheMap`](crate::cache::CacheMap), so aliases and mail
//! exchanges may refer to names defined in other files. A
//! [`ZoneSource`] describes where the files are.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use crate::cache::CacheMap;
use crate::name::Name;
use crate::rr::Ttl;

pub mod authority;
mod compiler;
mod entry;
mod error;
pub use compiler::{compile, CompileSettings, MX_PREFERENCE};
pub use entry::{parse_entries, Directive, Location, ZoneEntry};
pub use error::{CompileError, LoadError, ParseError, ParseErrorKind};

/// The extension of zone files picked up from a zone directory.
pub const ZONE_FILE_EXTENSION: &str = "rr";

/// Where zone files are found, and how their contents are qualified.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ZoneSource {
    /// A directory whose `*.rr` files are loaded.
    pub directory: Option<PathBuf>,

    /// Additional zone files.
    pub files: Vec<PathBuf>,

    /// The domain appended to names without a dot.
    pub default_domain: Name,

    /// The TTL of entries without a `ttl:` flag.
    pub default_ttl: Ttl,
}

impl ZoneSource {
    /// Returns the zone files currently making up this source: the
    /// `*.rr` files of the directory, sorted, followed by the explicit
    /// files.
    pub fn paths(&self) -> io::Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        if let Some(ref directory) = self.directory {
            for dir_entry in fs::read_dir(directory)? {
                let path = dir_entry?.path();
                if is_zone_file(&path) {
                    paths.push(path);
                }
            }
            paths.sort();
        }
        paths.extend(self.files.iter().cloned());
        Ok(paths)
    }
}

fn is_zone_file(path: &Path) -> bool {
    path.extension()
        .map_or(false, |extension| extension == ZONE_FILE_EXTENSION)
        && path.is_file()
}

/// Reads, parses and compiles every zone file of `source`. The SOA
/// serial of synthesized records is the current Unix time.
pub fn load(source: &ZoneSource) -> Result<CacheMap, LoadError> {
    let paths = source.paths().map_err(|error| LoadError::Io {
        path: source.directory.clone().unwrap_or_default(),
        error,
    })?;

    let mut entries = Vec::new();
    for path in paths {
        let text = fs::read_to_string(&path).map_err(|error| LoadError::Io {
            path: path.clone(),
            error,
        })?;
        let parsed = parse_entries(&text, &source.default_domain)
            .map_err(|error| LoadError::Parse { path: path.clone(), error })?;
        debug!("read {} entries from {}", parsed.len(), path.display());
        let file: Arc<Path> = Arc::from(path.as_path());
        entries.extend(parsed.into_iter().map(|entry| ZoneEntry {
            file: Some(file.clone()),
            ..entry
        }));
    }

    let settings = CompileSettings {
        serial: unix_time(),
        default_ttl: source.default_ttl,
    };
    compile(&entries, settings).map_err(LoadError::from)
}

fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or_default()
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::Type;
    use std::process;

    /// Creates an empty scratch directory unique to this test.
    fn scratch_dir(test: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dpx-zone-{}-{}", test, process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn source_for(dir: &Path, files: Vec<PathBuf>) -> ZoneSource {
        ZoneSource {
            directory: Some(dir.to_owned()),
            files,
            default_domain: "example.test".parse().unwrap(),
            default_ttl: Ttl::DEFAULT,
        }
    }

    #[test]
    fn loads_across_files() {
        let dir = scratch_dir("across");
        fs::write(dir.join("hosts.rr"), "host 192.0.2.1\n").unwrap();
        fs::write(dir.join("aliases.rr"), "www host cname\n").unwrap();
        fs::write(dir.join("ignored.txt"), "this is not a zone file\n").unwrap();
        let extra = dir.join("extra.zone");
        fs::write(&extra, "mail 192.0.2.25\nexample.test mail mx\n").unwrap();

        let source = source_for(&dir, vec![extra.clone()]);
        assert_eq!(
            source.paths().unwrap(),
            vec![dir.join("aliases.rr"), dir.join("hosts.rr"), extra]
        );
        let map = load(&source).unwrap();
        let www = "www.example.test".parse().unwrap();
        assert!(map.get(Type::A, &www).is_some());
        assert!(map
            .get(Type::MX, &"example.test".parse().unwrap())
            .is_some());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn reports_file_of_parse_errors() {
        let dir = scratch_dir("parse");
        fs::write(dir.join("bad.rr"), "host 192.0.2.1\nhost\n").unwrap();
        match load(&source_for(&dir, Vec::new())) {
            Err(LoadError::Parse { path, error }) => {
                assert_eq!(path, dir.join("bad.rr"));
                assert_eq!(error.line, 2);
            }
            other => panic!("unexpected result: {:?}", other.map(|m| m.len())),
        }
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn reports_file_of_compile_errors() {
        let dir = scratch_dir("compile");
        fs::write(dir.join("a.rr"), "host 192.0.2.1\n").unwrap();
        fs::write(dir.join("b.rr"), "# aliases\nhost www cname\n").unwrap();
        match load(&source_for(&dir, Vec::new())) {
            Err(LoadError::Compile(error)) => {
                let file: Arc<Path> = Arc::from(dir.join("b.rr").as_path());
                assert_eq!(
                    error,
                    CompileError::Conflict {
                        owner: "host.example.test".parse().unwrap(),
                        at: Location {
                            file: Some(file),
                            line: 2,
                        },
                    }
                );
                let message = error.to_string();
                assert!(message.contains("b.rr:2"), "{}", message);
            }
            other => panic!("unexpected result: {:?}", other.map(|m| m.len())),
        }
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn reports_missing_files() {
        let dir = scratch_dir("missing");
        let missing = dir.join("missing.rr");
        let source = source_for(&dir, vec![missing.clone()]);
        assert!(matches!(
            load(&source),
            Err(LoadError::Io { path, .. }) if path == missing
        ));
        fs::remove_dir_all(&dir).unwrap();
    }
}
