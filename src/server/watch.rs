// Copyright 2023 Matthew Ingwersen.
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

//! Polling for zone file changes.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::time::{interval, MissedTickBehavior};

use crate::cache::Cache;
use crate::io::shutdown::ShutdownHandle;
use crate::zone::ZoneSource;

/// How often zone files are checked for changes.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Identifies one version of one zone file. Any write, rename or
/// replacement changes the inode or the change time.
#[derive(Clone, Debug, Eq, PartialEq)]
struct FileStamp {
    path: PathBuf,
    inode: u64,
    changed: (i64, i64),
}

impl FileStamp {
    #[cfg(unix)]
    fn read(path: PathBuf) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        let metadata = fs::metadata(&path).ok()?;
        Some(Self {
            path,
            inode: metadata.ino(),
            changed: (metadata.ctime(), metadata.ctime_nsec()),
        })
    }

    #[cfg(not(unix))]
    fn read(path: PathBuf) -> Option<Self> {
        use std::time::UNIX_EPOCH;
        let modified = fs::metadata(&path).ok()?.modified().ok()?;
        let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
        Some(Self {
            path,
            inode: 0,
            changed: (since_epoch.as_secs() as i64, since_epoch.subsec_nanos() as i64),
        })
    }
}

/// The state of every zone file of a [`ZoneSource`] at one moment.
///
/// Take the stamps *before* compiling the zone files that the watcher
/// should compare against; a file written between the compile and the
/// stamping would otherwise never be noticed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ZoneStamps(Option<Vec<FileStamp>>);

impl ZoneStamps {
    /// Stamps every zone file of `source`. Files that cannot be
    /// examined are left out, so their disappearance counts as a
    /// change. If the zone directory itself cannot be listed, that
    /// state is recorded instead.
    pub fn take(source: &ZoneSource) -> Self {
        Self(stamp_zone_files(source))
    }
}

fn stamp_zone_files(source: &ZoneSource) -> Option<Vec<FileStamp>> {
    let paths = source.paths().ok()?;
    Some(paths.into_iter().filter_map(FileStamp::read).collect())
}

/// Polls the zone files of `source` every [`POLL_INTERVAL`] and
/// reloads `cache` when they differ from `last`, until shutdown is
/// requested.
pub(super) async fn watch_zone_files(
    cache: Arc<Cache>,
    source: Arc<ZoneSource>,
    mut last: ZoneStamps,
    mut shutdown: ShutdownHandle,
) {
    let mut ticker = interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!("watching zone files for changes");

    loop {
        tokio::select! {
            _ = shutdown.requested() => break,
            _ = ticker.tick() => (),
        }

        let current = ZoneStamps::take(&source);
        if current == last {
            continue;
        }
        last = current;

        info!("zone files changed; reloading");
        let cache = cache.clone();
        let source = source.clone();
        match tokio::task::spawn_blocking(move || cache.reload(&source)).await {
            Ok(Ok(())) => (),
            Ok(Err(e)) => error!("failed to reload zone files: {}", e),
            Err(e) => error!("zone reload task failed: {}", e),
        }
    }
    debug!("zone file watcher exiting");
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
