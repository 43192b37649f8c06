use std::path::{Path, PathBuf};
use std::time::Duration;

use rostersync_core::config::{root_at, rosters_dir_path};

pub const DAEMON_LABEL: &str = "dev.rostersync.daemon";
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);
pub const DAEMON_SOCKET: &str = "rostersync.sock";

/// Tick period used when no roster config overrides it.
pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

/// Finished run statuses kept for `run-status` lookups.
pub const RUN_REGISTRY_CAPACITY: usize = 256;

pub const MEMBERS_SUFFIX: &str = ".members.json";

pub fn rostersync_root(home: &Path) -> PathBuf {
    root_at(home)
}

pub fn rosters_root(home: &Path) -> PathBuf {
    rosters_dir_path(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    rostersync_root(home).join(DAEMON_SOCKET)
}
