//! Backing-mode selection.
//!
//! Remote mode needs both the service URL and the token. Anything less
//! falls back to the local store with a warning naming the missing keys.
//! The choice is made once per process and never re-evaluated.

use std::sync::OnceLock;

use crate::config::RemoteConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingMode {
    Local,
    Remote,
}

impl BackingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl std::fmt::Display for BackingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static BACKING_MODE: OnceLock<BackingMode> = OnceLock::new();

/// Pure selection: the mode plus the keys that kept it from being remote.
pub fn select(remote: &RemoteConfig) -> (BackingMode, Vec<&'static str>) {
    let missing = remote.missing_keys();
    if missing.is_empty() {
        (BackingMode::Remote, missing)
    } else {
        (BackingMode::Local, missing)
    }
}

/// Resolve the process-wide backing mode on first call; later calls return
/// the first answer regardless of their argument.
pub fn init_backing_mode(remote: &RemoteConfig) -> BackingMode {
    *BACKING_MODE.get_or_init(|| {
        let (mode, missing) = select(remote);
        match mode {
            BackingMode::Remote => tracing::info!(mode = %mode, "Using remote backing service"),
            BackingMode::Local => tracing::warn!(
                mode = %mode,
                missing = ?missing,
                "Remote service not configured; using local demo store"
            ),
        }
        mode
    })
}

/// The mode chosen by [`init_backing_mode`], if it has run.
pub fn current_backing_mode() -> Option<BackingMode> {
    BACKING_MODE.get().copied()
}
