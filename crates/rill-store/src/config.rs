use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoreResult, StreamError};

/// Configuration for stream store backends.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory for the file backend. One subdirectory per stream.
    pub root_path: PathBuf,
    /// Session lease length, and the default retry budget for
    /// `open_session` when the caller passes no per-call timeout.
    pub lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("/var/lib/rill/streams"),
            lock_timeout: Duration::from_secs(60),
        }
    }
}

impl StoreConfig {
    /// Config rooted at the given path, with the default lease length.
    pub fn rooted_at(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration. Called eagerly at provider
    /// construction; failures are fatal.
    pub fn validate(&self) -> StoreResult<()> {
        if self.root_path.as_os_str().is_empty() {
            return Err(StreamError::ConfigMissing("root_path is not set".into()));
        }
        if self.lock_timeout.is_zero() {
            return Err(StreamError::ConfigMissing(
                "lock_timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}
