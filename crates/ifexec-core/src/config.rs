//! Centralized configuration for the executor.
//!
//! Protocol constants live on [`ExecutorConfig`]; per-instance settings are
//! carried by [`ExecutorOptions`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Protocol-level constants.
pub struct ExecutorConfig;

impl ExecutorConfig {
    /// Cap on a request envelope read from a transport before parsing.
    pub const SAFE_JSON_MESSAGE_LIMIT: usize = 65536;
    /// Suffix of interface spec documents: `<iface>-<ver>-iface.json`.
    pub const SPEC_FILE_SUFFIX: &'static str = "-iface.json";
    /// Content type of serialized envelopes.
    pub const ENVELOPE_CONTENT_TYPE: &'static str = "application/futoin+json";
}

/// Options for an [`Executor`](crate::Executor) instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorOptions {
    /// Directories searched for interface spec documents.
    #[serde(default)]
    pub spec_dirs: Vec<PathBuf>,
    /// Disable extra development checks.
    #[serde(default)]
    pub prod_mode: bool,
    /// Deadline applied to every call, unless the call sets its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout: Option<Duration>,
}

impl ExecutorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spec_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spec_dirs.push(dir.into());
        self
    }

    pub fn with_prod_mode(mut self, prod_mode: bool) -> Self {
        self.prod_mode = prod_mode;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }
}
