//! HTTP executor configuration.

use ifexec::ExecutorConfig;

/// Settings of the HTTP binding.
#[derive(Debug, Clone)]
pub struct HttpExecutorConfig {
    subpath: String,
    /// Treat every connection as secure instead of detecting it.
    pub force_secure: bool,
    /// Cap on a raw upload body.
    pub raw_upload_limit: usize,
    /// Cap on a JSON request envelope.
    pub json_limit: usize,
}

impl HttpExecutorConfig {
    /// Default cap on a raw upload body (16 MiB).
    pub const DEFAULT_RAW_UPLOAD_LIMIT: usize = 16 * 1024 * 1024;

    pub fn new() -> Self {
        Self::default()
    }

    /// Serve calls below `subpath`.
    pub fn with_subpath(mut self, subpath: &str) -> Self {
        self.subpath = normalize_subpath(subpath);
        self
    }

    pub fn with_force_secure(mut self, force_secure: bool) -> Self {
        self.force_secure = force_secure;
        self
    }

    pub fn with_raw_upload_limit(mut self, limit: usize) -> Self {
        self.raw_upload_limit = limit;
        self
    }

    pub fn with_json_limit(mut self, limit: usize) -> Self {
        self.json_limit = limit;
        self
    }

    /// URL sub-path, always starting and ending with `/`.
    pub fn subpath(&self) -> &str {
        &self.subpath
    }
}

impl Default for HttpExecutorConfig {
    fn default() -> Self {
        Self {
            subpath: "/".to_string(),
            force_secure: false,
            raw_upload_limit: Self::DEFAULT_RAW_UPLOAD_LIMIT,
            json_limit: ExecutorConfig::SAFE_JSON_MESSAGE_LIMIT,
        }
    }
}

fn normalize_subpath(subpath: &str) -> String {
    let trimmed = subpath.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HttpExecutorConfig::default();
        assert_eq!(config.subpath(), "/");
        assert!(!config.force_secure);
        assert_eq!(config.json_limit, 65536);
    }

    #[test]
    fn test_subpath_normalized() {
        for (input, expected) in [
            ("", "/"),
            ("/", "/"),
            ("api", "/api/"),
            ("/api", "/api/"),
            ("/api/", "/api/"),
            ("/ftn/v1", "/ftn/v1/"),
        ] {
            assert_eq!(
                HttpExecutorConfig::new().with_subpath(input).subpath(),
                expected
            );
        }
    }
}
