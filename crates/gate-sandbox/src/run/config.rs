//! Configuration for executor launches.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-run launch options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum wall-clock execution time in milliseconds (0 = unlimited)
    pub timeout_ms: u64,

    /// Pass the executor's stderr through instead of discarding it
    pub inherit_stderr: bool,
}

impl RunConfig {
    /// Deadline for one run, if any.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Builder: set the deadline in milliseconds (0 disables it)
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Builder: pass stderr through
    pub fn inherit_stderr(mut self, inherit: bool) -> Self {
        self.inherit_stderr = inherit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_deadline() {
        let config = RunConfig::default();
        assert_eq!(config.timeout(), None);
        assert!(!config.inherit_stderr);
    }

    #[test]
    fn test_builder_chain() {
        let config = RunConfig::default().timeout_ms(1500).inherit_stderr(true);
        assert_eq!(config.timeout(), Some(Duration::from_millis(1500)));
        assert!(config.inherit_stderr);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: RunConfig = serde_json::from_str(r#"{"timeout_ms": 250}"#).unwrap();
        assert_eq!(config.timeout(), Some(Duration::from_millis(250)));
        assert!(!config.inherit_stderr);
    }
}
