//! Runtime configuration loader.

use crate::error::SessionError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuntimeConfig {
    /// Sandbox timeout used when a session does not set one.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Upper bound on sessions that have started but not finished.
    #[serde(default = "default_max_active_sessions")]
    pub max_active_sessions: usize,
    /// Finished sessions kept for repeated-finish detection. Crossing this
    /// bound prunes every finished session.
    #[serde(default = "default_max_finished_sessions")]
    pub max_finished_sessions: usize,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_active_sessions() -> usize {
    100
}

fn default_max_finished_sessions() -> usize {
    1024
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_active_sessions: default_max_active_sessions(),
            max_finished_sessions: default_max_finished_sessions(),
        }
    }
}

impl RuntimeConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `SessionError::Config` if the file is missing, empty or
    /// invalid, or if a limit is zero.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SessionError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SessionError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, SessionError> {
        if content.trim().is_empty() {
            return Err(SessionError::Config("Config file is empty".to_string()));
        }

        let config: RuntimeConfig = serde_yaml::from_str(content)
            .map_err(|e| SessionError::Config(format!("Invalid YAML: {}", e)))?;

        if config.default_timeout_ms == 0 {
            return Err(SessionError::Config(
                "default_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if config.max_active_sessions == 0 {
            return Err(SessionError::Config(
                "max_active_sessions must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }
}
