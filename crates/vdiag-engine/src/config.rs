//! Engine configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file
//! at all) yields a working mock setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vdiag_store::LockPolicy;

use crate::error::ConfigError;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding one rule file per vehicle identity
    pub knowledge_dir: PathBuf,
    /// Protocol reference rule sets, consulted in order after the vehicle rules
    pub reference_files: Vec<PathBuf>,
    pub timeouts: TimeoutConfig,
    pub store: StoreConfig,
    pub transport: TransportConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            knowledge_dir: PathBuf::from("knowledge"),
            reference_files: Vec::new(),
            timeouts: TimeoutConfig::default(),
            store: StoreConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file; a missing file yields defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Resolve relative paths against the directory the config file lives in
    pub fn resolve_paths(mut self, base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        let resolve = |p: &Path| {
            if p.is_relative() {
                base.join(p)
            } else {
                p.to_path_buf()
            }
        };
        self.knowledge_dir = resolve(self.knowledge_dir.as_path());
        self.reference_files = self
            .reference_files
            .iter()
            .map(|p| resolve(p.as_path()))
            .collect();
        if let TransportConfig::Replay(replay) = &mut self.transport {
            replay.path = resolve(replay.path.as_path());
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeouts.response_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.response_ms must be greater than zero".to_string(),
            ));
        }
        if self.timeouts.frame_ms == 0 || self.timeouts.frame_ms > self.timeouts.response_ms {
            return Err(ConfigError::Invalid(format!(
                "timeouts.frame_ms must be between 1 and response_ms ({})",
                self.timeouts.response_ms
            )));
        }
        if self.timeouts.confirmation_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.confirmation_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.lock_retries == 0 {
            return Err(ConfigError::Invalid(
                "store.lock_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounded waits, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole response, all frames included
    pub response_ms: u64,
    /// Gap allowed between consecutive frames
    pub frame_ms: u64,
    /// Each operator confirmation step
    pub confirmation_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            response_ms: 2000,
            frame_ms: 500,
            confirmation_ms: 60_000,
        }
    }
}

impl TimeoutConfig {
    pub fn response(&self) -> Duration {
        Duration::from_millis(self.response_ms)
    }

    pub fn frame(&self) -> Duration {
        Duration::from_millis(self.frame_ms)
    }

    pub fn confirmation(&self) -> Duration {
        Duration::from_millis(self.confirmation_ms)
    }
}

/// Knowledge store append settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub lock_retries: u32,
    pub lock_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let policy = LockPolicy::default();
        Self {
            lock_retries: policy.retries,
            lock_backoff_ms: policy.backoff.as_millis() as u64,
        }
    }
}

impl StoreConfig {
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            retries: self.lock_retries,
            backoff: Duration::from_millis(self.lock_backoff_ms),
        }
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Transport selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Scripted responses, for tests and dry runs
    Mock(MockConfig),
    /// Replays a recorded capture file
    Replay(ReplayConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Mock(MockConfig::default())
    }
}

/// Mock transport configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MockConfig {
    /// Simulated latency per frame in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    /// Scripted answers, matched exactly first, then by request prefix
    #[serde(default)]
    pub responses: Vec<ScriptedResponse>,
}

/// One scripted exchange
///
/// ```toml
/// [[transport.responses]]
/// address = "7A0"
/// request = "03"
/// frames = ["43 16 32"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedResponse {
    /// Module address in hex; any address when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Request bytes in hex
    pub request: String,
    /// Response frames in hex, delivered in order
    pub frames: Vec<String>,
    /// Indices into `frames` that are never delivered
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drop_frames: Vec<usize>,
}

/// Replay transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Capture file of `> <addr> <hex>` and `< <hex>` lines
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.timeouts.response(), Duration::from_secs(2));
        assert_eq!(config.store.lock_policy(), LockPolicy::default());
    }

    #[test]
    fn test_full_config() {
        let config = EngineConfig::from_toml_str(
            r#"
knowledge_dir = "/var/lib/vdiag"
reference_files = ["reference/obd2.vdr"]

[timeouts]
response_ms = 3000
frame_ms = 250

[store]
lock_retries = 8

[transport]
type = "mock"
latency_ms = 5

[[transport.responses]]
address = "7A0"
request = "03"
frames = ["43 16 32"]

[[transport.responses]]
request = "1902FF"
frames = ["10 0B 59 02 FF 01 23 45", "21 2F C1 00 00 08 AA AA"]
drop_frames = [1]
"#,
        )
        .unwrap();

        assert_eq!(config.knowledge_dir, PathBuf::from("/var/lib/vdiag"));
        assert_eq!(config.timeouts.frame_ms, 250);
        assert_eq!(config.timeouts.confirmation_ms, 60_000);
        assert_eq!(config.store.lock_retries, 8);
        assert_eq!(config.store.lock_backoff_ms, 20);
        match config.transport {
            TransportConfig::Mock(mock) => {
                assert_eq!(mock.latency_ms, 5);
                assert_eq!(mock.responses.len(), 2);
                assert_eq!(mock.responses[0].address.as_deref(), Some("7A0"));
                assert_eq!(mock.responses[1].drop_frames, vec![1]);
            }
            other => panic!("Expected mock transport, got {:?}", other),
        }
    }

    #[test]
    fn test_replay_transport_and_paths() {
        let config = EngineConfig::from_toml_str(
            r#"
reference_files = ["ref/uds.vdr", "/abs/obd2.vdr"]

[transport]
type = "replay"
path = "capture.log"
"#,
        )
        .unwrap()
        .resolve_paths("/etc/vdiag");

        assert_eq!(config.knowledge_dir, PathBuf::from("/etc/vdiag/knowledge"));
        assert_eq!(
            config.reference_files,
            vec![
                PathBuf::from("/etc/vdiag/ref/uds.vdr"),
                PathBuf::from("/abs/obd2.vdr")
            ]
        );
        assert_eq!(
            config.transport,
            TransportConfig::Replay(ReplayConfig {
                path: PathBuf::from("/etc/vdiag/capture.log")
            })
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_toml_str("[timeouts]\nframe_ms = 5000").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = EngineConfig::from_toml_str("[transport]\ntype = \"serial\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
