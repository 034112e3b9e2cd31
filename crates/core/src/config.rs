use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::poll::PollPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend_url: String,
    pub bpm: f64,
    pub total_measures: f64,
    /// Measures moved by fast-forward and rewind.
    pub skip_measures: f64,
    pub seek_settle_ms: u64,
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
    pub request_timeout_secs: u64,
    pub export_sample_rate: u32,
    pub export_channels: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000".to_string(),
            bpm: 160.0,
            total_measures: 64.0,
            skip_measures: 8.0,
            seek_settle_ms: 50,
            poll_interval_secs: 10,
            poll_max_attempts: 60,
            request_timeout_secs: 30,
            export_sample_rate: 44100,
            export_channels: 2,
        }
    }
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("lavoe").join("config.toml"))
    }

    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        Self::load_from(&path)
    }

    /// Read `path`, falling back to defaults when it is missing or malformed.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), %err, "ignoring malformed config");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) {
        let Some(path) = Self::config_path() else {
            return;
        };
        if let Err(err) = self.save_to(&path) {
            tracing::warn!(path = %path.display(), "failed to save config: {err:#}");
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.poll_max_attempts,
        }
    }

    pub fn seek_settle(&self) -> Duration {
        Duration::from_millis(self.seek_settle_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/lavoe/config.toml"));
        assert_eq!(config, Config::default());
        assert_eq!(config.poll_policy().max_attempts, 60);
        assert_eq!(config.poll_policy().interval, Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "backend_url = \"http://studio:9000\"\nbpm = 120.0\n").unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.backend_url, "http://studio:9000");
        assert_eq!(config.bpm, 120.0);
        assert_eq!(config.total_measures, 64.0);
        assert_eq!(config.seek_settle(), Duration::from_millis(50));
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "bpm = \"fast\"").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            poll_max_attempts: 5,
            export_channels: 1,
            ..Config::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);
    }
}
