//! Runtime configuration for Woom
//!
//! Stored in the same simple `key=value` format as other preferences,
//! then overridden by `WOOM_*` environment variables.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const ENV_POOL_SIZE: &str = "WOOM_POOL_SIZE";
pub const ENV_BATCH_TIMEOUT: &str = "WOOM_BATCH_TIMEOUT_SECS";

/// Largest pool the config accepts
pub const MAX_POOL_SIZE: usize = 8;

/// Invalid configuration value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: String, reason: String },
    #[error("unknown configuration key `{0}`")]
    UnknownKey(String),
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Mixer configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MixerConfig {
    /// Jobs allowed to run at once. Each job holds several copies of both
    /// inputs and runs heavy FFT work, so this bounds memory pressure.
    pub pool_size: usize,
    /// Jobs not started by this deadline fail without running
    pub batch_timeout: Option<Duration>,
    /// Working and output sample rate
    pub sample_rate: u32,
    pub clip_analysis_secs: f64,
    pub background_analysis_secs: f64,
    /// Beats spanned by the clip window
    pub beats: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            batch_timeout: None,
            sample_rate: 44100,
            clip_analysis_secs: 30.0,
            background_analysis_secs: 60.0,
            beats: 4,
        }
    }
}

impl MixerConfig {
    /// Load config from the default location, then apply env overrides
    ///
    /// Returns default config if the file doesn't exist or can't be parsed.
    pub fn load() -> Self {
        let path = Self::config_path();
        let mut config = Self::load_from(&path).unwrap_or_default();
        if let Err(e) = config.apply_env(|key| std::env::var(key).ok()) {
            warn!(error = %e, "Ignoring environment override");
        }
        config
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, self.serialize())
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("woom")
            .join("config.txt")
    }

    /// Parse config from simple key=value format
    ///
    /// Unknown keys and bad values are skipped, keeping the default.
    pub fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                if let Err(e) = config.set(key.trim(), value.trim()) {
                    warn!(error = %e, "Skipping config line");
                }
            }
        }

        config
    }

    /// Serialize config to simple key=value format
    pub fn serialize(&self) -> String {
        let mut lines = vec![
            "# Woom Configuration".to_string(),
            format!("pool_size={}", self.pool_size),
        ];

        if let Some(timeout) = self.batch_timeout {
            lines.push(format!("batch_timeout_secs={}", timeout.as_secs_f64()));
        }
        lines.push(format!("sample_rate={}", self.sample_rate));
        lines.push(format!("clip_analysis_secs={}", self.clip_analysis_secs));
        lines.push(format!(
            "background_analysis_secs={}",
            self.background_analysis_secs
        ));
        lines.push(format!("beats={}", self.beats));

        lines.join("\n")
    }

    /// Set one key from its string form
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "pool_size" => self.pool_size = parse_pool_size(value)?,
            "batch_timeout_secs" => self.batch_timeout = parse_timeout(value)?,
            "sample_rate" => {
                let rate: u32 = value
                    .parse()
                    .map_err(|_| ConfigError::invalid(key, "expected an integer"))?;
                if !(8000..=192_000).contains(&rate) {
                    return Err(ConfigError::invalid(key, "must be within 8000..=192000"));
                }
                self.sample_rate = rate;
            }
            "clip_analysis_secs" => self.clip_analysis_secs = parse_secs(key, value)?,
            "background_analysis_secs" => self.background_analysis_secs = parse_secs(key, value)?,
            "beats" => {
                let beats: usize = value
                    .parse()
                    .map_err(|_| ConfigError::invalid(key, "expected an integer"))?;
                if beats == 0 {
                    return Err(ConfigError::invalid(key, "must be at least 1"));
                }
                self.beats = beats;
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Apply `WOOM_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_POOL_SIZE) {
            self.set("pool_size", value.trim())?;
        }
        if let Some(value) = lookup(ENV_BATCH_TIMEOUT) {
            self.set("batch_timeout_secs", value.trim())?;
        }
        Ok(())
    }
}

/// Parse a pool size, accepting 1..=8
pub fn parse_pool_size(value: &str) -> Result<usize, ConfigError> {
    let size: usize = value
        .parse()
        .map_err(|_| ConfigError::invalid("pool_size", "expected an integer"))?;
    if !(1..=MAX_POOL_SIZE).contains(&size) {
        return Err(ConfigError::invalid(
            "pool_size",
            format!("must be within 1..={}", MAX_POOL_SIZE),
        ));
    }
    Ok(size)
}

/// Parse a timeout in seconds; empty, `0` or `none` disables it
pub fn parse_timeout(value: &str) -> Result<Option<Duration>, ConfigError> {
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let secs: f64 = value
        .parse()
        .map_err(|_| ConfigError::invalid("batch_timeout_secs", "expected seconds"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(ConfigError::invalid(
            "batch_timeout_secs",
            "must be a non-negative number",
        ));
    }
    if secs == 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|_| ConfigError::invalid("batch_timeout_secs", "too large"))
}

fn parse_secs(key: &str, value: &str) -> Result<f64, ConfigError> {
    let secs: f64 = value
        .parse()
        .map_err(|_| ConfigError::invalid(key, "expected seconds"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::invalid(key, "must be positive"));
    }
    Ok(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        assert_eq!(MixerConfig::parse(""), MixerConfig::default());
    }

    #[test]
    fn test_parse_with_values() {
        let content = "# Comment\npool_size=4\nbatch_timeout_secs=90\nbeats = 8\n# Another comment";
        let config = MixerConfig::parse(content);
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.batch_timeout, Some(Duration::from_secs(90)));
        assert_eq!(config.beats, 8);
        assert_eq!(config.sample_rate, 44100);
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = MixerConfig::parse("pool_size=64\nsample_rate=fast\nunknown=1");
        assert_eq!(config, MixerConfig::default());
    }

    #[test]
    fn test_set_errors() {
        let mut config = MixerConfig::default();
        assert!(matches!(
            config.set("pool_size", "0"),
            Err(ConfigError::Invalid { .. })
        ));
        assert_eq!(
            config.set("colour", "blue"),
            Err(ConfigError::UnknownKey("colour".into()))
        );
        assert!(config.set("clip_analysis_secs", "-3").is_err());
    }

    #[test]
    fn test_timeout_parsing() {
        assert_eq!(parse_timeout("none"), Ok(None));
        assert_eq!(parse_timeout("0"), Ok(None));
        assert_eq!(parse_timeout("1.5"), Ok(Some(Duration::from_millis(1500))));
        assert!(parse_timeout("-1").is_err());
    }

    #[test]
    fn test_oversized_timeout_is_an_error() {
        assert!(matches!(
            parse_timeout("1e30"),
            Err(ConfigError::Invalid { .. })
        ));

        let mut config = MixerConfig::default();
        assert!(config.set("batch_timeout_secs", "1e30").is_err());
        assert!(config
            .apply_env(|key| (key == ENV_BATCH_TIMEOUT).then(|| "1e300".to_string()))
            .is_err());
        assert_eq!(config.batch_timeout, None);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = MixerConfig::default();
        config
            .apply_env(|key| match key {
                ENV_POOL_SIZE => Some(" 3 ".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.batch_timeout, None);

        let result = config.apply_env(|key| (key == ENV_BATCH_TIMEOUT).then(|| "soon".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = MixerConfig {
            pool_size: 1,
            batch_timeout: Some(Duration::from_secs(30)),
            beats: 6,
            ..Default::default()
        };
        assert_eq!(MixerConfig::parse(&config.serialize()), config);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("woom").join("config.txt");
        let config = MixerConfig {
            pool_size: 4,
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(MixerConfig::load_from(&path).unwrap(), config);
    }
}
