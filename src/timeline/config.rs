use crate::timeline::index::interval_samples;
use crate::timeline::io::DEFAULT_MAP_WINDOW;
use crate::timeline::{Result, TimelineError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// How a new timeline is laid out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// Native sample rate; every on-disk duration is expressed in it.
    pub sample_rate: u32,
    /// Spacing of index checkpoints in seconds.
    pub index_interval_secs: f64,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            index_interval_secs: 0.1,
        }
    }
}

impl WriterOptions {
    /// Create new options with validation
    pub fn new(sample_rate: u32, index_interval_secs: f64) -> Result<Self> {
        let options = Self {
            sample_rate,
            index_interval_secs,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(TimelineError::invalid_argument(
                "native sample rate must be positive",
            ));
        }
        interval_samples(self.index_interval_secs, self.sample_rate)?;
        Ok(())
    }
}

/// How an existing timeline is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Map the record area instead of issuing positional reads.
    pub use_mmap: bool,
    /// Size of one mapped window; records larger than this are still readable.
    pub map_window_bytes: u64,
    /// Walk every record header at open and check it against the header totals.
    pub verify_on_open: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            use_mmap: true,
            map_window_bytes: DEFAULT_MAP_WINDOW,
            verify_on_open: true,
        }
    }
}

impl ReaderOptions {
    pub fn mapped() -> Self {
        Self::default()
    }

    pub fn streamed() -> Self {
        Self {
            use_mmap: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.use_mmap && self.map_window_bytes == 0 {
            return Err(TimelineError::invalid_argument(
                "map window must be at least one byte",
            ));
        }
        Ok(())
    }
}

/// `[writer]` and `[reader]` tables of a voice-building configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    pub writer: WriterOptions,
    pub reader: ReaderOptions,
}

impl TimelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.writer.validate()?;
        self.reader.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TimelineConfig::default();
        config.validate().unwrap();
        assert!(config.reader.use_mmap);
        assert_eq!(config.writer.sample_rate, 16000);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = TimelineConfig::from_toml_str(
            r#"
            [writer]
            sample_rate = 22050

            [reader]
            use_mmap = false
            "#,
        )
        .unwrap();
        assert_eq!(config.writer.sample_rate, 22050);
        assert_eq!(config.writer.index_interval_secs, 0.1);
        assert!(!config.reader.use_mmap);
        assert!(config.reader.verify_on_open);
        assert_eq!(config.reader.map_window_bytes, DEFAULT_MAP_WINDOW);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(TimelineConfig::from_toml_str("[writer]\nsample_rate = 0\n").is_err());
        assert!(TimelineConfig::from_toml_str("[writer]\nindex_interval_secs = -0.5\n").is_err());
        assert!(TimelineConfig::from_toml_str("[reader]\nmap_window_bytes = 0\n").is_err());
        assert!(WriterOptions::new(16000, 0.0).is_err());
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = TimelineConfig::from_toml_str("[writer\n").unwrap_err();
        assert!(matches!(err, TimelineError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeline.toml");
        fs::write(&path, "[writer]\nindex_interval_secs = 0.05\n").unwrap();
        let config = TimelineConfig::from_file(&path).unwrap();
        assert_eq!(config.writer.index_interval_secs, 0.05);
    }
}
