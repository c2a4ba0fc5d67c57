//! Application Configuration
//!
//! Scanner settings stored in TOML format.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::{DateExtractor, DEFAULT_MAX_YEAR, DEFAULT_MIN_YEAR};
use crate::capture::CaptureConfig;
use crate::vision::RegionSpec;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scan window shape
    pub region: RegionSpec,
    /// Frame admission settings
    pub admission: AdmissionSettings,
    /// Date extraction settings
    pub extraction: ExtractionSettings,
    /// Recognizer settings
    pub recognizer: RecognizerSettings,
}

/// Frame admission settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionSettings {
    /// Minimum milliseconds between admitted frames
    pub min_interval_ms: u64,
    /// Frames buffered ahead of the worker; extra frames are dropped
    pub frame_queue_depth: usize,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: 160,
            frame_queue_depth: 2,
        }
    }
}

/// Date extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Earliest accepted year
    pub min_year: i32,
    /// Latest accepted year
    pub max_year: i32,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            min_year: DEFAULT_MIN_YEAR,
            max_year: DEFAULT_MAX_YEAR,
        }
    }
}

/// Recognizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerSettings {
    /// Give up on a recognition call after this many milliseconds
    pub timeout_ms: u64,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

impl AppConfig {
    /// Reject settings the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        let region = &self.region;
        if !(region.width_fraction > 0.0 && region.width_fraction <= 1.0) {
            bail!("region.width_fraction must be in (0, 1], got {}", region.width_fraction);
        }
        if !(region.aspect > 0.0 && region.aspect.is_finite()) {
            bail!("region.aspect must be positive, got {}", region.aspect);
        }
        if !(region.center_y_fraction > 0.0 && region.center_y_fraction <= 1.0) {
            bail!("region.center_y_fraction must be in (0, 1], got {}", region.center_y_fraction);
        }
        if self.admission.frame_queue_depth == 0 {
            bail!("admission.frame_queue_depth must be at least 1");
        }
        if self.extraction.min_year > self.extraction.max_year {
            bail!(
                "extraction.min_year ({}) is after extraction.max_year ({})",
                self.extraction.min_year,
                self.extraction.max_year
            );
        }
        if self.recognizer.timeout_ms == 0 {
            bail!("recognizer.timeout_ms must be at least 1");
        }
        Ok(())
    }

    /// Frame intake settings
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            min_interval: Duration::from_millis(self.admission.min_interval_ms),
            queue_depth: self.admission.frame_queue_depth,
        }
    }

    /// Date extractor for the configured year range
    pub fn date_extractor(&self) -> DateExtractor {
        DateExtractor::new(self.extraction.min_year, self.extraction.max_year)
    }

    /// Recognition timeout
    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_millis(self.recognizer.timeout_ms)
    }
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "expiryscan", "ExpiryScan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    Ok(proj_dirs.config_dir().to_path_buf())
}

/// Default configuration file location
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.toml"))
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to file, creating parent directories
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert!((config.region.width_fraction - 0.94).abs() < 1e-9);
        assert!((config.region.aspect - 2.8).abs() < 1e-9);
        assert!((config.region.center_y_fraction - 0.40).abs() < 1e-9);

        assert_eq!(config.admission.min_interval_ms, 160);
        assert_eq!(config.admission.frame_queue_depth, 2);
        assert_eq!(config.extraction.min_year, 2020);
        assert_eq!(config.extraction.max_year, 2050);
        assert_eq!(config.recognizer.timeout_ms, 5000);

        assert!(config.validate().is_ok());
        assert_eq!(config.capture_config().min_interval, Duration::from_millis(160));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = AppConfig::default();
        config.region.center_y_fraction = 0.5;
        config.admission.min_interval_ms = 250;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert!((parsed.region.center_y_fraction - 0.5).abs() < 1e-9);
        assert_eq!(parsed.admission.min_interval_ms, 250);
        assert_eq!(parsed.extraction.max_year, config.extraction.max_year);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str("[admission]\nmin_interval_ms = 90\n").unwrap();

        assert_eq!(parsed.admission.min_interval_ms, 90);
        assert_eq!(parsed.admission.frame_queue_depth, 2);
        assert!((parsed.region.aspect - 2.8).abs() < 1e-9);
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config.admission.min_interval_ms, loaded.admission.min_interval_ms);
        assert_eq!(config.recognizer.timeout_ms, loaded.recognizer.timeout_ms);
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        save_config(&AppConfig::default(), &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[extraction]\nmin_year = 2040\nmax_year = 2030").unwrap();

        let err = load_config(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("min_year"));
    }

    #[test]
    fn test_validate_region() {
        let mut config = AppConfig::default();
        config.region.width_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.region.aspect = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.region.center_y_fraction = -0.1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.region.center_y_fraction = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.region.center_y_fraction = 1.0;
        assert!(config.validate().is_ok());

        let mut config = AppConfig::default();
        config.admission.frame_queue_depth = 0;
        assert!(config.validate().is_err());
    }
}
