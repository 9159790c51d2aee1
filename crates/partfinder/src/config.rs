use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{FinderError, Result};

pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 250;

/// Settings supplied by the host at construction.
///
/// Missing fields fall back to their defaults, so a partial document merges
/// over [`FinderConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinderConfig {
    pub cache_ttl_secs: u64,
    /// Worker pool size; `None` sizes the pool from available parallelism.
    pub max_workers: Option<usize>,
    /// Edge of the square box thumbnails are fit into, in pixels.
    pub thumbnail_size: u32,
    pub parallel_loading: bool,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_workers: None,
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
            parallel_loading: true,
        }
    }
}

impl FinderConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|error| FinderError::Config(format!("invalid config json: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Loads `path`, or returns the defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_ttl_secs == 0 {
            return Err(FinderError::Config(
                "cache_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_workers == Some(0) {
            return Err(FinderError::Config(
                "max_workers must be greater than zero".to_string(),
            ));
        }
        if self.thumbnail_size == 0 {
            return Err(FinderError::Config(
                "thumbnail_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let config = FinderConfig::default();
        assert_eq!(config.cache_ttl_secs, 300);
        assert_eq!(config.max_workers, None);
        assert_eq!(config.thumbnail_size, 250);
        assert!(config.parallel_loading);
    }

    #[test]
    fn partial_json_merges_over_defaults() {
        let config = FinderConfig::from_json_str(r#"{"max_workers": 3}"#).unwrap();
        assert_eq!(config.max_workers, Some(3));
        assert_eq!(config.cache_ttl_secs, 300);
        assert!(config.parallel_loading);
    }

    #[test]
    fn rejects_zero_values() {
        assert!(FinderConfig::from_json_str(r#"{"max_workers": 0}"#).is_err());
        assert!(FinderConfig::from_json_str(r#"{"thumbnail_size": 0}"#).is_err());
        assert!(FinderConfig::from_json_str(r#"{"cache_ttl_secs": 0}"#).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        let error = FinderConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(error, FinderError::Config(_)));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = FinderConfig::load_or_default(&temp.path().join("config.json")).unwrap();
        assert_eq!(config, FinderConfig::default());
    }

    #[test]
    fn loads_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, r#"{"parallel_loading": false, "thumbnail_size": 128}"#).unwrap();
        let config = FinderConfig::load(&path).unwrap();
        assert!(!config.parallel_loading);
        assert_eq!(config.thumbnail_size, 128);
    }
}
