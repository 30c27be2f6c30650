use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// TOML-backed configuration: fetch tunables, matcher thresholds and the
/// static page lists. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub fetch: FetchConfig,
    pub matcher: MatcherConfig,
    pub outfit_pages: Vec<PageConfig>,
    pub card_pages: Vec<PageConfig>,
    pub part_pages: Vec<PageConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// A slot validated this recently is served without any network call.
    pub freshness_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub timeout_secs: u64,
    /// Simultaneous image downloads.
    pub concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            freshness_secs: 600,
            max_attempts: 3,
            retry_delay_ms: 1_000,
            timeout_secs: 30,
            concurrency: 31,
        }
    }
}

/// Thresholds tuned on cropped card back-art; other image domains need their own values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub max_hamming: u32,
    pub min_correlation: f64,
    pub normalize_width: u32,
    pub normalize_height: u32,
    pub crop_x: u32,
    pub crop_y: u32,
    pub crop_width: u32,
    pub crop_height: u32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            max_hamming: 8,
            min_correlation: 0.9,
            normalize_width: 320,
            normalize_height: 448,
            crop_x: 32,
            crop_y: 40,
            crop_width: 256,
            crop_height: 96,
        }
    }
}

/// One page to visit.
#[derive(Debug, Clone, Deserialize)]
pub struct PageConfig {
    pub url: String,
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "No config file, using defaults");
        return Ok(FileConfig::default());
    }
    load_config(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config.fetch.concurrency, 31);
        assert_eq!(config.matcher.max_hamming, 8);
        assert!(config.outfit_pages.is_empty());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: FileConfig = toml::from_str(
            r#"
            [matcher]
            min_correlation = 0.8

            [[card_pages]]
            url = "https://example.com/cards/1.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.matcher.min_correlation, 0.8);
        assert_eq!(config.matcher.max_hamming, 8);
        assert_eq!(config.card_pages.len(), 1);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.fetch.max_attempts, 3);
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        assert!(toml::from_str::<FileConfig>("pages = 3").is_err());
    }
}
