use std::env;
use std::path::PathBuf;

/// Filesystem locations for one harvest run, loaded from environment variables.
/// Tunables and the chapter page list live in the TOML `FileConfig`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Snapshot, image tree and song reference art.
    pub output_dir: PathBuf,
    /// HTTP blob slots and the `_list.json` index.
    pub cache_dir: PathBuf,
    /// Hand-supplied images referenced by non-http URLs.
    pub custom_dir: PathBuf,
    pub config_path: PathBuf,
    pub corrections_path: PathBuf,
    pub known_typos_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables (and `.env` when present).
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            output_dir: path_env("LOOKBOOK_OUTPUT_DIR", "output"),
            cache_dir: path_env("LOOKBOOK_CACHE_DIR", "download"),
            custom_dir: path_env("LOOKBOOK_CUSTOM_DIR", "custom"),
            config_path: path_env("LOOKBOOK_CONFIG", "lookbook.toml"),
            corrections_path: path_env("LOOKBOOK_CORRECTIONS", "correction.json"),
            known_typos_path: path_env("LOOKBOOK_KNOWN_TYPOS", "known_typo.json"),
        }
    }

    /// All paths rooted under one directory. Used by tests and one-off runs.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            output_dir: root.join("output"),
            cache_dir: root.join("download"),
            custom_dir: root.join("custom"),
            config_path: root.join("lookbook.toml"),
            corrections_path: root.join("correction.json"),
            known_typos_path: root.join("known_typo.json"),
        }
    }

    pub fn log_paths(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  LOOKBOOK_OUTPUT_DIR: {}", self.output_dir.display());
        tracing::info!("  LOOKBOOK_CACHE_DIR: {}", self.cache_dir.display());
        tracing::info!("  LOOKBOOK_CUSTOM_DIR: {}", self.custom_dir.display());
        tracing::info!("  LOOKBOOK_CONFIG: {}", self.config_path.display());
    }
}

fn path_env(key: &str, default: &str) -> PathBuf {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}
