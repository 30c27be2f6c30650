use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lookbook_archive::{FetchCache, ReqwestTransport};
use lookbook_common::file_config::load_config_or_default;
use lookbook_common::Config;
use lookbook_harvest::extractor::JsonPageExtractor;
use lookbook_harvest::Harvest;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lookbook=info".parse()?))
        .init();

    info!("Lookbook harvest starting...");

    let config = Config::from_env();
    config.log_paths();
    let file_config = load_config_or_default(&config.config_path)?;

    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(
        file_config.fetch.timeout_secs,
    ))?);
    let cache = Arc::new(
        FetchCache::open_with_config(&config.cache_dir, transport, &file_config.fetch).await?,
    );

    let harvest = Harvest::new(config, file_config, cache, Arc::new(JsonPageExtractor));
    let report = harvest.run().await?;

    let pruned: usize = report
        .outfit_scopes
        .iter()
        .chain(&report.card_scopes)
        .map(|s| s.pruned())
        .sum();
    info!(
        outfit_scopes = report.outfit_scopes.len(),
        card_scopes = report.card_scopes.len(),
        pruned,
        songs_matched = report.songs.matched,
        "Done"
    );
    Ok(())
}
