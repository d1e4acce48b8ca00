//! Slugs command: show the region slug mapping and refresh the cache.

use crate::config::{Config, OutputFormat};
use crate::invitro::{InvitroClient, PageFetch, RegionResolver, RegionSlugMap, SlugTier};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One known region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlugRow {
    pub name: String,
    pub slug: String,
    pub tier: String,
}

/// Lists every region the site and the cache know about.
pub struct SlugsCommand {
    config: Config,
}

impl SlugsCommand {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn execute(&self, cancel: CancellationToken) -> Result<String> {
        let client =
            InvitroClient::new(&self.config, cancel).context("Failed to create HTTP client")?;
        self.execute_with_client(&client).await
    }

    /// Loads the site mapping, copies it into the cache and renders the
    /// merged view (for testing with a mock fetcher).
    pub async fn execute_with_client(&self, fetcher: &impl PageFetch) -> Result<String> {
        let slugs = RegionSlugMap::load(&self.config.cache_path);
        let mut resolver = RegionResolver::new(self.config.listing_url(), slugs);
        resolver.load_site_mapping(fetcher, &self.config.slug_probe_url()).await?;

        let names: BTreeSet<String> = resolver
            .slugs()
            .site_sourced()
            .keys()
            .chain(resolver.slugs().cache().keys())
            .cloned()
            .collect();

        let rows: Vec<SlugRow> = names
            .into_iter()
            .map(|name| {
                let (slug, tier) = resolver.resolve(&name);
                SlugRow { name, slug, tier: tier.to_string() }
            })
            .collect();

        match resolver.persist(&self.config.cache_path) {
            Ok(()) => info!("City slugs cache saved to {}", self.config.cache_path.display()),
            Err(e) => warn!("Failed to save city slugs cache: {:#}", e),
        }

        Ok(self.render(&rows))
    }

    fn render(&self, rows: &[SlugRow]) -> String {
        if self.config.format == OutputFormat::Json {
            return serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".to_string());
        }

        if rows.is_empty() {
            return "No region slugs known.".to_string();
        }

        let name_width = rows.iter().map(|r| r.name.chars().count()).max().unwrap_or(0).max(6);
        let slug_width = rows.iter().map(|r| r.slug.chars().count()).max().unwrap_or(0).max(4);

        let mut lines = Vec::new();
        lines.push(format!("{:<name_width$}  {:<slug_width$}  {}", "Region", "Slug", "Source"));
        lines.push(format!("{:-<name_width$}  {:-<slug_width$}  {:-<6}", "", "", ""));

        for row in rows {
            let slug = if row.slug.is_empty() { "(root)" } else { row.slug.as_str() };
            lines.push(format!("{:<name_width$}  {:<slug_width$}  {}", row.name, slug, row.tier));
        }

        lines.push(String::new());
        lines.push(format!(
            "Total: {} regions ({} from site)",
            rows.len(),
            rows.iter().filter(|r| r.tier == SlugTier::Site.to_string()).count()
        ));

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invitro::FetchOutcome;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct ProbeFetcher(Option<String>);

    #[async_trait]
    impl PageFetch for ProbeFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchOutcome> {
            Ok(match &self.0 {
                Some(html) => FetchOutcome::ok(url, html.as_str()),
                None => FetchOutcome::exhausted(url, None),
            })
        }
    }

    fn make_picker_html() -> String {
        r#"<div class="select-basket-city-item" data-code="moskva">Москва</div>
           <div class="select-basket-city-item" data-code="piter">Санкт-Петербург</div>"#
            .to_string()
    }

    fn make_config(dir: &TempDir, format: OutputFormat) -> Config {
        let cache_path = dir.path().join("slugs.json");
        std::fs::write(&cache_path, r#"{"аша": "asha", "санкт-петербург": "old"}"#).unwrap();
        Config { cache_path, format, ..Config::default() }
    }

    #[tokio::test]
    async fn test_slugs_merges_site_and_cache() {
        let dir = TempDir::new().unwrap();
        let cmd = SlugsCommand::new(make_config(&dir, OutputFormat::Json));

        let output = cmd.execute_with_client(&ProbeFetcher(Some(make_picker_html()))).await.unwrap();
        let rows: serde_json::Value = serde_json::from_str(&output).unwrap();
        let rows = rows.as_array().unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["name"], "аша");
        assert_eq!(rows[0]["tier"], "cache");
        assert_eq!(rows[1]["name"], "москва");
        assert_eq!(rows[1]["slug"], "");
        assert_eq!(rows[1]["tier"], "site");
        assert_eq!(rows[2]["name"], "санкт-петербург");
        assert_eq!(rows[2]["slug"], "piter");

        let saved = RegionSlugMap::load(dir.path().join("slugs.json"));
        assert_eq!(saved.cache().len(), 3);
        assert_eq!(saved.cache()["санкт-петербург"], "piter");
    }

    #[tokio::test]
    async fn test_slugs_table_without_site() {
        let dir = TempDir::new().unwrap();
        let cmd = SlugsCommand::new(make_config(&dir, OutputFormat::Table));

        let output = cmd.execute_with_client(&ProbeFetcher(None)).await.unwrap();
        assert!(output.contains("Region"));
        assert!(output.contains("asha"));
        assert!(output.contains("cache"));
        assert!(output.contains("Total: 2 regions (0 from site)"));
    }
}
