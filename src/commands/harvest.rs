//! Harvest command: scrape every listed region into one table per region.

use crate::config::Config;
use crate::error::is_cancelled;
use crate::format::TableSink;
use crate::invitro::{
    AnalysisRecord, FetchOutcome, InvitroClient, LinkCollector, PageExtractor, PageFetch,
    RegionResolver, RegionResult, RegionSlugMap,
};
use anyhow::{Context, Result};
use futures::future::join_all;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Row count and timing of one written region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSummary {
    pub region: String,
    pub rows: usize,
    pub elapsed: Duration,
}

/// What a completed run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarvestSummary {
    pub regions: Vec<RegionSummary>,
    pub elapsed: Duration,
}

impl HarvestSummary {
    pub fn total_rows(&self) -> usize {
        self.regions.iter().map(|r| r.rows).sum()
    }

    /// Logs one line per region and a total line.
    pub fn log(&self, destination: &str) {
        for region in &self.regions {
            info!("[{}] rows={} time={:.1}s", region.region, region.rows, region.elapsed.as_secs_f64());
        }
        info!(
            "All done. Total time: {:.1}s, {} rows. Output: {}",
            self.elapsed.as_secs_f64(),
            self.total_rows(),
            destination
        );
    }
}

/// Runs the region pipeline.
///
/// Regions are processed one after another. Within a region every analysis
/// page is fetched concurrently, limited only by the client's permit pool.
pub struct HarvestCommand {
    config: Config,
    extractor: PageExtractor,
}

impl HarvestCommand {
    /// Creates a new harvest command.
    pub fn new(config: Config) -> Self {
        Self { config, extractor: PageExtractor::new() }
    }

    /// Runs the harvest against the live site.
    pub async fn execute(
        &self,
        regions: &[String],
        sink: &mut dyn TableSink,
        cancel: CancellationToken,
    ) -> Result<HarvestSummary> {
        let client =
            InvitroClient::new(&self.config, cancel).context("Failed to create HTTP client")?;

        self.execute_with_client(&client, regions, sink).await
    }

    /// Runs the harvest with a provided fetcher (for testing).
    ///
    /// The slug cache is written back whether the run completes, fails or is
    /// cancelled. A cancelled region is never handed to the sink.
    pub async fn execute_with_client(
        &self,
        fetcher: &impl PageFetch,
        regions: &[String],
        sink: &mut dyn TableSink,
    ) -> Result<HarvestSummary> {
        let collector = LinkCollector::new(&self.config.base_url, &self.config.fallback_link_pattern)?;
        let slugs = RegionSlugMap::load(&self.config.cache_path);
        let mut resolver = RegionResolver::new(self.config.listing_url(), slugs);

        let started = Instant::now();
        let outcome = self.run_regions(fetcher, &collector, &mut resolver, regions, sink).await;

        match resolver.persist(&self.config.cache_path) {
            Ok(()) => info!("City slugs cache saved to {}", self.config.cache_path.display()),
            Err(e) => warn!("Failed to save city slugs cache: {:#}", e),
        }

        let mut summary = outcome?;
        sink.finish()?;

        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    async fn run_regions(
        &self,
        fetcher: &impl PageFetch,
        collector: &LinkCollector,
        resolver: &mut RegionResolver,
        regions: &[String],
        sink: &mut dyn TableSink,
    ) -> Result<HarvestSummary> {
        resolver.load_site_mapping(fetcher, &self.config.slug_probe_url()).await?;

        let mut summary = HarvestSummary::default();
        for region in regions {
            let result = match self.process_region(fetcher, collector, resolver, region).await {
                Ok(result) => result,
                Err(e) if is_cancelled(&e) => {
                    warn!("Cancelled while processing {}, region discarded", region);
                    return Err(e);
                }
                Err(e) => {
                    error!("Error processing region {}: {:#}", region, e);
                    RegionResult::empty(region.as_str())
                }
            };

            sink.write_region(&result)
                .with_context(|| format!("Failed to write table for {}", region))?;

            summary.regions.push(RegionSummary {
                region: result.region,
                rows: result.records.len(),
                elapsed: result.elapsed,
            });
        }

        Ok(summary)
    }

    /// Resolves, lists, fetches and extracts one region.
    pub async fn process_region(
        &self,
        fetcher: &impl PageFetch,
        collector: &LinkCollector,
        resolver: &mut RegionResolver,
        region: &str,
    ) -> Result<RegionResult> {
        info!("Start region: {}", region);
        let started = Instant::now();

        let url = resolver.resolve_url(region);
        info!("Fetching listing for {}: {}", region, url);

        let listing = fetcher
            .fetch(&url)
            .await
            .with_context(|| format!("Failed to fetch listing {}", url))?;

        let mut links = if listing.has_body() { collector.collect(&listing.body) } else { Vec::new() };
        info!("Region {}: found {} analyses", region, links.len());

        let limit = self.config.per_region_link_limit;
        if limit > 0 && links.len() > limit {
            debug!("Keeping the first {} of {} links", limit, links.len());
            links.truncate(limit);
        }

        let pages = join_all(links.iter().map(|link| self.fetch_record(fetcher, link))).await;

        let mut records = Vec::with_capacity(pages.len());
        for page in pages {
            if let Some(record) = page? {
                records.push(record);
            }
        }

        let elapsed = started.elapsed();
        info!(
            "Finish region: {} in {:.1}s, records: {}",
            region,
            elapsed.as_secs_f64(),
            records.len()
        );

        Ok(RegionResult::new(region, records, elapsed))
    }

    /// Fetches and extracts one analysis page.
    ///
    /// `Ok(None)` drops the page. Only cancellation is returned as an error.
    async fn fetch_record(
        &self,
        fetcher: &impl PageFetch,
        url: &str,
    ) -> Result<Option<AnalysisRecord>> {
        let outcome = match fetcher.fetch(url).await {
            Ok(outcome) => outcome,
            Err(e) if is_cancelled(&e) => return Err(e),
            Err(e) => {
                warn!("Failed to fetch {}: {:#}", url, e);
                return Ok(None);
            }
        };

        if !outcome.has_body() {
            return Ok(None);
        }
        if outcome.terminal {
            debug!("Extracting {} despite status {:?}", url, outcome.status);
        }

        let FetchOutcome { url, body, .. } = outcome;
        let extractor = self.extractor;
        let source = url.clone();

        match tokio::task::spawn_blocking(move || extractor.extract(&body, &source)).await {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                error!("Error parsing {}: {}", url, e);
                Ok(None)
            }
        }
    }
}
