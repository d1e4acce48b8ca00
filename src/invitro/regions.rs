//! Region name to listing URL resolution.
//!
//! Slugs come from three tiers, checked in order: the mapping scraped from
//! the site's city picker during this run, the persisted cache from earlier
//! runs, and finally the normalized region name itself.

use crate::error::is_cancelled;
use crate::invitro::client::PageFetch;
use crate::invitro::selectors::listing;
use anyhow::{Context, Result};
use scraper::Html;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Region that the site serves from the root listing.
const DEFAULT_REGION: &str = "москва";

/// Where a slug came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlugTier {
    Site,
    Cache,
    Guess,
}

impl fmt::Display for SlugTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlugTier::Site => write!(f, "site"),
            SlugTier::Cache => write!(f, "cache"),
            SlugTier::Guess => write!(f, "guess"),
        }
    }
}

/// Lowercased region name to slug. An empty slug means the root listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionSlugMap {
    site_sourced: HashMap<String, String>,
    cache: BTreeMap<String, String>,
}

impl RegionSlugMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(cache: BTreeMap<String, String>) -> Self {
        Self { site_sourced: HashMap::new(), cache }
    }

    /// Loads the cache tier from a JSON object file.
    ///
    /// A missing file gives an empty map. So does an unreadable or malformed
    /// one, with a warning.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No slug cache at {}", path.display());
            return Self::new();
        }

        let parsed = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read slug cache: {}", path.display()))
            .and_then(|content| {
                serde_json::from_str::<BTreeMap<String, String>>(&content)
                    .with_context(|| format!("Failed to parse slug cache: {}", path.display()))
            });

        match parsed {
            Ok(cache) => {
                debug!("Loaded {} cached slugs from {}", cache.len(), path.display());
                Self::with_cache(cache)
            }
            Err(e) => {
                warn!("{:#}, starting with an empty cache", e);
                Self::new()
            }
        }
    }

    /// Writes the cache tier as pretty-printed JSON.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&self.cache).context("Failed to serialize slug cache")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write slug cache: {}", path.display()))
    }

    /// Replaces the site tier.
    pub fn set_site_sourced(&mut self, mapping: HashMap<String, String>) {
        self.site_sourced = mapping;
    }

    pub fn site_sourced(&self) -> &HashMap<String, String> {
        &self.site_sourced
    }

    pub fn cache(&self) -> &BTreeMap<String, String> {
        &self.cache
    }

    /// Looks up a normalized name. A site hit is copied into the cache first.
    pub fn lookup(&mut self, name: &str) -> Option<(String, SlugTier)> {
        if let Some(slug) = self.site_sourced.get(name) {
            self.cache.insert(name.to_string(), slug.clone());
            return Some((slug.clone(), SlugTier::Site));
        }
        self.cache.get(name).map(|slug| (slug.clone(), SlugTier::Cache))
    }
}

/// Parses the city picker into lowercased name to slug.
///
/// Entries with an empty name or empty code are skipped. Moscow is folded
/// onto the empty slug since the site serves it from the root listing.
pub fn parse_city_slugs(html: &str) -> HashMap<String, String> {
    let document = Html::parse_document(html);
    let mut slugs = HashMap::new();

    for item in document.select(&listing::CITY_ITEM) {
        let name = item.text().collect::<String>().trim().to_lowercase();
        let code = item.value().attr(listing::CITY_CODE_ATTR).unwrap_or("").trim();
        if name.is_empty() || code.is_empty() {
            continue;
        }

        let slug = if name == DEFAULT_REGION { String::new() } else { code.to_string() };
        slugs.insert(name, slug);
    }

    slugs
}

/// Turns region names into listing URLs.
#[derive(Debug, Clone)]
pub struct RegionResolver {
    listing_url: String,
    slugs: RegionSlugMap,
}

impl RegionResolver {
    /// `listing_url` is the root listing and must end with `/`.
    pub fn new(listing_url: impl Into<String>, slugs: RegionSlugMap) -> Self {
        Self { listing_url: listing_url.into(), slugs }
    }

    pub fn slugs(&self) -> &RegionSlugMap {
        &self.slugs
    }

    /// Fetches `probe_url` and installs the city picker as the site tier.
    ///
    /// Returns the number of slugs found. Every failure except cancellation
    /// is logged and leaves resolution to the cache and guess tiers.
    pub async fn load_site_mapping<F: PageFetch + ?Sized>(
        &mut self,
        fetcher: &F,
        probe_url: &str,
    ) -> Result<usize> {
        let outcome = match fetcher.fetch(probe_url).await {
            Ok(outcome) => outcome,
            Err(e) if is_cancelled(&e) => return Err(e),
            Err(e) => {
                warn!("site slug mapping unavailable: {:#}", e);
                return Ok(0);
            }
        };

        if !outcome.has_body() {
            warn!("site slug mapping unavailable: no response from {}", probe_url);
            return Ok(0);
        }

        let mapping = parse_city_slugs(&outcome.body);
        if mapping.is_empty() {
            warn!("site slug mapping unavailable: no city picker on {}", probe_url);
        } else {
            info!("Loaded {} city slugs from site", mapping.len());
        }

        let count = mapping.len();
        self.slugs.set_site_sourced(mapping);
        Ok(count)
    }

    /// Resolves a region name to its slug and the tier that supplied it.
    pub fn resolve(&mut self, region: &str) -> (String, SlugTier) {
        let name = region.trim().to_lowercase();
        match self.slugs.lookup(&name) {
            Some(found) => found,
            None => {
                debug!("No slug mapping for {}, guessing slug", name);
                (name, SlugTier::Guess)
            }
        }
    }

    pub fn resolve_slug(&mut self, region: &str) -> String {
        self.resolve(region).0
    }

    /// Listing URL for a region.
    pub fn resolve_url(&mut self, region: &str) -> String {
        let slug = self.resolve_slug(region);
        self.url_for_slug(&slug)
    }

    pub fn url_for_slug(&self, slug: &str) -> String {
        if slug.is_empty() {
            self.listing_url.clone()
        } else {
            format!("{}{}/", self.listing_url, urlencoding::encode(slug))
        }
    }

    /// Writes the cache tier to `path`.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        self.slugs.persist(path)
    }
}
