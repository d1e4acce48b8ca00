//! Invitro-specific modules for fetching, region resolution, link discovery and extraction.

pub mod client;
pub mod links;
pub mod models;
pub mod parser;
pub mod regions;
pub mod selectors;
pub mod strategy;

pub use client::{InvitroClient, PageFetch, RetryPolicy};
pub use links::LinkCollector;
pub use models::{AnalysisRecord, FetchOutcome, RegionResult, COLUMNS};
pub use parser::PageExtractor;
pub use regions::{RegionResolver, RegionSlugMap, SlugTier};
