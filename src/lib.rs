//! invitro-harvest - Invitro analysis catalogue scraper
//!
//! Collects analysis names, codes, turnaround times and prices for a list of
//! regions and writes one table per region.

pub mod commands;
pub mod config;
pub mod error;
pub mod format;
pub mod input;
pub mod invitro;

pub use config::Config;
pub use error::{is_cancelled, Cancelled};
pub use invitro::models::{AnalysisRecord, RegionResult};
