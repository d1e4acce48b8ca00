//! CLI command implementations.

pub mod harvest;
pub mod slugs;

pub use harvest::{HarvestCommand, HarvestSummary, RegionSummary};
pub use slugs::SlugsCommand;
