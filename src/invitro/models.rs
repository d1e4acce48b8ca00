//! Data models for fetched pages, extracted analyses, and per-city tables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Column headers of a region table, in record field order.
pub const COLUMNS: [&str; 7] = [
    "Категория",
    "Подкатегория",
    "Название анализа",
    "Код анализа во внутренней системе Invitro",
    "Код анализа по номенклатуре МЗ РФ (если есть)",
    "Срок выполнения анализа",
    "Стоимость анализа",
];

/// Result of one logical fetch.
///
/// An empty `body` means "no data for this URL", never an empty page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub url: String,
    pub body: String,
    /// Set when the server answered with a non-transient, non-200 status.
    pub terminal: bool,
    /// Last HTTP status seen, if any response arrived.
    pub status: Option<u16>,
}

impl FetchOutcome {
    /// A 200 response.
    pub fn ok(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self { url: url.into(), body: body.into(), terminal: false, status: Some(200) }
    }

    /// A non-retryable status; the body is kept for best-effort extraction.
    pub fn terminal(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self { url: url.into(), body: body.into(), terminal: true, status: Some(status) }
    }

    /// Every attempt failed transiently.
    pub fn exhausted(url: impl Into<String>, status: Option<u16>) -> Self {
        Self { url: url.into(), body: String::new(), terminal: false, status }
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }
}

/// One analysis row. Empty strings mean "not found on the page".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub category: String,
    pub subcategory: String,
    pub name: String,
    /// Invitro article number
    pub internal_code: String,
    /// Ministry of Health nomenclature code, e.g. `A09.05.023`
    pub nomenclature_code: String,
    pub turnaround: String,
    pub price: String,
}

impl AnalysisRecord {
    /// Field values in [`COLUMNS`] order.
    pub fn fields(&self) -> [&str; 7] {
        [
            self.category.as_str(),
            self.subcategory.as_str(),
            self.name.as_str(),
            self.internal_code.as_str(),
            self.nomenclature_code.as_str(),
            self.turnaround.as_str(),
            self.price.as_str(),
        ]
    }

    /// True if no strategy found anything at all.
    pub fn is_blank(&self) -> bool {
        self.fields().iter().all(|f| f.is_empty())
    }
}

/// Output of one region, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionResult {
    pub region: String,
    pub records: Vec<AnalysisRecord>,
    #[serde(with = "secs")]
    pub elapsed: Duration,
}

impl RegionResult {
    pub fn new(region: impl Into<String>, records: Vec<AnalysisRecord>, elapsed: Duration) -> Self {
        Self { region: region.into(), records, elapsed }
    }

    /// Placeholder for a region whose pipeline failed.
    pub fn empty(region: impl Into<String>) -> Self {
        Self::new(region, Vec::new(), Duration::ZERO)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
