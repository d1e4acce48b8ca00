//! Output formatting for region tables (xlsx, table, JSON, markdown, CSV) and
//! the sinks that write them.

use crate::config::OutputFormat;
use crate::invitro::{AnalysisRecord, RegionResult, COLUMNS};
use anyhow::{Context, Result};
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Sheet names are limited to this many characters.
pub const MAX_SHEET_NAME: usize = 31;

const SHEET_FORBIDDEN: [char; 7] = ['[', ']', '*', ':', '/', '\\', '?'];

/// Widest cell in table output before truncation.
const TABLE_CELL_WIDTH: usize = 40;

/// Default CSV output directory when none is given.
pub const DEFAULT_CSV_DIR: &str = "results";

/// Default workbook path when none is given.
pub const DEFAULT_WORKBOOK: &str = "results.xlsx";

/// One region as it appears in JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct SheetEntry<'a> {
    pub sheet: &'a str,
    pub region: &'a str,
    pub elapsed_secs: f64,
    pub records: &'a [AnalysisRecord],
}

impl<'a> SheetEntry<'a> {
    pub fn new(sheet: &'a str, result: &'a RegionResult) -> Self {
        Self {
            sheet,
            region: &result.region,
            elapsed_secs: result.elapsed.as_secs_f64(),
            records: &result.records,
        }
    }
}

/// Formats region tables for output.
pub struct Formatter {
    format: OutputFormat,
}

impl Formatter {
    /// Creates a new formatter.
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Formats one region under the given sheet name.
    pub fn format_region(&self, sheet: &str, result: &RegionResult) -> String {
        match self.format {
            OutputFormat::Json => self.json_region(sheet, result),
            OutputFormat::Table => self.table_region(sheet, result),
            OutputFormat::Markdown => self.markdown_region(sheet, result),
            // Workbooks are binary; their text form is the CSV rendering of the sheet
            OutputFormat::Csv | OutputFormat::Xlsx => self.csv_records(&result.records),
        }
    }

    // JSON formatting

    fn json_region(&self, sheet: &str, result: &RegionResult) -> String {
        serde_json::to_string_pretty(&SheetEntry::new(sheet, result))
            .unwrap_or_else(|_| "{}".to_string())
    }

    /// Formats entries as one JSON array.
    pub fn json_sheets(&self, entries: &[SheetEntry<'_>]) -> String {
        serde_json::to_string_pretty(entries).unwrap_or_else(|_| "[]".to_string())
    }

    // Table formatting

    fn table_region(&self, sheet: &str, result: &RegionResult) -> String {
        let rows: Vec<[String; 7]> = result
            .records
            .iter()
            .map(|r| r.fields().map(|f| truncate(f, TABLE_CELL_WIDTH)))
            .collect();

        let mut widths = COLUMNS.map(|c| c.chars().count().min(TABLE_CELL_WIDTH));
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let render = |cells: [&str; 7]| -> String {
            cells
                .iter()
                .zip(widths)
                .map(|(cell, width)| format!("{:<width$}", cell))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };

        let mut lines = Vec::new();
        lines.push(format!("{} ({:.1}s)", sheet, result.elapsed.as_secs_f64()));
        lines.push(String::new());
        let header = COLUMNS.map(|c| truncate(c, TABLE_CELL_WIDTH));
        lines.push(render(header.each_ref().map(String::as_str)));
        lines.push(widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  "));

        for row in &rows {
            lines.push(render(row.each_ref().map(|s| s.as_str())));
        }

        lines.push(String::new());
        lines.push(format!("Total: {} analyses", rows.len()));

        lines.join("\n")
    }

    // Markdown formatting

    fn markdown_region(&self, sheet: &str, result: &RegionResult) -> String {
        let mut lines = Vec::new();

        lines.push(format!("## {}", sheet));
        lines.push(String::new());
        lines.push(format!("| {} |", COLUMNS.join(" | ")));
        lines.push(format!("|{}", "---|".repeat(COLUMNS.len())));

        for record in &result.records {
            let cells: Vec<String> = record.fields().iter().map(|f| markdown_escape(f)).collect();
            lines.push(format!("| {} |", cells.join(" | ")));
        }

        lines.push(String::new());
        lines.push(format!(
            "*{} analyses, {:.1}s*",
            result.records.len(),
            result.elapsed.as_secs_f64()
        ));

        lines.join("\n")
    }

    // CSV formatting

    fn csv_header(&self) -> String {
        COLUMNS.join(",")
    }

    fn csv_records(&self, records: &[AnalysisRecord]) -> String {
        let mut lines = Vec::new();
        lines.push(self.csv_header());

        for record in records {
            let cells: Vec<String> = record.fields().iter().map(|f| Self::csv_escape(f)).collect();
            lines.push(cells.join(","));
        }

        lines.join("\n")
    }

    fn csv_escape(s: &str) -> String {
        if s.contains([',', '"', '\n', '\r']) {
            format!("\"{}\"", s.replace('"', "\"\""))
        } else {
            s.to_string()
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

fn markdown_escape(s: &str) -> String {
    s.replace('|', "\\|")
}

/// Makes a region name usable as a sheet name.
///
/// Each of `[ ] * : / \ ?` becomes `_`, leading and trailing apostrophes
/// are dropped, the result is cut to 31 characters, and an empty result
/// becomes `sheet`.
pub fn sanitize_sheet_name(name: &str) -> String {
    let safe: String = name
        .trim_matches('\'')
        .chars()
        .map(|c| if SHEET_FORBIDDEN.contains(&c) { '_' } else { c })
        .take(MAX_SHEET_NAME)
        .collect();
    let safe = safe.trim_end_matches('\'').to_string();

    if safe.is_empty() {
        "sheet".to_string()
    } else {
        safe
    }
}

/// Hands out sanitized sheet names, suffixing repeats with ` (n)`.
#[derive(Debug, Default)]
pub struct SheetNames {
    used: HashSet<String>,
}

impl SheetNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, region: &str) -> String {
        let base = sanitize_sheet_name(region);
        if self.used.insert(base.to_lowercase()) {
            return base;
        }

        let mut n = 2;
        loop {
            let suffix = format!(" ({})", n);
            let keep = MAX_SHEET_NAME.saturating_sub(suffix.chars().count());
            let candidate: String = base.chars().take(keep).chain(suffix.chars()).collect();
            if self.used.insert(candidate.to_lowercase()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Receives region tables as the pipeline completes them.
pub trait TableSink {
    /// Writes one finished region.
    fn write_region(&mut self, result: &RegionResult) -> Result<()>;

    /// Called once after the last region.
    fn finish(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
enum Target {
    /// One file per region.
    Directory(PathBuf),
    /// One worksheet per region.
    Workbook(PathBuf),
    File(PathBuf),
    Stdout,
}

/// Writes region tables in the configured format.
///
/// Xlsx is one workbook with a worksheet per region. CSV goes to a
/// directory with one `<sheet>.csv` per region. JSON is a
/// single array. Markdown and table output is one document with a section
/// per region. Files are rewritten after every region so a partial run
/// still leaves complete output behind.
pub struct WorkbookSink {
    formatter: Formatter,
    target: Target,
    names: SheetNames,
    sheets: Vec<(String, RegionResult)>,
}

impl WorkbookSink {
    /// Creates a sink. `output` of `None` means stdout, [`DEFAULT_CSV_DIR`]
    /// for CSV, or [`DEFAULT_WORKBOOK`] for xlsx.
    pub fn new(format: OutputFormat, output: Option<PathBuf>) -> Result<Self> {
        let target = match (format, output) {
            (OutputFormat::Csv, path) => {
                let dir = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CSV_DIR));
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
                Target::Directory(dir)
            }
            (OutputFormat::Xlsx, path) => {
                let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_WORKBOOK));
                create_parent_dir(&path)?;
                Target::Workbook(path)
            }
            (_, Some(path)) => {
                create_parent_dir(&path)?;
                Target::File(path)
            }
            (_, None) => Target::Stdout,
        };

        Ok(Self { formatter: Formatter::new(format), target, names: SheetNames::new(), sheets: Vec::new() })
    }

    /// Sheet names handed out so far, in write order.
    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|(sheet, _)| sheet.as_str()).collect()
    }

    /// Where output goes, for log lines.
    pub fn destination(&self) -> String {
        match &self.target {
            Target::Directory(p) | Target::Workbook(p) | Target::File(p) => p.display().to_string(),
            Target::Stdout => "stdout".to_string(),
        }
    }

    fn render_document(&self) -> String {
        match self.formatter.format() {
            OutputFormat::Json => {
                let entries: Vec<SheetEntry<'_>> =
                    self.sheets.iter().map(|(sheet, result)| SheetEntry::new(sheet, result)).collect();
                self.formatter.json_sheets(&entries)
            }
            _ => self
                .sheets
                .iter()
                .map(|(sheet, result)| self.formatter.format_region(sheet, result))
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }

    /// Builds the whole workbook from the sheets written so far.
    fn save_workbook(&self, path: &Path) -> Result<()> {
        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();

        for (sheet, result) in &self.sheets {
            let worksheet = workbook.add_worksheet();
            worksheet
                .set_name(sheet.as_str())
                .with_context(|| format!("Invalid sheet name: {}", sheet))?;

            for (col, title) in (0u16..).zip(COLUMNS) {
                worksheet.write_string_with_format(0, col, title, &bold)?;
            }
            for (row, record) in (1u32..).zip(&result.records) {
                for (col, value) in (0u16..).zip(record.fields()) {
                    worksheet.write_string(row, col, value)?;
                }
            }
            worksheet.autofit();
        }

        workbook
            .save(path)
            .with_context(|| format!("Failed to write workbook: {}", path.display()))
    }
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }
    Ok(())
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, format!("{}\n", content))
        .with_context(|| format!("Failed to write output: {}", path.display()))
}

impl TableSink for WorkbookSink {
    fn write_region(&mut self, result: &RegionResult) -> Result<()> {
        let sheet = self.names.claim(&result.region);
        debug!("Writing {} rows for {} as sheet {}", result.len(), result.region, sheet);

        match &self.target {
            Target::Directory(dir) => {
                let path = dir.join(format!("{}.csv", sheet));
                write_file(&path, &self.formatter.format_region(&sheet, result))?;
            }
            Target::Stdout if self.formatter.format() != OutputFormat::Json => {
                if !self.sheets.is_empty() {
                    println!();
                }
                println!("{}", self.formatter.format_region(&sheet, result));
            }
            _ => {}
        }

        self.sheets.push((sheet, result.clone()));

        match &self.target {
            Target::File(path) => write_file(path, &self.render_document())?,
            Target::Workbook(path) => self.save_workbook(path)?,
            _ => {}
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if matches!(self.target, Target::Stdout) && self.formatter.format() == OutputFormat::Json {
            println!("{}", self.render_document());
        }

        info!("Wrote {} tables to {}", self.sheets.len(), self.destination());
        Ok(())
    }
}
