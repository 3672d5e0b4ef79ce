//! Match records and report export

use crate::error::{MatchError, MatchResult};
use crate::selector::{MatchOutcome, MatchStatus};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Label used when a query has no accepted match
pub const NO_MATCH: &str = "No match";

/// Similarity above which a record counts towards the matched total
pub const MATCHED_COUNT_FLOOR: f64 = 0.3;

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReportFormat {
    /// Aligned plain text table
    #[default]
    Text,
    /// JSON report
    Json,
    /// Comma separated values, one line per query
    Csv,
}

impl ReportFormat {
    /// Guess the format from a file extension
    pub fn from_extension<P: AsRef<Path>>(path: P) -> Option<Self> {
        match crate::ingest::extension(path.as_ref())?.as_str() {
            "txt" => Some(Self::Text),
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

impl FromStr for ReportFormat {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(MatchError::Export(format!("unknown report format: {}", other))),
        }
    }
}

/// Confidence band of a similarity score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceTier {
    Poor,
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    pub fn from_similarity(similarity: f64) -> Self {
        if similarity >= 0.7 {
            Self::High
        } else if similarity >= 0.5 {
            Self::Medium
        } else if similarity >= 0.3 {
            Self::Low
        } else {
            Self::Poor
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Poor => "poor",
        }
    }
}

/// `mm:ss`, or `N/A` for unknown (non-positive) durations
pub fn format_duration(secs: f64) -> String {
    if !(secs > 0.0) || !secs.is_finite() {
        return "N/A".into();
    }
    let total = secs as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// One result row: a query and what it matched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// File name of the query
    pub query_name: String,
    pub query_path: PathBuf,
    /// Matched reference identity, or [`NO_MATCH`]
    pub matched: String,
    /// Similarity of the accepted match (0.0 when there is none)
    pub similarity: f64,
    pub query_duration: f64,
    /// Duration of the matched reference (0.0 when there is none)
    pub reference_duration: f64,
    /// Path of the matched reference (empty when there is none)
    pub reference_path: String,
    pub status: MatchStatus,
}

impl MatchRecord {
    pub fn from_outcome(query_path: &Path, outcome: &MatchOutcome) -> Self {
        let query_name = query_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| query_path.display().to_string());

        let (matched, similarity, reference_duration, reference_path) = match &outcome.best {
            Some(best) => (
                best.identity.clone(),
                best.similarity,
                best.duration,
                best.path.display().to_string(),
            ),
            None => (NO_MATCH.to_string(), 0.0, 0.0, String::new()),
        };

        Self {
            query_name,
            query_path: query_path.to_path_buf(),
            matched,
            similarity,
            query_duration: outcome.query_duration,
            reference_duration,
            reference_path,
            status: outcome.status,
        }
    }

    pub fn is_match(&self) -> bool {
        self.status == MatchStatus::Matched
    }

    pub fn confidence(&self) -> ConfidenceTier {
        ConfidenceTier::from_similarity(self.similarity)
    }
}

/// Collected match records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchReport {
    pub title: String,
    pub timestamp: String,
    pub threshold: f64,
    pub records: Vec<MatchRecord>,
}

impl MatchReport {
    pub fn new(title: impl Into<String>, threshold: f64) -> Self {
        Self {
            title: title.into(),
            timestamp: utc_timestamp(),
            threshold,
            records: Vec::new(),
        }
    }

    /// Builder pattern: set records
    pub fn with_records(mut self, records: Vec<MatchRecord>) -> Self {
        self.records = records;
        self
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }

    /// Records with similarity above 0.3
    pub fn matched_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.similarity > MATCHED_COUNT_FLOOR)
            .count()
    }

    /// One-line summary, e.g. "Found 3 matches out of 5 files"
    pub fn summary(&self) -> String {
        format!(
            "Found {} matches out of {} files",
            self.matched_count(),
            self.total()
        )
    }

    /// Generate report in specified format
    pub fn generate(&self, format: ReportFormat) -> MatchResult<String> {
        match format {
            ReportFormat::Text => Ok(self.to_text()),
            ReportFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| MatchError::Export(e.to_string())),
            ReportFormat::Csv => Ok(self.to_csv()),
        }
    }

    /// Save report to file
    pub fn save<P: AsRef<Path>>(&self, path: P, format: ReportFormat) -> MatchResult<()> {
        let content = self.generate(format)?;
        let mut file = std::fs::File::create(path.as_ref())?;
        file.write_all(content.as_bytes())?;
        log::info!("Exported {} records to {}", self.total(), path.as_ref().display());
        Ok(())
    }

    fn to_text(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!("{}\n", self.title));
        output.push_str(&format!("{}\n\n", "=".repeat(self.title.len())));
        output.push_str(&format!("Timestamp: {}\n", self.timestamp));
        output.push_str(&format!("Threshold: {:.2}\n\n", self.threshold));

        let name_width = self
            .records
            .iter()
            .map(|r| r.query_name.chars().count())
            .chain(std::iter::once("Remaster".len()))
            .max()
            .unwrap_or(8);
        let match_width = self
            .records
            .iter()
            .map(|r| r.matched.chars().count())
            .chain(std::iter::once("Original".len()))
            .max()
            .unwrap_or(8);

        output.push_str(&format!(
            "{:<nw$}  {:<mw$}  {:>10}  {:>8}  {:>8}  {}\n",
            "Remaster",
            "Original",
            "Similarity",
            "Length",
            "Orig.",
            "Confidence",
            nw = name_width,
            mw = match_width
        ));
        output.push_str(&"-".repeat(name_width + match_width + 48));
        output.push('\n');

        for record in &self.records {
            let confidence = if record.is_match() {
                record.confidence().label()
            } else {
                "-"
            };
            output.push_str(&format!(
                "{:<nw$}  {:<mw$}  {:>10.2}  {:>8}  {:>8}  {}\n",
                record.query_name,
                record.matched,
                record.similarity,
                format_duration(record.query_duration),
                format_duration(record.reference_duration),
                confidence,
                nw = name_width,
                mw = match_width
            ));
        }

        output.push_str(&"-".repeat(name_width + match_width + 48));
        output.push('\n');
        output.push_str(&self.summary());
        output.push('\n');
        output
    }

    fn to_csv(&self) -> String {
        let mut output = String::from(
            "remaster,original_match,similarity,remaster_duration,original_duration,remaster_path,original_path,status\n",
        );

        for record in &self.records {
            let fields = [
                csv_field(&record.query_name),
                csv_field(&record.matched),
                format!("{:.4}", record.similarity),
                format!("{:.2}", record.query_duration),
                format!("{:.2}", record.reference_duration),
                csv_field(&record.query_path.display().to_string()),
                csv_field(&record.reference_path),
                csv_field(&record.status.to_string()),
            ];
            output.push_str(&fields.join(","));
            output.push('\n');
        }
        output
    }
}

/// Quote a CSV field when it contains separators or quotes
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Current UTC time as ISO 8601 (seconds precision)
fn utc_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
