//! Storage layer for survey persistence.
//!
//! This module provides SQLite-based storage for tests, brands, words, runs
//! and trials, plus the aggregate queries the panorama and CSV export are
//! built from. Deleting a test cascades to every dependent row.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;

/// Response-label mode of a test: which pair of labels participants answer
/// with. Stored as `'pn'` / `'sn'`; an absent column value reads as
/// [`ResponseLabels::PositiveNegative`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseLabels {
    /// positivo / negativo.
    #[default]
    #[serde(rename = "pn")]
    PositiveNegative,
    /// SIM / NÃO.
    #[serde(rename = "sn")]
    YesNo,
}

impl ResponseLabels {
    /// Get the mode's wire form as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseLabels::PositiveNegative => "pn",
            ResponseLabels::YesNo => "sn",
        }
    }

    /// Display labels for the two response keys, positive first.
    pub fn labels(&self) -> (&'static str, &'static str) {
        match self {
            ResponseLabels::PositiveNegative => ("positivo", "negativo"),
            ResponseLabels::YesNo => ("SIM", "NÃO"),
        }
    }
}

impl std::fmt::Display for ResponseLabels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResponseLabels {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pn" => Ok(ResponseLabels::PositiveNegative),
            "sn" => Ok(ResponseLabels::YesNo),
            _ => Err(format!("Unknown response-label mode: {}", s)),
        }
    }
}

/// Summary row for the test listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    /// Test identifier.
    pub id: i64,
    /// Test name.
    pub name: String,
    /// When the test was created.
    pub created_at: DateTime<Utc>,
}

/// A test with its full brand and word sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDetail {
    /// Test identifier.
    pub id: i64,
    /// Test name.
    pub name: String,
    /// When the test was created.
    pub created_at: DateTime<Utc>,
    /// Label mode participants answer with.
    pub response_labels: ResponseLabels,
    /// Brands owned by this test.
    pub brands: Vec<Brand>,
    /// Words owned by this test.
    pub words: Vec<Word>,
}

/// A brand within a test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brand {
    /// Brand identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Optional prime image URL.
    pub image_url: Option<String>,
}

/// An evaluative word within a test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    /// Word identifier.
    pub id: i64,
    /// The word itself.
    pub text: String,
}

/// Payload for creating a test with its brands and words in one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTest {
    /// Test name.
    pub name: String,
    /// Label mode.
    pub response_labels: ResponseLabels,
    /// Brands to create.
    pub brands: Vec<NewBrand>,
    /// Word texts to create.
    pub words: Vec<String>,
}

/// A brand to be created with a test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBrand {
    /// Display name.
    pub name: String,
    /// Optional prime image URL.
    #[serde(default)]
    pub image_url: Option<String>,
}

/// One participant's attempt at a test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    /// Run identifier.
    pub id: i64,
    /// Parent test id.
    pub test_id: i64,
    /// Optional participant age.
    pub age: Option<i64>,
    /// Optional participant gender.
    pub gender: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run completed; `None` while in progress.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Run listing row with its trial count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Run identifier.
    pub id: i64,
    /// Optional participant age.
    pub age: Option<i64>,
    /// Optional participant gender.
    pub gender: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run completed; `None` while in progress.
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of trials recorded so far.
    pub trial_count: i64,
}

/// A trial to be recorded. Reaction time must already be clamped and rounded
/// by the recording operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTrial {
    /// Parent run id.
    pub run_id: i64,
    /// Brand presented.
    pub brand_id: i64,
    /// Word presented.
    pub word_id: i64,
    /// Participant classification.
    pub positive: bool,
    /// Response latency in whole milliseconds, never negative.
    pub rt_ms: i64,
}

/// A recorded trial joined with its brand and word, as shown in run detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialDetail {
    /// Trial identifier.
    pub id: i64,
    /// Participant classification.
    pub positive: bool,
    /// Response latency in milliseconds.
    pub rt_ms: i64,
    /// Brand presented.
    pub brand_id: i64,
    /// Brand display name.
    pub brand_name: String,
    /// Brand prime image, if any.
    pub brand_image_url: Option<String>,
    /// Word presented.
    pub word_id: i64,
    /// The word itself.
    pub word_text: String,
}

/// One (word, brand) cell of the panorama matrix. Cells exist only for pairs
/// with at least one recorded trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixCell {
    /// Word axis.
    pub word_id: i64,
    /// Brand axis.
    pub brand_id: i64,
    /// Positive classification count.
    pub positive: i64,
    /// Negative classification count (total - positive).
    pub negative: i64,
    /// Total trial count for the pair.
    pub total: i64,
}

/// Mean reaction time for one brand across all its trials in all runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandReactionTime {
    /// Brand identifier.
    pub brand_id: i64,
    /// Arithmetic mean of rt_ms; fractional.
    pub avg_rt_ms: f64,
}

/// One CSV export row: a single trial with its run demographics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    /// Participant gender, if given.
    pub gender: Option<String>,
    /// Participant age, if given.
    pub age: Option<i64>,
    /// Brand display name.
    pub brand_name: String,
    /// Word text.
    pub word_text: String,
    /// Participant classification.
    pub positive: bool,
    /// Response latency in milliseconds.
    pub rt_ms: i64,
}

/// Storage trait for database operations.
///
/// Row-returning methods make no existence checks; the service layer decides
/// which absences are `NotFound`.
#[async_trait]
pub trait Storage: Send + Sync {
    // Test operations

    /// Create a test with its brands and words atomically; returns the test id.
    async fn create_test(&self, new: &NewTest) -> StorageResult<i64>;
    /// Fetch a test with its brands and words.
    async fn get_test(&self, id: i64) -> StorageResult<Option<TestDetail>>;
    /// List all tests, newest first.
    async fn list_tests(&self) -> StorageResult<Vec<TestSummary>>;
    /// Delete a test and, transitively, its brands, words, runs and trials.
    /// Returns whether a row was deleted.
    async fn delete_test(&self, id: i64) -> StorageResult<bool>;
    /// Whether a test exists.
    async fn test_exists(&self, id: i64) -> StorageResult<bool>;

    // Run operations

    /// Create a run for a test; returns the run id.
    async fn create_run(
        &self,
        test_id: i64,
        age: Option<i64>,
        gender: Option<&str>,
    ) -> StorageResult<i64>;
    /// Fetch a run by id.
    async fn get_run(&self, id: i64) -> StorageResult<Option<Run>>;
    /// Set a run's completion timestamp. Returns whether the run existed.
    async fn complete_run(&self, id: i64) -> StorageResult<bool>;
    /// List a test's runs with their trial counts, newest first.
    async fn list_runs(&self, test_id: i64) -> StorageResult<Vec<RunSummary>>;

    // Trial operations

    /// Insert a trial; returns the trial id.
    async fn insert_trial(&self, trial: &NewTrial) -> StorageResult<i64>;
    /// A run's trials joined with brand and word, in response order.
    async fn run_trials(&self, run_id: i64) -> StorageResult<Vec<TrialDetail>>;

    // Aggregate queries

    /// Panorama matrix cells for a test; pairs without trials are absent.
    async fn matrix_cells(&self, test_id: i64) -> StorageResult<Vec<MatrixCell>>;
    /// Per-brand mean reaction time; brands without trials are absent.
    async fn brand_reaction_times(&self, test_id: i64)
        -> StorageResult<Vec<BrandReactionTime>>;
    /// All of a test's trials flattened for CSV export, ordered by run then
    /// trial id.
    async fn export_rows(&self, test_id: i64) -> StorageResult<Vec<ExportRow>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_labels_as_str() {
        assert_eq!(ResponseLabels::PositiveNegative.as_str(), "pn");
        assert_eq!(ResponseLabels::YesNo.as_str(), "sn");
    }

    #[test]
    fn test_response_labels_default() {
        assert_eq!(ResponseLabels::default(), ResponseLabels::PositiveNegative);
    }

    #[test]
    fn test_response_labels_from_str() {
        assert_eq!(
            "pn".parse::<ResponseLabels>().unwrap(),
            ResponseLabels::PositiveNegative
        );
        assert_eq!(
            "sn".parse::<ResponseLabels>().unwrap(),
            ResponseLabels::YesNo
        );
        assert_eq!(
            "SN".parse::<ResponseLabels>().unwrap(),
            ResponseLabels::YesNo
        );
        assert!("xx".parse::<ResponseLabels>().is_err());
    }

    #[test]
    fn test_response_labels_display_pairs() {
        assert_eq!(
            ResponseLabels::PositiveNegative.labels(),
            ("positivo", "negativo")
        );
        assert_eq!(ResponseLabels::YesNo.labels(), ("SIM", "NÃO"));
    }

    #[test]
    fn test_response_labels_serde_wire_form() {
        let json = serde_json::to_string(&ResponseLabels::YesNo).unwrap();
        assert_eq!(json, "\"sn\"");
        let back: ResponseLabels = serde_json::from_str("\"pn\"").unwrap();
        assert_eq!(back, ResponseLabels::PositiveNegative);
    }
}
