//! Survey service operations.
//!
//! [`SurveyApi`] is the thin glue between callers (HTTP handlers, the local
//! client, the CLI) and storage: input validation, not-found checks, reaction
//! time normalization, and the aggregate/export assembly. Every operation
//! returns [`ApiResult`] and maps onto an HTTP-style status.

mod upload;

pub use upload::{sanitize_filename, AssetStore, PUBLIC_PREFIX};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregate::{csv, Panorama};
use crate::config::UploadConfig;
use crate::error::{ApiError, ApiResult};
use crate::storage::{
    NewBrand, NewTest, NewTrial, ResponseLabels, Run, RunSummary, SqliteStorage, Storage,
    TestDetail, TestSummary, TrialDetail,
};

/// Payload for creating a test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTestRequest {
    /// Test name; must not be blank.
    pub name: String,
    /// Label mode; defaults to positivo/negativo when omitted.
    #[serde(default)]
    pub response_labels: Option<ResponseLabels>,
    /// Brands to create with the test.
    pub brands: Vec<NewBrand>,
    /// Word texts to create with the test.
    pub words: Vec<String>,
}

/// Payload for starting a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRunRequest {
    /// Participant age; 0 or absent means undisclosed.
    #[serde(default)]
    pub age: Option<i64>,
    /// Participant gender; empty or absent means undisclosed.
    #[serde(default)]
    pub gender: Option<String>,
}

/// Payload for recording a trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordTrialRequest {
    /// Brand presented.
    pub brand_id: i64,
    /// Word presented.
    pub word_id: i64,
    /// Participant classification.
    pub is_positive: bool,
    /// Raw response latency in milliseconds, as measured by the client.
    pub rt_ms: f64,
}

/// Response body for test creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedTest {
    /// The new test's id.
    pub id: i64,
}

/// Response body for run creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStarted {
    /// The new run's id.
    pub run_id: i64,
}

/// Generic acknowledgment body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    /// Always true on success.
    pub ok: bool,
}

/// A run with its ordered trials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetail {
    /// Run metadata.
    pub run: Run,
    /// Trials in response order, joined with brand and word.
    pub trials: Vec<TrialDetail>,
}

/// Response body for asset upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedAsset {
    /// Public URL of the stored file.
    pub url: String,
}

/// Clamp a reported reaction time to a non-negative whole millisecond count.
///
/// Non-finite values collapse to zero; otherwise round to nearest, then
/// clamp at zero.
pub fn clamp_reaction_time(rt_ms: f64) -> i64 {
    if !rt_ms.is_finite() {
        return 0;
    }
    rt_ms.round().max(0.0) as i64
}

/// The survey service: every operation of the test/run API surface.
#[derive(Clone)]
pub struct SurveyApi {
    storage: SqliteStorage,
    assets: AssetStore,
}

impl SurveyApi {
    /// Create the service over a storage handle.
    pub fn new(storage: SqliteStorage, uploads: &UploadConfig) -> Self {
        Self {
            storage,
            assets: AssetStore::new(uploads),
        }
    }

    /// The underlying storage handle.
    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Create a test with its brands and words in one transaction.
    ///
    /// Rejects a blank name. Empty brand or word lists are accepted; such a
    /// test simply has no trial pairs.
    pub async fn create_test(&self, request: CreateTestRequest) -> ApiResult<i64> {
        if request.name.trim().is_empty() {
            return Err(ApiError::InvalidInput {
                message: "name is required".to_string(),
            });
        }

        let new = NewTest {
            name: request.name,
            response_labels: request.response_labels.unwrap_or_default(),
            brands: request.brands,
            words: request.words,
        };

        let id = self.storage.create_test(&new).await?;

        info!(
            test_id = id,
            brands = new.brands.len(),
            words = new.words.len(),
            mode = %new.response_labels,
            "Test created"
        );

        Ok(id)
    }

    /// Fetch a test with its brands and words.
    pub async fn fetch_test(&self, test_id: i64) -> ApiResult<TestDetail> {
        self.storage
            .get_test(test_id)
            .await?
            .ok_or(ApiError::NotFound {
                entity: "test",
                id: test_id,
            })
    }

    /// List all tests, newest first.
    pub async fn list_tests(&self) -> ApiResult<Vec<TestSummary>> {
        Ok(self.storage.list_tests().await?)
    }

    /// Delete a test and everything under it.
    pub async fn delete_test(&self, test_id: i64) -> ApiResult<()> {
        if !self.storage.delete_test(test_id).await? {
            return Err(ApiError::NotFound {
                entity: "test",
                id: test_id,
            });
        }
        info!(test_id, "Test deleted");
        Ok(())
    }

    /// Start a run against a test.
    ///
    /// Age 0 and an empty gender string are treated as undisclosed.
    pub async fn start_run(&self, test_id: i64, request: StartRunRequest) -> ApiResult<i64> {
        if !self.storage.test_exists(test_id).await? {
            return Err(ApiError::NotFound {
                entity: "test",
                id: test_id,
            });
        }

        let age = request.age.filter(|a| *a > 0);
        let gender = request
            .gender
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty());

        let run_id = self.storage.create_run(test_id, age, gender).await?;

        debug!(test_id, run_id, "Run started");

        Ok(run_id)
    }

    /// Record one trial for a run.
    ///
    /// The reaction time is clamped to ≥ 0 and rounded to the nearest whole
    /// millisecond before it is stored.
    pub async fn record_trial(
        &self,
        run_id: i64,
        request: RecordTrialRequest,
    ) -> ApiResult<i64> {
        if self.storage.get_run(run_id).await?.is_none() {
            return Err(ApiError::NotFound {
                entity: "run",
                id: run_id,
            });
        }

        let trial = NewTrial {
            run_id,
            brand_id: request.brand_id,
            word_id: request.word_id,
            positive: request.is_positive,
            rt_ms: clamp_reaction_time(request.rt_ms),
        };

        let trial_id = self.storage.insert_trial(&trial).await?;

        debug!(
            run_id,
            trial_id,
            brand_id = trial.brand_id,
            word_id = trial.word_id,
            rt_ms = trial.rt_ms,
            "Trial recorded"
        );

        Ok(trial_id)
    }

    /// Mark a run complete by stamping its completion time.
    pub async fn complete_run(&self, run_id: i64) -> ApiResult<()> {
        if !self.storage.complete_run(run_id).await? {
            return Err(ApiError::NotFound {
                entity: "run",
                id: run_id,
            });
        }
        info!(run_id, "Run completed");
        Ok(())
    }

    /// List a test's runs with their trial counts.
    pub async fn list_runs(&self, test_id: i64) -> ApiResult<Vec<RunSummary>> {
        Ok(self.storage.list_runs(test_id).await?)
    }

    /// Fetch a run with its ordered trials.
    pub async fn run_detail(&self, run_id: i64) -> ApiResult<RunDetail> {
        let run = self
            .storage
            .get_run(run_id)
            .await?
            .ok_or(ApiError::NotFound {
                entity: "run",
                id: run_id,
            })?;

        let trials = self.storage.run_trials(run_id).await?;

        Ok(RunDetail { run, trials })
    }

    /// Assemble the panorama view for a test.
    ///
    /// An unknown test id yields empty lists rather than an error; the view
    /// carries no data either way.
    pub async fn panorama(&self, test_id: i64) -> ApiResult<Panorama> {
        Ok(Panorama::load(&self.storage, test_id).await?)
    }

    /// Render the raw CSV export for a test.
    pub async fn export_csv(&self, test_id: i64) -> ApiResult<Vec<u8>> {
        if !self.storage.test_exists(test_id).await? {
            return Err(ApiError::NotFound {
                entity: "test",
                id: test_id,
            });
        }

        let rows = self.storage.export_rows(test_id).await?;
        Ok(csv::render_export(&rows))
    }

    /// Store an uploaded brand image and return its public URL.
    pub async fn store_asset(&self, original_name: &str, bytes: &[u8]) -> ApiResult<String> {
        self.assets.store(original_name, bytes).await
    }
}
