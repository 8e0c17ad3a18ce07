use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::{
    Brand, BrandReactionTime, ExportRow, MatrixCell, NewTest, NewTrial, Run, RunSummary,
    Storage, TestDetail, TestSummary, TrialDetail, Word,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            // Cascading deletes depend on this pragma.
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory storage instance, used by tests.
    ///
    /// The pool is pinned to a single connection: an in-memory SQLite
    /// database lives and dies with its connection.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Storage for SqliteStorage {
    async fn create_test(&self, new: &NewTest) -> StorageResult<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO tests (name, created_at, response_labels)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&new.name)
        .bind(Utc::now().to_rfc3339())
        .bind(new.response_labels.as_str())
        .execute(&mut *tx)
        .await?;

        let test_id = result.last_insert_rowid();

        for brand in &new.brands {
            sqlx::query("INSERT INTO brands (test_id, name, image_url) VALUES (?, ?, ?)")
                .bind(test_id)
                .bind(&brand.name)
                .bind(&brand.image_url)
                .execute(&mut *tx)
                .await?;
        }

        for word in &new.words {
            sqlx::query("INSERT INTO words (test_id, text) VALUES (?, ?)")
                .bind(test_id)
                .bind(word)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(test_id)
    }

    async fn get_test(&self, id: i64) -> StorageResult<Option<TestDetail>> {
        let row: Option<TestRow> = sqlx::query_as(
            r#"
            SELECT id, name, created_at,
                   COALESCE(response_labels, 'pn') AS response_labels
            FROM tests
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let brands: Vec<BrandRow> =
            sqlx::query_as("SELECT id, name, image_url FROM brands WHERE test_id = ?")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;

        let words: Vec<WordRow> =
            sqlx::query_as("SELECT id, text FROM words WHERE test_id = ?")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;

        Ok(Some(TestDetail {
            id: row.id,
            name: row.name,
            created_at: parse_timestamp(&row.created_at),
            response_labels: row.response_labels.parse().unwrap_or_default(),
            brands: brands.into_iter().map(Brand::from).collect(),
            words: words.into_iter().map(Word::from).collect(),
        }))
    }

    async fn list_tests(&self) -> StorageResult<Vec<TestSummary>> {
        let rows: Vec<TestSummaryRow> = sqlx::query_as(
            "SELECT id, name, created_at FROM tests ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TestSummary::from).collect())
    }

    async fn delete_test(&self, id: i64) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM tests WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn test_exists(&self, id: i64) -> StorageResult<bool> {
        let row: Option<i64> = sqlx::query_scalar("SELECT id FROM tests WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    async fn create_run(
        &self,
        test_id: i64,
        age: Option<i64>,
        gender: Option<&str>,
    ) -> StorageResult<i64> {
        let result = sqlx::query(
            "INSERT INTO runs (test_id, age, gender, started_at) VALUES (?, ?, ?, ?)",
        )
        .bind(test_id)
        .bind(age)
        .bind(gender)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn get_run(&self, id: i64) -> StorageResult<Option<Run>> {
        let row: Option<RunRow> = sqlx::query_as(
            r#"
            SELECT id, test_id, age, gender, started_at, completed_at
            FROM runs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Run::from))
    }

    async fn complete_run(&self, id: i64) -> StorageResult<bool> {
        let result = sqlx::query("UPDATE runs SET completed_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_runs(&self, test_id: i64) -> StorageResult<Vec<RunSummary>> {
        let rows: Vec<RunSummaryRow> = sqlx::query_as(
            r#"
            SELECT r.id, r.age, r.gender, r.started_at, r.completed_at,
                   COUNT(t.id) AS trial_count
            FROM runs r
            LEFT JOIN trials t ON t.run_id = r.id
            WHERE r.test_id = ?
            GROUP BY r.id
            ORDER BY r.started_at DESC
            "#,
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RunSummary::from).collect())
    }

    async fn insert_trial(&self, trial: &NewTrial) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trials (run_id, brand_id, word_id, is_positive, rt_ms)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(trial.run_id)
        .bind(trial.brand_id)
        .bind(trial.word_id)
        .bind(if trial.positive { 1_i64 } else { 0_i64 })
        .bind(trial.rt_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn run_trials(&self, run_id: i64) -> StorageResult<Vec<TrialDetail>> {
        let rows: Vec<TrialDetailRow> = sqlx::query_as(
            r#"
            SELECT t.id, t.is_positive, t.rt_ms,
                   b.id AS brand_id, b.name AS brand_name, b.image_url AS brand_image_url,
                   w.id AS word_id, w.text AS word_text
            FROM trials t
            JOIN brands b ON b.id = t.brand_id
            JOIN words w  ON w.id = t.word_id
            WHERE t.run_id = ?
            ORDER BY t.id
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TrialDetail::from).collect())
    }

    async fn matrix_cells(&self, test_id: i64) -> StorageResult<Vec<MatrixCell>> {
        let rows: Vec<MatrixCellRow> = sqlx::query_as(
            r#"
            SELECT w.id AS word_id, b.id AS brand_id,
                   SUM(t.is_positive) AS positive,
                   COUNT(t.id) - SUM(t.is_positive) AS negative,
                   COUNT(t.id) AS total
            FROM trials t
            JOIN runs r ON r.id = t.run_id
            JOIN words w ON w.id = t.word_id
            JOIN brands b ON b.id = t.brand_id
            WHERE r.test_id = ?
            GROUP BY w.id, b.id
            ORDER BY w.id, b.id
            "#,
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MatrixCell::from).collect())
    }

    async fn brand_reaction_times(
        &self,
        test_id: i64,
    ) -> StorageResult<Vec<BrandReactionTime>> {
        let rows: Vec<BrandReactionTimeRow> = sqlx::query_as(
            r#"
            SELECT b.id AS brand_id, AVG(t.rt_ms) AS avg_rt_ms
            FROM trials t
            JOIN runs r ON r.id = t.run_id
            JOIN brands b ON b.id = t.brand_id
            WHERE r.test_id = ?
            GROUP BY b.id
            ORDER BY b.id
            "#,
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| BrandReactionTime {
                brand_id: r.brand_id,
                avg_rt_ms: r.avg_rt_ms,
            })
            .collect())
    }

    async fn export_rows(&self, test_id: i64) -> StorageResult<Vec<ExportRow>> {
        let rows: Vec<ExportRowRow> = sqlx::query_as(
            r#"
            SELECT r.gender, r.age,
                   b.name AS brand_name,
                   w.text AS word_text,
                   t.is_positive, t.rt_ms
            FROM trials t
            JOIN runs   r ON r.id = t.run_id
            JOIN brands b ON b.id = t.brand_id
            JOIN words  w ON w.id = t.word_id
            WHERE r.test_id = ?
            ORDER BY r.id, t.id
            "#,
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ExportRow::from).collect())
    }
}

/// Parse an RFC 3339 timestamp stored as text, falling back to now.
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// Internal row types for SQLx mapping

#[derive(sqlx::FromRow)]
struct TestRow {
    id: i64,
    name: String,
    created_at: String,
    response_labels: String,
}

#[derive(sqlx::FromRow)]
struct TestSummaryRow {
    id: i64,
    name: String,
    created_at: String,
}

impl From<TestSummaryRow> for TestSummary {
    fn from(row: TestSummaryRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct BrandRow {
    id: i64,
    name: String,
    image_url: Option<String>,
}

impl From<BrandRow> for Brand {
    fn from(row: BrandRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            image_url: row.image_url,
        }
    }
}

#[derive(sqlx::FromRow)]
struct WordRow {
    id: i64,
    text: String,
}

impl From<WordRow> for Word {
    fn from(row: WordRow) -> Self {
        Self {
            id: row.id,
            text: row.text,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: i64,
    test_id: i64,
    age: Option<i64>,
    gender: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl From<RunRow> for Run {
    fn from(row: RunRow) -> Self {
        Self {
            id: row.id,
            test_id: row.test_id,
            age: row.age,
            gender: row.gender,
            started_at: parse_timestamp(&row.started_at),
            completed_at: row.completed_at.as_deref().map(parse_timestamp),
        }
    }
}

#[derive(sqlx::FromRow)]
struct RunSummaryRow {
    id: i64,
    age: Option<i64>,
    gender: Option<String>,
    started_at: String,
    completed_at: Option<String>,
    trial_count: i64,
}

impl From<RunSummaryRow> for RunSummary {
    fn from(row: RunSummaryRow) -> Self {
        Self {
            id: row.id,
            age: row.age,
            gender: row.gender,
            started_at: parse_timestamp(&row.started_at),
            completed_at: row.completed_at.as_deref().map(parse_timestamp),
            trial_count: row.trial_count,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TrialDetailRow {
    id: i64,
    is_positive: i64,
    rt_ms: i64,
    brand_id: i64,
    brand_name: String,
    brand_image_url: Option<String>,
    word_id: i64,
    word_text: String,
}

impl From<TrialDetailRow> for TrialDetail {
    fn from(row: TrialDetailRow) -> Self {
        Self {
            id: row.id,
            positive: row.is_positive != 0,
            rt_ms: row.rt_ms,
            brand_id: row.brand_id,
            brand_name: row.brand_name,
            brand_image_url: row.brand_image_url,
            word_id: row.word_id,
            word_text: row.word_text,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MatrixCellRow {
    word_id: i64,
    brand_id: i64,
    positive: i64,
    negative: i64,
    total: i64,
}

impl From<MatrixCellRow> for MatrixCell {
    fn from(row: MatrixCellRow) -> Self {
        Self {
            word_id: row.word_id,
            brand_id: row.brand_id,
            positive: row.positive,
            negative: row.negative,
            total: row.total,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BrandReactionTimeRow {
    brand_id: i64,
    avg_rt_ms: f64,
}

#[derive(sqlx::FromRow)]
struct ExportRowRow {
    gender: Option<String>,
    age: Option<i64>,
    brand_name: String,
    word_text: String,
    is_positive: i64,
    rt_ms: i64,
}

impl From<ExportRowRow> for ExportRow {
    fn from(row: ExportRowRow) -> Self {
        Self {
            gender: row.gender,
            age: row.age,
            brand_name: row.brand_name,
            word_text: row.word_text,
            positive: row.is_positive != 0,
            rt_ms: row.rt_ms,
        }
    }
}
