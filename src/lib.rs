//! # IAT Survey
//!
//! An Implicit Association Test (IAT)-style survey service. An experimenter
//! defines a test (brand images + evaluative words), participants run timed
//! trials pairing a visual prime with a word under time pressure, and the
//! experimenter reviews the aggregated panorama (positive/negative counts per
//! brand × word, mean reaction time per brand) or exports the raw trials as
//! CSV.
//!
//! ## Architecture
//!
//! ```text
//! Participant UI (CLI / browser)
//!        │ ApiClient (HTTP or in-process)
//!        ▼
//! Trial sequencer ──► Survey API ──► SQLite (sqlx)
//!   (state machine)      │
//!                        └──► Panorama / CSV aggregation
//! ```
//!
//! The trial sequencer is a pure state machine (practice → countdown →
//! prime/word presentation → keyed response → gap), driven by an async
//! driver that owns the timers and the fire-and-forget persistence policy.
//!
//! ## Example
//!
//! ```ignore
//! use iat_survey::{api::SurveyApi, config::Config, server, storage::SqliteStorage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let api = SurveyApi::new(storage, &config.uploads);
//!     server::serve(&config, api).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Aggregated panorama view and CSV export.
pub mod aggregate;
/// Survey service operations (the test/run API surface).
pub mod api;
/// Client interface the sequencer persists through (HTTP or in-process).
pub mod client;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Participant-side trial state machine and its async driver.
pub mod sequencer;
/// Axum HTTP server exposing the survey API.
pub mod server;
/// SQLite storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
