//! Aggregated views over recorded trials.
//!
//! The panorama is the experimenter's cross-tabulation of a test: for every
//! (word, brand) pair with at least one trial, the positive/negative counts,
//! plus the mean reaction time per brand. Nothing here mutates trial data.

pub mod csv;

use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::storage::{Brand, BrandReactionTime, MatrixCell, Storage, Word};

/// The aggregated cross-tabulation view of a test's results across all runs.
///
/// `matrix` holds one cell per (word, brand) pair that has recorded trials;
/// pairs with no trials are absent, not zero. Consumers must treat a missing
/// cell as "no data".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Panorama {
    /// The test's words (all of them, trials or not).
    pub words: Vec<Word>,
    /// The test's brands (all of them, trials or not).
    pub brands: Vec<Brand>,
    /// Cells for pairs with at least one trial.
    pub matrix: Vec<MatrixCell>,
    /// Mean reaction time per brand with at least one trial.
    pub brand_avg_rt: Vec<BrandReactionTime>,
}

impl Panorama {
    /// Assemble the panorama for a test from storage.
    ///
    /// A test id with no rows produces a panorama with empty lists.
    pub async fn load<S: Storage + ?Sized>(storage: &S, test_id: i64) -> StorageResult<Self> {
        let (words, brands) = match storage.get_test(test_id).await? {
            Some(detail) => (detail.words, detail.brands),
            None => (Vec::new(), Vec::new()),
        };

        let matrix = storage.matrix_cells(test_id).await?;
        let brand_avg_rt = storage.brand_reaction_times(test_id).await?;

        Ok(Panorama {
            words,
            brands,
            matrix,
            brand_avg_rt,
        })
    }

    /// Look up the cell for a (word, brand) pair, if it has any trials.
    pub fn cell(&self, word_id: i64, brand_id: i64) -> Option<&MatrixCell> {
        self.matrix
            .iter()
            .find(|c| c.word_id == word_id && c.brand_id == brand_id)
    }
}
