pub mod memory;
pub mod models;
pub mod sqlite;

use crate::core::classifier::ClassificationRecord;
use thiserror::Error;

pub use memory::MemoryStore;
pub use models::{RecordQuery, SessionCounts, SessionState, SessionStatus, StoreStats};
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session state changed concurrently: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Persistence for classification records and the session slot.
///
/// Implementations are synchronous; async callers go through
/// `spawn_blocking`.
pub trait ResultsStore: Send + Sync {
    /// Inserts or overwrites the record for its asset. An existing
    /// `marked_for_deletion` flag is kept.
    fn upsert(&self, record: &ClassificationRecord) -> Result<(), StoreError>;

    fn upsert_batch(&self, records: &[ClassificationRecord]) -> Result<(), StoreError> {
        for record in records {
            self.upsert(record)?;
        }
        Ok(())
    }

    fn get(&self, asset_id: &str) -> Result<Option<ClassificationRecord>, StoreError>;

    /// Matching records, highest confidence first, then by asset id.
    fn query(&self, query: &RecordQuery) -> Result<Vec<ClassificationRecord>, StoreError>;

    /// Returns how many records changed.
    fn set_marked(&self, asset_ids: &[String], marked: bool) -> Result<usize, StoreError>;

    fn remove(&self, asset_ids: &[String]) -> Result<usize, StoreError>;

    fn stats(&self) -> Result<StoreStats, StoreError>;

    fn get_session_state(&self) -> Result<Option<SessionState>, StoreError>;

    fn put_session_state(&self, state: &SessionState) -> Result<(), StoreError>;

    /// Writes `state` only if the stored revision equals `expected_revision`
    /// (`None` meaning nothing stored yet). Returns whether the write happened.
    fn compare_and_swap_session(
        &self,
        expected_revision: Option<u64>,
        state: &SessionState,
    ) -> Result<bool, StoreError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::core::asset::Asset;
    use crate::core::category::Category;
    use crate::core::classifier::{
        AssetSnapshot, ClassificationRecord, PixelCheckOutcome,
    };
    use crate::core::rules::CategoryScore;
    use chrono::Utc;

    /// A record whose primary category scores `confidence`.
    pub(crate) fn record(id: &str, category: Category, confidence: f64) -> ClassificationRecord {
        let scores = Category::ALL
            .iter()
            .map(|c| {
                let mut score = CategoryScore::zero(*c);
                if *c == category {
                    score.confidence = confidence;
                }
                score
            })
            .collect();
        let asset = Asset::new(id, format!("{}.jpg", id)).with_size(1_000);
        ClassificationRecord {
            asset_id: id.to_string(),
            analyzed_at: Utc::now(),
            scores,
            primary_category: category,
            confidence,
            marked_for_deletion: false,
            snapshot: AssetSnapshot::from(&asset),
            pixel_check: PixelCheckOutcome::Skipped,
            faults: vec![],
        }
    }
}
