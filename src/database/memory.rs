use super::{RecordQuery, ResultsStore, SessionState, StoreError, StoreStats};
use crate::core::classifier::{ClassificationRecord, CANDIDATE_THRESHOLD, HIGH_CONFIDENCE};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// In-process store. Used by tests and for dry runs that should leave no file
/// behind.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, ClassificationRecord>>,
    session: Mutex<Option<SessionState>>,
    failing_writes: AtomicUsize,
    record_writes: AtomicUsize,
    armed_swap_failures: AtomicUsize,
    failing_swaps: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` record writes fail.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Once the next record write succeeds, the following `count` session
    /// swaps fail. Simulates a crash between writing a page and
    /// checkpointing it.
    pub fn fail_swaps_after_next_write(&self, count: usize) {
        self.armed_swap_failures.store(count, Ordering::SeqCst);
    }

    /// Record writes attempted so far, failed ones included.
    pub fn record_writes(&self) -> usize {
        self.record_writes.load(Ordering::SeqCst)
    }

    fn records(&self) -> Result<MutexGuard<'_, HashMap<String, ClassificationRecord>>, StoreError> {
        self.records.lock().map_err(|_| StoreError::Poisoned)
    }

    fn session(&self) -> Result<MutexGuard<'_, Option<SessionState>>, StoreError> {
        self.session.lock().map_err(|_| StoreError::Poisoned)
    }

    fn check_injected_failure(&self) -> Result<(), StoreError> {
        self.record_writes.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(StoreError::Unavailable("injected write failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl ResultsStore for MemoryStore {
    fn upsert(&self, record: &ClassificationRecord) -> Result<(), StoreError> {
        self.check_injected_failure()?;
        let mut records = self.records()?;
        let marked = records
            .get(&record.asset_id)
            .is_some_and(|existing| existing.marked_for_deletion);
        let mut record = record.clone();
        record.marked_for_deletion = marked;
        records.insert(record.asset_id.clone(), record);

        let armed = self.armed_swap_failures.swap(0, Ordering::SeqCst);
        if armed > 0 {
            self.failing_swaps.store(armed, Ordering::SeqCst);
        }
        Ok(())
    }

    fn get(&self, asset_id: &str) -> Result<Option<ClassificationRecord>, StoreError> {
        Ok(self.records()?.get(asset_id).cloned())
    }

    fn query(&self, query: &RecordQuery) -> Result<Vec<ClassificationRecord>, StoreError> {
        let records = self.records()?;
        let mut matching: Vec<ClassificationRecord> = records
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.asset_id.cmp(&b.asset_id))
        });
        if let Some(limit) = query.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    fn set_marked(&self, asset_ids: &[String], marked: bool) -> Result<usize, StoreError> {
        let mut records = self.records()?;
        let mut changed = 0;
        for id in asset_ids {
            if let Some(record) = records.get_mut(id) {
                record.marked_for_deletion = marked;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn remove(&self, asset_ids: &[String]) -> Result<usize, StoreError> {
        let mut records = self.records()?;
        Ok(asset_ids.iter().filter(|id| records.remove(*id).is_some()).count())
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let records = self.records()?;
        let mut stats = StoreStats {
            total: records.len() as u64,
            ..Default::default()
        };
        for record in records.values() {
            if record.confidence >= CANDIDATE_THRESHOLD {
                *stats.candidates.entry(record.primary_category).or_insert(0) += 1;
            }
            if record.confidence > HIGH_CONFIDENCE {
                stats.high_confidence += 1;
            }
            if record.marked_for_deletion {
                stats.marked += 1;
                stats.marked_bytes += record.snapshot.file_size;
            }
        }
        Ok(stats)
    }

    fn get_session_state(&self) -> Result<Option<SessionState>, StoreError> {
        Ok(self.session()?.clone())
    }

    fn put_session_state(&self, state: &SessionState) -> Result<(), StoreError> {
        *self.session()? = Some(state.clone());
        Ok(())
    }

    fn compare_and_swap_session(
        &self,
        expected_revision: Option<u64>,
        state: &SessionState,
    ) -> Result<bool, StoreError> {
        let failed = self
            .failing_swaps
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable("injected checkpoint failure".to_string()));
        }

        let mut session = self.session()?;
        let current = session.as_ref().map(|s| s.revision);
        if current != expected_revision {
            return Ok(false);
        }
        *session = Some(state.clone());
        Ok(true)
    }
}
