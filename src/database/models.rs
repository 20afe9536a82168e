use crate::catalog::Cursor;
use crate::core::category::Category;
use crate::core::classifier::ClassificationRecord;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    /// Running and paused sessions hold the single-session slot.
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Paused)
    }
}

impl From<String> for SessionStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "running" => SessionStatus::Running,
            "paused" => SessionStatus::Paused,
            "completed" => SessionStatus::Completed,
            "failed" => SessionStatus::Failed,
            "cancelled" => SessionStatus::Cancelled,
            _ => SessionStatus::Idle,
        }
    }
}

impl From<SessionStatus> for String {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Idle => "idle".to_string(),
            SessionStatus::Running => "running".to_string(),
            SessionStatus::Paused => "paused".to_string(),
            SessionStatus::Completed => "completed".to_string(),
            SessionStatus::Failed => "failed".to_string(),
            SessionStatus::Cancelled => "cancelled".to_string(),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from(*self))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    pub processed: u64,
    /// Assets whose record carries at least one extractor fault.
    pub errored: u64,
    /// Cleanup candidates per primary category.
    pub categorized: BTreeMap<Category, u64>,
}

impl SessionCounts {
    pub fn record(&mut self, record: &ClassificationRecord) {
        self.processed += 1;
        if !record.faults.is_empty() {
            self.errored += 1;
        }
        if record.is_candidate() {
            *self.categorized.entry(record.primary_category).or_insert(0) += 1;
        }
    }
}

/// The persisted single-session slot. `revision` increases on every write and
/// guards compare-and-swap updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub cursor: Cursor,
    pub counts: SessionCounts,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub owner: Option<Uuid>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub revision: u64,
}

impl SessionState {
    /// Whether an active session stopped checkpointing long enough ago to be
    /// considered crashed.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        if !self.status.is_active() {
            return false;
        }
        match self.heartbeat_at {
            Some(heartbeat) => now - heartbeat > stale_after,
            None => true,
        }
    }

    /// A run ended before reaching the end of the catalog.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Running
                | SessionStatus::Paused
                | SessionStatus::Failed
                | SessionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    /// Matches the record's primary category.
    pub category: Option<Category>,
    pub min_confidence: Option<f64>,
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = Some(min_confidence);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &ClassificationRecord) -> bool {
        self.category.is_none_or(|c| c == record.primary_category)
            && self.min_confidence.is_none_or(|min| record.confidence >= min)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: u64,
    /// Records at or above the candidate threshold, per primary category.
    pub candidates: BTreeMap<Category, u64>,
    pub high_confidence: u64,
    pub marked: u64,
    pub marked_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_conversion() {
        for status in [
            SessionStatus::Idle,
            SessionStatus::Running,
            SessionStatus::Paused,
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Cancelled,
        ] {
            assert_eq!(SessionStatus::from(String::from(status)), status);
        }
        assert_eq!(SessionStatus::from("bogus".to_string()), SessionStatus::Idle);
    }

    #[test]
    fn test_stale_detection() {
        let now = Utc::now();
        let mut state = SessionState {
            status: SessionStatus::Running,
            heartbeat_at: Some(now - Duration::seconds(600)),
            ..Default::default()
        };
        assert!(state.is_stale(now, Duration::seconds(300)));

        state.heartbeat_at = Some(now - Duration::seconds(10));
        assert!(!state.is_stale(now, Duration::seconds(300)));

        state.status = SessionStatus::Completed;
        state.heartbeat_at = None;
        assert!(!state.is_stale(now, Duration::seconds(300)));
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut counts = SessionCounts::default();
        counts.categorized.insert(Category::WebCache, 4);
        let state = SessionState {
            status: SessionStatus::Paused,
            cursor: Cursor::at("100"),
            counts,
            owner: Some(Uuid::new_v4()),
            revision: 7,
            ..Default::default()
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
