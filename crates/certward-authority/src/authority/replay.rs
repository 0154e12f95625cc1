//! Single-use token tracking
//!
//! Token ids are recorded for the lifetime of the process and never evicted.
//! Recording is a single insert-if-absent under the write lock, so exactly
//! one of any number of concurrent callers presenting the same id wins.

use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::warn;

/// First use of a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub used_at: DateTime<Utc>,
    pub subject: String,
}

/// The token id was already recorded
#[derive(Debug, Error)]
#[error("token already used")]
pub struct AlreadyUsed {
    pub first_use: UsageRecord,
}

/// Process-wide record of used token ids
#[derive(Debug, Default)]
pub struct ReplayGuard {
    used: RwLock<HashMap<String, UsageRecord>>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as used by `subject`. Fails if it was recorded before.
    pub fn record(&self, id: &str, subject: &str) -> Result<(), AlreadyUsed> {
        let mut used = self.used.write().unwrap_or_else(PoisonError::into_inner);
        match used.entry(id.to_string()) {
            Entry::Occupied(entry) => {
                warn!(
                    token_id = %id,
                    subject = %subject,
                    first_subject = %entry.get().subject,
                    first_used_at = %entry.get().used_at,
                    "Token replay rejected"
                );
                Err(AlreadyUsed {
                    first_use: entry.get().clone(),
                })
            }
            Entry::Vacant(entry) => {
                entry.insert(UsageRecord {
                    used_at: Utc::now(),
                    subject: subject.to_string(),
                });
                Ok(())
            }
        }
    }

    /// Usage record for `id`, if recorded
    pub fn get(&self, id: &str) -> Option<UsageRecord> {
        let used = self.used.read().unwrap_or_else(PoisonError::into_inner);
        used.get(id).cloned()
    }

    /// Number of recorded ids
    pub fn len(&self) -> usize {
        self.used.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_once() {
        let guard = ReplayGuard::new();
        guard.record("abc", "alice").unwrap();

        let err = guard.record("abc", "mallory").unwrap_err();
        assert_eq!(err.first_use.subject, "alice");
        assert_eq!(guard.get("abc").unwrap().subject, "alice");
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_distinct_ids() {
        let guard = ReplayGuard::new();
        guard.record("a", "alice").unwrap();
        guard.record("b", "alice").unwrap();
        assert_eq!(guard.len(), 2);
        assert!(guard.get("c").is_none());
    }

    #[test]
    fn test_concurrent_single_winner() {
        let guard = Arc::new(ReplayGuard::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let guard = guard.clone();
                std::thread::spawn(move || guard.record("shared", &format!("caller-{}", i)).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(guard.len(), 1);
    }
}
