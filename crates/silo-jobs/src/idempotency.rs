//! Idempotency ledger for import submissions.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

struct LedgerEntry {
    job_id: Uuid,
    created_at: DateTime<Utc>,
}

/// Maps an opaque client-supplied key to the import job it created.
///
/// Insertion is strict first-wins: under concurrent submissions with the
/// same key exactly one job id ends up in the ledger and `claim` hands
/// the winner back to every caller.
#[derive(Default)]
pub struct IdempotencyLedger {
    entries: RwLock<HashMap<String, LedgerEntry>>,
}

impl IdempotencyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Uuid> {
        self.entries.read().await.get(key).map(|e| e.job_id)
    }

    /// Bind `key` to `job_id` unless the key is already bound; returns
    /// the winning job id either way.
    pub async fn claim(&self, key: &str, job_id: Uuid) -> Uuid {
        let mut entries = self.entries.write().await;
        entries
            .entry(key.to_string())
            .or_insert(LedgerEntry {
                job_id,
                created_at: Utc::now(),
            })
            .job_id
    }

    /// Drop entries older than `max_age`; returns the number removed.
    pub async fn prune(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.created_at >= cutoff);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_claim_wins() {
        let ledger = IdempotencyLedger::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(ledger.claim("k1", first).await, first);
        assert_eq!(ledger.claim("k1", second).await, first);
        assert_eq!(ledger.get("k1").await, Some(first));
        assert_eq!(ledger.get("k2").await, None);
    }

    #[tokio::test]
    async fn prune_drops_only_aged_entries() {
        let ledger = IdempotencyLedger::new();
        ledger.claim("old", Uuid::new_v4()).await;
        ledger.claim("fresh", Uuid::new_v4()).await;

        {
            let mut entries = ledger.entries.write().await;
            entries.get_mut("old").unwrap().created_at = Utc::now() - Duration::hours(48);
        }

        assert_eq!(ledger.prune(Duration::hours(24)).await, 1);
        assert!(ledger.get("old").await.is_none());
        assert!(ledger.get("fresh").await.is_some());
    }
}
