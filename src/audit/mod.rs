//! Archive of terminal cycles
//!
//! Every finished cycle is stored with a hash of its snapshot so the
//! record can later be checked for tampering and replayed.

use crate::cycle::CycleSnapshot;
use crate::error::OrchestrationError;
use crate::models::Security;
use crate::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Records kept before the oldest ones are evicted
pub const DEFAULT_AUDIT_CAPACITY: usize = 1_000;

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub snapshot: Arc<CycleSnapshot>,
    pub snapshot_hash: String,
    pub archived_at: DateTime<Utc>,
}

#[derive(Default)]
struct AuditStore {
    records: HashMap<Uuid, AuditRecord>,
    /// Archive order, oldest first
    order: VecDeque<Uuid>,
}

/// Bounded audit trail, cheap to clone and share
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<RwLock<AuditStore>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }

    /// Keeps at most `capacity` records (at least one), evicting the oldest
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(AuditStore::default())),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Archive a terminal cycle under its id
    pub async fn record(&self, snapshot: CycleSnapshot) -> Result<Uuid> {
        if !snapshot.state.is_terminal() {
            return Err(OrchestrationError::AuditError(format!(
                "cycle {} is still {}",
                snapshot.id, snapshot.state
            )));
        }

        let id = snapshot.id;
        let record = AuditRecord {
            snapshot_hash: compute_snapshot_hash(&snapshot)?,
            snapshot: Arc::new(snapshot),
            archived_at: Utc::now(),
        };

        let mut store = self.store.write().await;
        if store.records.insert(id, record).is_none() {
            store.order.push_back(id);
        }

        while store.order.len() > self.capacity {
            if let Some(evicted) = store.order.pop_front() {
                store.records.remove(&evicted);
                debug!(cycle_id = %evicted, "Evicted oldest audit record");
            }
        }

        Ok(id)
    }

    pub async fn get(&self, cycle_id: Uuid) -> Result<Option<CycleSnapshot>> {
        let store = self.store.read().await;
        Ok(store.records.get(&cycle_id).map(|r| (*r.snapshot).clone()))
    }

    /// Cycle ids for a security, oldest first
    pub async fn list_for_security(&self, security: &Security) -> Result<Vec<Uuid>> {
        let store = self.store.read().await;

        Ok(store
            .order
            .iter()
            .filter(|id| {
                store
                    .records
                    .get(*id)
                    .is_some_and(|record| &record.snapshot.security == security)
            })
            .copied()
            .collect())
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.records.len()
    }

    /// Recompute the hash of a stored snapshot. False if missing or altered.
    pub async fn verify_integrity(&self, cycle_id: Uuid) -> Result<bool> {
        let store = self.store.read().await;

        match store.records.get(&cycle_id) {
            Some(record) => Ok(compute_snapshot_hash(&record.snapshot)? == record.snapshot_hash),
            None => Ok(false),
        }
    }

    #[cfg(test)]
    async fn tamper(&self, cycle_id: Uuid, f: impl FnOnce(&mut CycleSnapshot)) {
        let mut store = self.store.write().await;
        if let Some(record) = store.records.get_mut(&cycle_id) {
            f(Arc::make_mut(&mut record.snapshot));
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA256 of the snapshot's JSON form, hex encoded
pub fn compute_snapshot_hash(snapshot: &CycleSnapshot) -> Result<String> {
    let mut hasher = Sha256::new();

    // Stream JSON directly into hasher (no intermediate String)
    serde_json::to_writer(&mut HashWriter(&mut hasher), snapshot)?;

    Ok(hex::encode(hasher.finalize()))
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::TradingCycle;

    fn terminal_snapshot(symbol: &str) -> CycleSnapshot {
        let mut cycle = TradingCycle::new(Security::new(symbol), 0);
        cycle.start().unwrap();
        cycle.cancel("test").unwrap();
        cycle.snapshot()
    }

    #[tokio::test]
    async fn test_record_and_verify() {
        let log = AuditLog::new();
        let snapshot = terminal_snapshot("NVDA");
        let id = log.record(snapshot.clone()).await.unwrap();

        assert_eq!(log.get(id).await.unwrap(), Some(snapshot));
        assert!(log.verify_integrity(id).await.unwrap());
        assert!(!log.verify_integrity(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_tampering_detected() {
        let log = AuditLog::new();
        let id = log.record(terminal_snapshot("NVDA")).await.unwrap();

        log.tamper(id, |s| s.terminal_reason = Some("rewritten".into())).await;

        assert!(!log.verify_integrity(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_running_cycle() {
        let log = AuditLog::new();
        let cycle = TradingCycle::new(Security::new("SPY"), 1);
        assert!(matches!(
            log.record(cycle.snapshot()).await,
            Err(OrchestrationError::AuditError(_))
        ));
        assert_eq!(log.len().await, 0);
    }

    #[tokio::test]
    async fn test_list_for_security() {
        let log = AuditLog::new();
        let first = log.record(terminal_snapshot("NVDA")).await.unwrap();
        log.record(terminal_snapshot("SPY")).await.unwrap();
        let second = log.record(terminal_snapshot("NVDA")).await.unwrap();

        let ids = log.list_for_security(&Security::new("nvda")).await.unwrap();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn test_hash_is_stable() {
        let snapshot = terminal_snapshot("SPY");
        let hash = compute_snapshot_hash(&snapshot).unwrap();
        assert_eq!(hash, compute_snapshot_hash(&snapshot).unwrap());
        assert_eq!(hash.len(), 64);
    }

    #[tokio::test]
    async fn test_oldest_records_evicted_at_capacity() {
        let log = AuditLog::with_capacity(2);
        let first = log.record(terminal_snapshot("NVDA")).await.unwrap();
        let second = log.record(terminal_snapshot("SPY")).await.unwrap();
        let third = log.record(terminal_snapshot("NVDA")).await.unwrap();

        assert_eq!(log.len().await, 2);
        assert_eq!(log.get(first).await.unwrap(), None);
        assert!(log.verify_integrity(second).await.unwrap());
        assert_eq!(
            log.list_for_security(&Security::new("NVDA")).await.unwrap(),
            vec![third]
        );
        assert_eq!(AuditLog::with_capacity(0).capacity(), 1);
    }
}
