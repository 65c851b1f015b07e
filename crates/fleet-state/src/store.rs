//! StateStore — append-only, redb-backed record of component transitions.
//!
//! Every `save` inserts one `StateRecord` under the next sequence number and
//! commits before returning, so a record is durable once `save` succeeds.
//! Records are never updated in place. The `latest` table is a derived index
//! (component → newest sequence) that keeps `load` a point lookup.
//!
//! redb admits a single write transaction at a time, which serializes
//! concurrent `save` callers; the handle is `Clone` and can be shared across
//! tasks and threads.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use tracing::debug;

use fleet_core::epoch_millis;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing and dry runs).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(RECORDS).map_err(map_err!(Table))?;
        txn.open_table(LATEST).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.open_table(REPLICAS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Write path ─────────────────────────────────────────────────

    /// Append a record for `component`. Durable when this returns `Ok`.
    pub fn save(&self, component: &str, status: Status, detail: &str) -> StateResult<StateRecord> {
        if status == Status::Unknown {
            return Err(StateError::UnrecordableStatus(status));
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = append(&txn, component, status, detail)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(seq = record.seq, %component, %status, "state record saved");
        Ok(record)
    }

    /// Mark the start of a new cycle. Progress only counts stage records
    /// written after the most recent marker.
    pub fn begin_cycle(&self) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = append(&txn, CYCLE_COMPONENT, Status::Running, "")?;
        {
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            meta.insert(CYCLE_START_KEY, record.seq)
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(seq = record.seq, "cycle started");
        Ok(record.seq)
    }

    /// Remember the replica count last applied to `service`, so a restarted
    /// daemon decides from what is running rather than from config.
    pub fn save_replicas(&self, service: &str, replicas: u32) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REPLICAS).map_err(map_err!(Table))?;
            table.insert(service, replicas).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%service, replicas, "applied replicas saved");
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Last applied replica count of every service that has one.
    pub fn applied_replicas(&self) -> StateResult<BTreeMap<String, u32>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REPLICAS).map_err(map_err!(Table))?;
        let mut replicas = BTreeMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (service, count) = entry.map_err(map_err!(Read))?;
            replicas.insert(service.value().to_string(), count.value());
        }
        Ok(replicas)
    }

    /// Status of the most recent record for `component`, or `Unknown`.
    pub fn load(&self, component: &str) -> StateResult<Status> {
        Ok(self
            .latest(component)?
            .map(|r| r.status)
            .unwrap_or(Status::Unknown))
    }

    /// Most recent record for `component`.
    pub fn latest(&self, component: &str) -> StateResult<Option<StateRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let latest = txn.open_table(LATEST).map_err(map_err!(Table))?;
        let seq = match latest.get(component).map_err(map_err!(Read))? {
            Some(guard) => guard.value(),
            None => return Ok(None),
        };
        let records = txn.open_table(RECORDS).map_err(map_err!(Table))?;
        match records.get(seq).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Sequence number of the current cycle marker, if any cycle has begun.
    pub fn cycle_start(&self) -> StateResult<Option<u64>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let meta = txn.open_table(META).map_err(map_err!(Table))?;
        Ok(meta
            .get(CYCLE_START_KEY)
            .map_err(map_err!(Read))?
            .map(|g| g.value()))
    }

    /// Percentage of pipeline stages completed in the current cycle.
    pub fn progress(&self) -> StateResult<u8> {
        let start = self.cycle_start()?.unwrap_or(0);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let latest = txn.open_table(LATEST).map_err(map_err!(Table))?;
        let records = txn.open_table(RECORDS).map_err(map_err!(Table))?;

        let mut completed = 0usize;
        for stage in PIPELINE_STAGES {
            let Some(seq) = latest.get(stage).map_err(map_err!(Read))?.map(|g| g.value()) else {
                continue;
            };
            if seq < start {
                continue;
            }
            if let Some(guard) = records.get(seq).map_err(map_err!(Read))?
                && decode(guard.value())?.status == Status::Completed
            {
                completed += 1;
            }
        }
        Ok((completed * 100 / PIPELINE_STAGES.len()) as u8)
    }

    /// Every record in append order.
    pub fn history(&self) -> StateResult<Vec<StateRecord>> {
        self.history_since(0)
    }

    /// Records with `seq >= from`, in append order.
    pub fn history_since(&self, from: u64) -> StateResult<Vec<StateRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let records = txn.open_table(RECORDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in records.range(from..).map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// The last `n` records, oldest first.
    pub fn tail(&self, n: usize) -> StateResult<Vec<StateRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let records = txn.open_table(RECORDS).map_err(map_err!(Table))?;
        let mut results = Vec::with_capacity(n);
        for entry in records.iter().map_err(map_err!(Read))?.rev().take(n) {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        results.reverse();
        Ok(results)
    }

    /// Most recent record of every component, sorted by component name.
    pub fn current_statuses(&self) -> StateResult<Vec<StateRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let latest = txn.open_table(LATEST).map_err(map_err!(Table))?;
        let records = txn.open_table(RECORDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in latest.iter().map_err(map_err!(Read))? {
            let (_, seq) = entry.map_err(map_err!(Read))?;
            if let Some(guard) = records.get(seq.value()).map_err(map_err!(Read))? {
                results.push(decode(guard.value())?);
            }
        }
        Ok(results)
    }

    // ── Maintenance ────────────────────────────────────────────────

    /// Retention pass: drop records older than the newest `keep_last`,
    /// except the most recent record of each component, which is always
    /// kept so `load` answers are unchanged. Returns the number removed.
    pub fn compact(&self, keep_last: usize) -> StateResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed;
        {
            let latest = txn.open_table(LATEST).map_err(map_err!(Table))?;
            let mut pinned = HashSet::new();
            for entry in latest.iter().map_err(map_err!(Read))? {
                let (_, seq) = entry.map_err(map_err!(Read))?;
                pinned.insert(seq.value());
            }
            let meta = txn.open_table(META).map_err(map_err!(Table))?;
            if let Some(start) = meta.get(CYCLE_START_KEY).map_err(map_err!(Read))? {
                pinned.insert(start.value());
            }

            let mut records = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            let victims: Vec<u64> = {
                let mut keys = Vec::new();
                for entry in records.iter().map_err(map_err!(Read))?.rev().skip(keep_last) {
                    let (key, _) = entry.map_err(map_err!(Read))?;
                    keys.push(key.value());
                }
                keys.into_iter().filter(|k| !pinned.contains(k)).collect()
            };
            for seq in &victims {
                records.remove(*seq).map_err(map_err!(Write))?;
            }
            removed = victims.len();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(removed, keep_last, "state log compacted");
        Ok(removed)
    }
}

/// Insert a record at the next sequence number and update the index.
fn append(
    txn: &WriteTransaction,
    component: &str,
    status: Status,
    detail: &str,
) -> StateResult<StateRecord> {
    let mut records = txn.open_table(RECORDS).map_err(map_err!(Table))?;
    let seq = match records.last().map_err(map_err!(Read))? {
        Some((key, _)) => key.value() + 1,
        None => 1,
    };
    let record = StateRecord {
        seq,
        component: component.to_string(),
        status,
        timestamp: epoch_millis(),
        detail: detail.to_string(),
    };
    let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
    records
        .insert(seq, value.as_slice())
        .map_err(map_err!(Write))?;

    let mut latest = txn.open_table(LATEST).map_err(map_err!(Table))?;
    latest.insert(component, seq).map_err(map_err!(Write))?;
    Ok(record)
}

fn decode(bytes: &[u8]) -> StateResult<StateRecord> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_stages(store: &StateStore, stages: &[&str]) {
        for stage in stages {
            store.save(stage, Status::Pending, "").unwrap();
            store.save(stage, Status::Completed, "").unwrap();
        }
    }

    #[test]
    fn save_then_load_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        store.save("discovery", Status::Pending, "").unwrap();
        assert_eq!(store.load("discovery").unwrap(), Status::Pending);

        store.save("discovery", Status::Completed, "3 services").unwrap();
        assert_eq!(store.load("discovery").unwrap(), Status::Completed);
    }

    #[test]
    fn load_unknown_component() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.load("nothing-here").unwrap(), Status::Unknown);
        assert!(store.latest("nothing-here").unwrap().is_none());
    }

    #[test]
    fn unknown_status_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.save("discovery", Status::Unknown, "").unwrap_err();
        assert!(matches!(err, StateError::UnrecordableStatus(Status::Unknown)));
        assert!(store.history().unwrap().is_empty());
    }

    #[test]
    fn history_is_append_ordered_and_never_rewritten() {
        let store = StateStore::open_in_memory().unwrap();
        store.save("health", Status::Pending, "").unwrap();
        store.save("scaling/api", Status::Pending, "").unwrap();
        store.save("health", Status::Completed, "9/10").unwrap();

        let history = store.history().unwrap();
        assert_eq!(history.len(), 3);
        let seqs: Vec<u64> = history.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        // The pending record for health is still there.
        assert_eq!(history[0].component, "health");
        assert_eq!(history[0].status, Status::Pending);
        assert_eq!(history[2].detail, "9/10");
    }

    #[test]
    fn history_since_and_tail() {
        let store = StateStore::open_in_memory().unwrap();
        for i in 0..5 {
            store.save(&format!("c{i}"), Status::Completed, "").unwrap();
        }
        let since = store.history_since(4).unwrap();
        assert_eq!(since.len(), 2);
        assert_eq!(since[0].component, "c3");

        let tail = store.tail(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].component, "c3");
        assert_eq!(tail[1].component, "c4");

        assert_eq!(store.tail(50).unwrap().len(), 5);
    }

    #[test]
    fn current_statuses_last_record_wins() {
        let store = StateStore::open_in_memory().unwrap();
        store.save("b", Status::Pending, "").unwrap();
        store.save("a", Status::Failed, "boom").unwrap();
        store.save("b", Status::Completed, "").unwrap();

        let current = store.current_statuses().unwrap();
        assert_eq!(current.len(), 2);
        assert_eq!(current[0].component, "a");
        assert_eq!(current[0].status, Status::Failed);
        assert_eq!(current[1].component, "b");
        assert_eq!(current[1].status, Status::Completed);
    }

    #[test]
    fn progress_counts_completed_stages() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.progress().unwrap(), 0);

        store.begin_cycle().unwrap();
        complete_stages(&store, &["discovery", "health", "scaling"]);
        assert_eq!(store.progress().unwrap(), 50);

        store.save("security", Status::Failed, "policy").unwrap();
        assert_eq!(store.progress().unwrap(), 50);

        complete_stages(&store, &["reporting", "cleanup"]);
        assert_eq!(store.progress().unwrap(), 83);

        complete_stages(&store, &["security"]);
        assert_eq!(store.progress().unwrap(), 100);
    }

    #[test]
    fn progress_ignores_non_stage_components() {
        let store = StateStore::open_in_memory().unwrap();
        store.begin_cycle().unwrap();
        complete_stages(&store, &["scaling/api", "health/database"]);
        assert_eq!(store.progress().unwrap(), 0);
    }

    #[test]
    fn progress_is_monotonic_within_a_new_cycle() {
        let store = StateStore::open_in_memory().unwrap();
        store.begin_cycle().unwrap();
        complete_stages(&store, &PIPELINE_STAGES);
        assert_eq!(store.progress().unwrap(), 100);

        // A fresh cycle starts from zero instead of dipping from 100.
        store.begin_cycle().unwrap();
        let mut last = store.progress().unwrap();
        assert_eq!(last, 0);
        for stage in PIPELINE_STAGES {
            store.save(stage, Status::Pending, "").unwrap();
            let p = store.progress().unwrap();
            assert!(p >= last);
            last = p;
            store.save(stage, Status::Completed, "").unwrap();
            let p = store.progress().unwrap();
            assert!(p >= last);
            last = p;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn compact_keeps_latest_per_component() {
        let store = StateStore::open_in_memory().unwrap();
        for _ in 0..5 {
            store.save("noisy", Status::Pending, "").unwrap();
            store.save("noisy", Status::Completed, "").unwrap();
        }
        store.save("quiet", Status::Failed, "once").unwrap();
        for _ in 0..3 {
            store.save("noisy", Status::Running, "").unwrap();
        }

        let removed = store.compact(2).unwrap();
        // 14 records; keep the newest 2, plus the pinned latest of "quiet".
        assert_eq!(removed, 11);
        assert_eq!(store.history().unwrap().len(), 3);
        assert_eq!(store.load("quiet").unwrap(), Status::Failed);
        assert_eq!(store.load("noisy").unwrap(), Status::Running);

        // Appends continue after the surviving maximum.
        let next = store.save("noisy", Status::Completed, "").unwrap();
        assert_eq!(next.seq, 15);
    }

    #[test]
    fn compact_noop_when_under_limit() {
        let store = StateStore::open_in_memory().unwrap();
        store.save("a", Status::Completed, "").unwrap();
        assert_eq!(store.compact(100).unwrap(), 0);
        assert_eq!(store.history().unwrap().len(), 1);
    }

    #[test]
    fn concurrent_saves_are_serialized() {
        let store = StateStore::open_in_memory().unwrap();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let component = format!("scaling/svc-{i}");
                    store.save(&component, Status::Pending, "").unwrap();
                    store.save(&component, Status::Completed, "").unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let history = store.history().unwrap();
        assert_eq!(history.len(), 16);
        let seqs: HashSet<u64> = history.iter().map(|r| r.seq).collect();
        assert_eq!(seqs.len(), 16);
        for i in 0..8 {
            assert_eq!(
                store.load(&format!("scaling/svc-{i}")).unwrap(),
                Status::Completed
            );
        }
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.begin_cycle().unwrap();
            store.save("discovery", Status::Completed, "2 services").unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.load("discovery").unwrap(), Status::Completed);
        assert_eq!(store.cycle_start().unwrap(), Some(1));
        assert_eq!(store.history().unwrap().len(), 2);
    }

    #[test]
    fn applied_replicas_survive_reopen_and_compaction() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            assert!(store.applied_replicas().unwrap().is_empty());
            store.save_replicas("api", 2).unwrap();
            store.save_replicas("api", 3).unwrap();
            store.save_replicas("worker", 1).unwrap();
            store.save("scaling/api", Status::Completed, "scale-up 2->3").unwrap();
            store.compact(0).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let replicas = store.applied_replicas().unwrap();
        assert_eq!(replicas.get("api"), Some(&3));
        assert_eq!(replicas.get("worker"), Some(&1));
        assert_eq!(replicas.len(), 2);
        // Not part of the record log.
        assert_eq!(store.history().unwrap().len(), 1);
    }
}
