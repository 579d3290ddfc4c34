//! PersistentStore: the durable backing for the delta log,
//! periodic snapshots, and per-client acknowledgement cursors.
//!
//! Backed by `rusqlite` with the `bundled` feature (no system SQLite
//! required). A single file holds snapshots, deltas, and client ack
//! cursors together.
//!
//! All writes run inside an explicit transaction and SQLite is configured
//! for `synchronous = FULL` so every commit is fsync'd before the call
//! returns. This crate is synchronous/blocking by design: it is meant to
//! be driven from `pideck-log`'s single commit worker, which is allowed
//! to block on disk IO on its hot path.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;

use pideck_protocol::{Delta, GlobalState, Mutation, Snapshot, WorkspaceId};

/// Count-based component of the snapshot pruning safety margin `K`. The time-based
/// component is approximated by the snapshot cadence itself (default 60s,
/// see `pideck-log`), so a delta older than the *previous* snapshot is never
/// pruned until at least one more snapshot interval has passed.
pub const SNAPSHOT_PRUNE_MARGIN: u64 = 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("version {0} already present in the delta log")]
    VersionConflict(u64),
    #[error("gap in the delta log: missing version {0} between the snapshot and the latest delta")]
    DeltaGap(u64),
}

pub struct PersistentStore {
    conn: Connection,
    snapshot_conn: SnapshotHandle,
}

/// A second connection onto the same backing store, dedicated to
/// `write_snapshot`. Keeping it separate from the connection `append`/
/// `deltas_since`/etc. use means the two only ever contend over SQLite's own
/// writer lock for the duration of one transaction each, never over a
/// Rust-level mutex held across the whole (slow) snapshot write — which is
/// what lets a snapshot write run on `spawn_blocking` without also pinning
/// the hot append path behind it.
#[derive(Clone)]
pub struct SnapshotHandle(Arc<Mutex<Connection>>);

impl SnapshotHandle {
    /// Write a snapshot and prune deltas strictly older than
    /// `min(version, min_ack_version) - SNAPSHOT_PRUNE_MARGIN`. Blocking —
    /// callers on an async runtime should drive this from `spawn_blocking`.
    pub fn write_snapshot(
        &self,
        version: u64,
        state: &GlobalState,
        min_ack_version: u64,
    ) -> Result<(), StoreError> {
        let mut conn = self.0.lock().expect("snapshot connection mutex poisoned");
        let tx = conn.transaction()?;
        let payload = serde_json::to_vec(state)?;
        tx.execute(
            "INSERT OR REPLACE INTO snapshots (version, payload, created_at) VALUES (?1, ?2, ?3)",
            params![version as i64, payload, Utc::now().timestamp()],
        )?;
        let bound = version.min(min_ack_version);
        let prune_before = bound.saturating_sub(SNAPSHOT_PRUNE_MARGIN);
        tx.execute(
            "DELETE FROM deltas WHERE version < ?1",
            params![prune_before as i64],
        )?;
        tx.commit()?;
        Ok(())
    }
}

/// Counter used to give each `open_in_memory` store its own shared-cache
/// in-memory database name, so its two connections see the same data
/// without colliding with any other store opened in the same process.
static MEMORY_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS snapshots (
        version    INTEGER PRIMARY KEY,
        payload    BLOB NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS deltas (
        version      INTEGER PRIMARY KEY,
        workspace_id TEXT,
        payload      BLOB NOT NULL,
        created_at   INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS clients (
        client_id        TEXT PRIMARY KEY,
        last_ack_version INTEGER NOT NULL,
        last_seen        INTEGER NOT NULL
    );
";

impl PersistentStore {
    /// Open (creating if absent) the on-disk store at `path`, plus a second
    /// connection to the same file dedicated to snapshot writes.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(SCHEMA)?;

        let snapshot_conn = Connection::open(path)?;
        snapshot_conn.pragma_update(None, "journal_mode", "WAL")?;
        snapshot_conn.pragma_update(None, "synchronous", "FULL")?;

        Ok(Self {
            conn,
            snapshot_conn: SnapshotHandle(Arc::new(Mutex::new(snapshot_conn))),
        })
    }

    /// An ephemeral in-memory store, for tests only. Both connections point
    /// at the same process-unique shared-cache memory database, so they see
    /// the same tables.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let name = MEMORY_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
        let uri = format!("file:pideck-store-{name}?mode=memory&cache=shared");
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI;

        let conn = Connection::open_with_flags(&uri, flags)?;
        conn.execute_batch(SCHEMA)?;
        let snapshot_conn = Connection::open_with_flags(&uri, flags)?;

        Ok(Self {
            conn,
            snapshot_conn: SnapshotHandle(Arc::new(Mutex::new(snapshot_conn))),
        })
    }

    /// A cheap-to-clone handle to the snapshot-dedicated connection, for a
    /// caller (`pideck-log`) that wants to run `write_snapshot` off its own
    /// hot path.
    pub fn snapshot_handle(&self) -> SnapshotHandle {
        self.snapshot_conn.clone()
    }

    /// Append a single delta. Fails if `version` is already present — the
    /// caller (the single commit worker) is expected to call this strictly
    /// in version order.
    pub fn append(
        &mut self,
        version: u64,
        workspace_id: Option<&WorkspaceId>,
        mutation: &Mutation,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT version FROM deltas WHERE version = ?1",
                params![version as i64],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::VersionConflict(version));
        }
        let payload = serde_json::to_vec(mutation)?;
        tx.execute(
            "INSERT INTO deltas (version, workspace_id, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                version as i64,
                workspace_id.map(|w| w.0.clone()),
                payload,
                Utc::now().timestamp()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Write a snapshot and prune deltas strictly older than
    /// `min(version, min_ack_version) - SNAPSHOT_PRUNE_MARGIN`. Convenience
    /// delegate to the snapshot connection for callers that don't need
    /// `spawn_blocking` (e.g. tests) — `pideck-log` goes through
    /// `snapshot_handle()` directly instead.
    pub fn write_snapshot(
        &self,
        version: u64,
        state: &GlobalState,
        min_ack_version: u64,
    ) -> Result<(), StoreError> {
        self.snapshot_conn.write_snapshot(version, state, min_ack_version)
    }

    /// Atomically load the latest snapshot plus every delta after it.
    /// Detects a gap between the snapshot and the retained deltas.
    pub fn load_latest(&self) -> Result<(Option<Snapshot>, Vec<Delta>), StoreError> {
        let snapshot = self.latest_snapshot()?;
        let after = snapshot.as_ref().map(|s| s.version).unwrap_or(0);
        let deltas = self.deltas_after(after)?;
        let mut expected = after + 1;
        for d in &deltas {
            if d.version != expected {
                return Err(StoreError::DeltaGap(expected));
            }
            expected += 1;
        }
        Ok((snapshot, deltas))
    }

    fn latest_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        let row: Option<(i64, Vec<u8>)> = self
            .conn
            .query_row(
                "SELECT version, payload FROM snapshots ORDER BY version DESC LIMIT 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((v, payload)) => {
                let state: GlobalState = serde_json::from_slice(&payload)?;
                Ok(Some(Snapshot {
                    version: v as u64,
                    state,
                }))
            }
        }
    }

    fn deltas_after(&self, version: u64) -> Result<Vec<Delta>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT version, payload FROM deltas WHERE version > ?1 ORDER BY version ASC")?;
        let rows = stmt.query_map(params![version as i64], row_to_raw)?;
        collect_deltas(rows)
    }

    /// The next window of deltas after `version`, capped at `limit` — used
    /// to catch a reconnecting client up.
    pub fn deltas_since(&self, version: u64, limit: usize) -> Result<Vec<Delta>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT version, payload FROM deltas WHERE version > ?1 ORDER BY version ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![version as i64, limit as i64], row_to_raw)?;
        collect_deltas(rows)
    }

    /// The oldest version still present in the delta log, if any. Used by
    /// `SyncHub` to decide snapshot-vs-catch-up.
    pub fn min_delta_version(&self) -> Result<Option<u64>, StoreError> {
        let v: Option<i64> =
            self.conn
                .query_row("SELECT MIN(version) FROM deltas", [], |r| r.get(0))?;
        Ok(v.map(|x| x as u64))
    }

    /// Upsert a client's ack cursor, monotonically.
    pub fn client_ack(&mut self, client_id: &str, version: u64) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO clients (client_id, last_ack_version, last_seen) VALUES (?1, ?2, ?3)
             ON CONFLICT(client_id) DO UPDATE SET
                 last_ack_version = MAX(last_ack_version, excluded.last_ack_version),
                 last_seen = excluded.last_seen",
            params![client_id, version as i64, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// The minimum `last_ack_version` across every known client, or
    /// `u64::MAX` if no client has ever acked (nothing to protect from
    /// pruning on that side of the bound).
    pub fn min_ack_version(&self) -> Result<u64, StoreError> {
        let v: Option<i64> =
            self.conn
                .query_row("SELECT MIN(last_ack_version) FROM clients", [], |r| r.get(0))?;
        Ok(v.map(|x| x as u64).unwrap_or(u64::MAX))
    }
}

fn row_to_raw(r: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, Vec<u8>)> {
    Ok((r.get(0)?, r.get(1)?))
}

fn collect_deltas(
    rows: impl Iterator<Item = rusqlite::Result<(i64, Vec<u8>)>>,
) -> Result<Vec<Delta>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        let (v, payload) = row?;
        let mutation: Mutation = serde_json::from_slice(&payload)?;
        out.push(Delta {
            version: v as u64,
            mutation,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pideck_protocol::GlobalState;

    fn sample_mutation(ws: &str) -> Mutation {
        Mutation::WorkspaceCreate {
            ws_id: WorkspaceId(ws.to_string()),
            path: "/tmp/ws".into(),
        }
    }

    #[test]
    fn append_then_load_latest_round_trips() {
        let mut store = PersistentStore::open_in_memory().unwrap();
        store.append(1, Some(&WorkspaceId("ws-1".into())), &sample_mutation("ws-1")).unwrap();
        store.append(2, Some(&WorkspaceId("ws-1".into())), &sample_mutation("ws-2")).unwrap();

        let (snapshot, deltas) = store.load_latest().unwrap();
        assert!(snapshot.is_none());
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].version, 1);
        assert_eq!(deltas[1].version, 2);
    }

    #[test]
    fn append_rejects_duplicate_version() {
        let mut store = PersistentStore::open_in_memory().unwrap();
        store.append(1, None, &sample_mutation("ws-1")).unwrap();
        let err = store.append(1, None, &sample_mutation("ws-1")).unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict(1)));
    }

    #[test]
    fn write_snapshot_then_load_latest_only_returns_deltas_after_it() {
        let mut store = PersistentStore::open_in_memory().unwrap();
        for v in 1..=5 {
            store.append(v, None, &sample_mutation("ws-1")).unwrap();
        }
        store
            .write_snapshot(3, &GlobalState::default(), u64::MAX)
            .unwrap();

        let (snapshot, deltas) = store.load_latest().unwrap();
        assert_eq!(snapshot.unwrap().version, 3);
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].version, 4);
        assert_eq!(deltas[1].version, 5);
    }

    #[test]
    fn client_ack_is_monotonic() {
        let mut store = PersistentStore::open_in_memory().unwrap();
        store.client_ack("tab-1", 10).unwrap();
        store.client_ack("tab-1", 5).unwrap();
        assert_eq!(store.min_ack_version().unwrap(), 10);
        store.client_ack("tab-1", 20).unwrap();
        assert_eq!(store.min_ack_version().unwrap(), 20);
    }

    #[test]
    fn deltas_since_limits_and_is_contiguous() {
        let mut store = PersistentStore::open_in_memory().unwrap();
        for v in 1..=10 {
            store.append(v, None, &sample_mutation("ws-1")).unwrap();
        }
        let window = store.deltas_since(2, 3).unwrap();
        assert_eq!(window.iter().map(|d| d.version).collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[test]
    fn min_delta_version_reflects_pruning() {
        let mut store = PersistentStore::open_in_memory().unwrap();
        for v in 1..=2000 {
            store.append(v, None, &sample_mutation("ws-1")).unwrap();
        }
        assert_eq!(store.min_delta_version().unwrap(), Some(1));
        store
            .write_snapshot(1999, &GlobalState::default(), u64::MAX)
            .unwrap();
        // Pruned to strictly less than 1999 - 1024 = 975.
        let min = store.min_delta_version().unwrap().unwrap();
        assert!(min >= 975, "expected pruning to respect the safety margin, got {min}");
    }
}
