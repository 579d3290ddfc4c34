//! VersionedLog: the single-writer commit pipeline that couples
//! `StateModel` with `PersistentStore` atomically and fans out committed
//! deltas to every subscriber.
//!
//! A cheap, clone-able [`LogHandle`] wraps an `mpsc` command channel plus a
//! `broadcast` event channel, and a single [`LogService`] task owns the
//! pipeline and processes commands strictly sequentially.
//!
//! Reads that could in principle run on the commit worker when cheap —
//! `current()`, `deltas_since()`, `min_delta_version()` — are modeled the
//! same way as writes: a command routed through the same channel, answered
//! by the same task, rather than through a separate read path over an
//! immutable copy-on-write snapshot. `rusqlite` connections are not `Sync`,
//! so a second concurrent reader would need its own connection pool.
//! Routing everything through one task keeps the single-writer invariant
//! trivially true at the cost of catch-up reads queuing behind in-flight
//! commits, which is acceptable at Pi-Deck's scale.
//!
//! Periodic snapshotting is the one exception: it writes the whole state
//! tree to disk, which is slow enough that serializing it onto this same
//! task would stall every commit and catch-up read behind it. `maybe_snapshot`
//! instead takes its copy of the tree inline (cheap) and hands the actual
//! disk write to `tokio::task::spawn_blocking`, running it over
//! `PersistentStore`'s second, snapshot-dedicated connection so it doesn't
//! contend with this task's own connection for anything but SQLite's own
//! writer lock.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use pideck_protocol::{Delta, GlobalState, Mutation, RejectReason, WorkspaceId};
use pideck_state::StateModel;
use pideck_store::{PersistentStore, StoreError};

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("mutation rejected: {0}")]
    Rejected(#[from] RejectReason),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("the versioned log has shut down")]
    Closed,
}

/// Snapshot-every-N-deltas / every-T-seconds thresholds plus the
/// commit latency warning ceiling.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub snapshot_every_deltas: u64,
    pub snapshot_every: Duration,
    pub commit_latency_warn: Duration,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            snapshot_every_deltas: 1000,
            snapshot_every: Duration::from_secs(60),
            commit_latency_warn: Duration::from_millis(100),
        }
    }
}

enum Command {
    Commit {
        workspace_id: Option<WorkspaceId>,
        mutation: Mutation,
        reply: oneshot::Sender<Result<(u64, Mutation), CommitError>>,
    },
    Current {
        reply: oneshot::Sender<(u64, GlobalState)>,
    },
    DeltasSince {
        version: u64,
        limit: usize,
        reply: oneshot::Sender<Result<Vec<Delta>, CommitError>>,
    },
    MinDeltaVersion {
        reply: oneshot::Sender<Result<Option<u64>, CommitError>>,
    },
    ClientAck {
        client_id: String,
        version: u64,
        reply: oneshot::Sender<Result<(), CommitError>>,
    },
}

/// Cheap-to-clone handle to a running [`LogService`]. Every client task and
/// adapter task holds one.
#[derive(Clone)]
pub struct LogHandle {
    cmd_tx: mpsc::Sender<Command>,
    delta_tx: broadcast::Sender<Delta>,
}

impl LogHandle {
    /// Commit one mutation. Resolves once the durable append has succeeded
    /// and the delta has been published — never before.
    pub async fn commit(
        &self,
        workspace_id: Option<WorkspaceId>,
        mutation: Mutation,
    ) -> Result<(u64, Mutation), CommitError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Commit {
                workspace_id,
                mutation,
                reply,
            })
            .await
            .map_err(|_| CommitError::Closed)?;
        rx.await.map_err(|_| CommitError::Closed)?
    }

    /// Subscribe to every future committed delta, in order, starting now.
    pub fn subscribe(&self) -> broadcast::Receiver<Delta> {
        self.delta_tx.subscribe()
    }

    /// The current version and a full copy of the live state tree — the
    /// basis for a fresh client's `Snapshot`.
    pub async fn current(&self) -> Result<(u64, GlobalState), CommitError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Current { reply })
            .await
            .map_err(|_| CommitError::Closed)?;
        rx.await.map_err(|_| CommitError::Closed)
    }

    /// The next window of deltas after `version` — the basis for a
    /// reconnecting client's `DeltaBatch` catch-up.
    pub async fn deltas_since(&self, version: u64, limit: usize) -> Result<Vec<Delta>, CommitError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::DeltasSince {
                version,
                limit,
                reply,
            })
            .await
            .map_err(|_| CommitError::Closed)?;
        rx.await.map_err(|_| CommitError::Closed)?
    }

    /// The oldest version still retained in the delta log, used to decide
    /// whether a client can catch up with deltas or needs a fresh snapshot.
    pub async fn min_delta_version(&self) -> Result<Option<u64>, CommitError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::MinDeltaVersion { reply })
            .await
            .map_err(|_| CommitError::Closed)?;
        rx.await.map_err(|_| CommitError::Closed)?
    }

    /// Advance a client's durable ack cursor.
    pub async fn client_ack(&self, client_id: String, version: u64) -> Result<(), CommitError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ClientAck {
                client_id,
                version,
                reply,
            })
            .await
            .map_err(|_| CommitError::Closed)?;
        rx.await.map_err(|_| CommitError::Closed)?
    }
}

/// The commit worker itself. Call [`LogService::run`] in a dedicated task;
/// every other component only ever talks to the returned [`LogHandle`].
pub struct LogService {
    state: StateModel,
    store: PersistentStore,
    cmd_rx: mpsc::Receiver<Command>,
    delta_tx: broadcast::Sender<Delta>,
    config: LogConfig,
    deltas_since_snapshot: u64,
    last_snapshot_at: Instant,
}

impl LogService {
    /// Build a service from an already-open store and a loaded state model —
    /// mainly useful for tests that want full control over bootstrap.
    pub fn new(state: StateModel, store: PersistentStore, config: LogConfig) -> (Self, LogHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(512);
        let (delta_tx, _) = broadcast::channel(4096);

        let handle = LogHandle {
            cmd_tx,
            delta_tx: delta_tx.clone(),
        };
        let service = Self {
            state,
            store,
            cmd_rx,
            delta_tx,
            config,
            deltas_since_snapshot: 0,
            last_snapshot_at: Instant::now(),
        };
        (service, handle)
    }

    /// Open the store at `path`, replay it into a fresh `StateModel` to
    /// resume from the highest durable version, and build a ready service.
    pub fn open(
        path: &std::path::Path,
        config: LogConfig,
    ) -> Result<(Self, LogHandle), CommitError> {
        let store = PersistentStore::open(path)?;
        let (snapshot, deltas) = store.load_latest()?;
        let base = snapshot.map(|s| s.state).unwrap_or_default();
        let deltas = deltas.into_iter().map(|d| (d.version, d.mutation)).collect();

        let mut state = StateModel::new();
        state
            .load(base, deltas)
            .map_err(|e| match e {
                pideck_state::ApplyError::VersionGap { expected, got } => {
                    CommitError::Store(StoreError::DeltaGap(expected.min(got)))
                }
                pideck_state::ApplyError::Rejected(r) => CommitError::Rejected(r),
            })?;

        info!(version = state.version(), "replayed state from persistent store");
        Ok(Self::new(state, store, config))
    }

    /// Run the commit worker loop. Returns once every [`LogHandle`] clone —
    /// and the `cmd_tx` it wraps — has been dropped.
    pub async fn run(mut self) {
        info!("versioned log commit worker started");
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                Command::Commit {
                    workspace_id,
                    mutation,
                    reply,
                } => self.handle_commit(workspace_id, mutation, reply),
                Command::Current { reply } => {
                    let _ = reply.send((self.state.version(), self.state.snapshot()));
                }
                Command::DeltasSince {
                    version,
                    limit,
                    reply,
                } => {
                    let _ = reply.send(self.store.deltas_since(version, limit).map_err(Into::into));
                }
                Command::MinDeltaVersion { reply } => {
                    let _ = reply.send(self.store.min_delta_version().map_err(Into::into));
                }
                Command::ClientAck {
                    client_id,
                    version,
                    reply,
                } => {
                    let _ = reply.send(self.store.client_ack(&client_id, version).map_err(Into::into));
                }
            }
        }
        info!("versioned log commit worker stopped");
    }

    fn handle_commit(
        &mut self,
        workspace_id: Option<WorkspaceId>,
        mutation: Mutation,
        reply: oneshot::Sender<Result<(u64, Mutation), CommitError>>,
    ) {
        let backup = self.state.snapshot();
        let canonical = match self.state.apply(mutation) {
            Ok(canonical) => canonical,
            Err(reject) => {
                let _ = reply.send(Err(CommitError::Rejected(reject)));
                return;
            }
        };
        let version = self.state.version();

        let started = Instant::now();
        let append_result = self.store.append(version, workspace_id.as_ref(), &canonical);
        let elapsed = started.elapsed();
        if elapsed > self.config.commit_latency_warn {
            warn!(?elapsed, version, "commit latency exceeded warning threshold");
        }

        match append_result {
            Ok(()) => {
                let delta = Delta {
                    version,
                    mutation: canonical.clone(),
                };
                // Fan-out never fails in a way the commit worker cares about:
                // a lagging/absent subscriber just misses this delta and
                // reconnects via catch-up.
                let _ = self.delta_tx.send(delta);
                let _ = reply.send(Ok((version, canonical)));

                self.deltas_since_snapshot += 1;
                self.maybe_snapshot();
            }
            Err(err) => {
                self.state.replace_state(backup);
                let _ = reply.send(Err(CommitError::Store(err)));
            }
        }
    }

    /// Fires the disk write for a due snapshot onto the blocking thread pool
    /// and returns immediately — the commit worker never awaits it.
    ///
    /// The due-ness counters are reset before the write is even known to
    /// succeed, not after: resetting them is what stops every commit between
    /// now and the write actually finishing from queuing up another
    /// `spawn_blocking` of its own. A write that fails is logged and simply
    /// waits for the next count/time trigger rather than retried immediately.
    fn maybe_snapshot(&mut self) {
        let due_by_count = self.deltas_since_snapshot >= self.config.snapshot_every_deltas;
        let due_by_time = self.last_snapshot_at.elapsed() >= self.config.snapshot_every;
        if !due_by_count && !due_by_time {
            return;
        }
        let version = self.state.version();
        let state = self.state.snapshot();
        let min_ack = self.store.min_ack_version().unwrap_or(u64::MAX);
        let handle = self.store.snapshot_handle();

        self.deltas_since_snapshot = 0;
        self.last_snapshot_at = Instant::now();

        tokio::task::spawn_blocking(move || match handle.write_snapshot(version, &state, min_ack) {
            Ok(()) => debug!(version, "wrote snapshot"),
            Err(err) => warn!(%err, version, "failed to write snapshot, will retry on the next trigger"),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pideck_protocol::WorkspaceId;
    use tokio::time::timeout;

    fn create_ws(id: &str) -> Mutation {
        Mutation::WorkspaceCreate {
            ws_id: WorkspaceId(id.to_string()),
            path: format!("/tmp/{id}"),
        }
    }

    #[tokio::test]
    async fn commit_persists_and_broadcasts() {
        let (service, handle) = LogService::new(
            StateModel::new(),
            PersistentStore::open_in_memory().unwrap(),
            LogConfig::default(),
        );
        tokio::spawn(service.run());

        let mut deltas = handle.subscribe();
        let (version, canonical) = handle
            .commit(Some(WorkspaceId("ws-1".into())), create_ws("ws-1"))
            .await
            .unwrap();
        assert_eq!(version, 1);
        assert!(matches!(canonical, Mutation::WorkspaceCreate { .. }));

        let delta = timeout(Duration::from_secs(1), deltas.recv()).await.unwrap().unwrap();
        assert_eq!(delta.version, 1);
    }

    #[tokio::test]
    async fn duplicate_workspace_is_rejected_and_version_does_not_advance() {
        let (service, handle) = LogService::new(
            StateModel::new(),
            PersistentStore::open_in_memory().unwrap(),
            LogConfig::default(),
        );
        tokio::spawn(service.run());

        handle
            .commit(Some(WorkspaceId("ws-1".into())), create_ws("ws-1"))
            .await
            .unwrap();
        let err = handle
            .commit(Some(WorkspaceId("ws-1".into())), create_ws("ws-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommitError::Rejected(RejectReason::WorkspaceAlreadyExists(_))));

        let (version, _) = handle.current().await.unwrap();
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn snapshot_fires_after_the_configured_delta_count() {
        let config = LogConfig {
            snapshot_every_deltas: 3,
            snapshot_every: Duration::from_secs(3600),
            commit_latency_warn: Duration::from_secs(3600),
        };
        let (service, handle) = LogService::new(
            StateModel::new(),
            PersistentStore::open_in_memory().unwrap(),
            config,
        );
        tokio::spawn(service.run());

        for i in 0..3 {
            handle
                .commit(Some(WorkspaceId(format!("ws-{i}"))), create_ws(&format!("ws-{i}")))
                .await
                .unwrap();
        }

        // A fourth commit should observe an already-pruned-capable log; we
        // can't inspect the store directly through the handle, but we can at
        // least confirm min_delta_version still resolves sanely post-snapshot.
        let min = handle.min_delta_version().await.unwrap();
        assert_eq!(min, Some(1));
    }

    #[tokio::test]
    async fn client_ack_and_deltas_since_round_trip() {
        let (service, handle) = LogService::new(
            StateModel::new(),
            PersistentStore::open_in_memory().unwrap(),
            LogConfig::default(),
        );
        tokio::spawn(service.run());

        for i in 0..3 {
            handle
                .commit(Some(WorkspaceId(format!("ws-{i}"))), create_ws(&format!("ws-{i}")))
                .await
                .unwrap();
        }
        handle.client_ack("tab-1".to_string(), 2).await.unwrap();

        let catch_up = handle.deltas_since(1, 10).await.unwrap();
        assert_eq!(catch_up.iter().map(|d| d.version).collect::<Vec<_>>(), vec![2, 3]);
    }
}
