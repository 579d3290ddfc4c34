use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use pideck_agent::{AgentAdapterHandle, AgentAdapterService, AgentSession, MockAgentSession, NullSessionStore, SessionStore};
use pideck_log::{CommitError, LogHandle};
use pideck_protocol::{Mutation, SlotId, WorkspaceId, DEFAULT_SLOT_ID};

use crate::provider::{NullPlansJobsProvider, PlansJobsEvent, PlansJobsProvider};
use crate::sessions::filter_live_sessions;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("path {0:?} is not inside an allowed root")]
    NotAllowed(PathBuf),
    #[error("path {0:?} could not be resolved: {1}")]
    PathNotFound(PathBuf, String),
    #[error("unknown workspace: {0}")]
    UnknownWorkspace(WorkspaceId),
    #[error("unknown slot {1} in workspace {0}")]
    UnknownSlot(WorkspaceId, SlotId),
    #[error(transparent)]
    Commit(#[from] CommitError),
}

/// Builds the agent session (and its session-metadata reader) backing a
/// newly created slot. `WorkspaceRegistry` is generic over this so
/// production wiring can plug in the real agent runtime while tests use the
/// mock.
pub trait AgentSessionFactory: Send + Sync {
    fn create_session(&self, ws_id: &WorkspaceId, slot_id: &SlotId) -> Box<dyn AgentSession>;
    fn create_session_store(&self, ws_id: &WorkspaceId, slot_id: &SlotId) -> Arc<dyn SessionStore>;

    /// The plans/jobs bridge for a newly opened workspace. Defaults to
    /// [`NullPlansJobsProvider`] so factories that don't care about
    /// plans/jobs (the mock, most tests) don't need to override it.
    fn create_plans_jobs_provider(&self, _ws_id: &WorkspaceId, _path: &str) -> Box<dyn PlansJobsProvider> {
        Box::new(NullPlansJobsProvider)
    }
}

/// A factory that wires up [`pideck_agent::MockAgentSession`] with no
/// on-disk session metadata — suitable for tests and for the first
/// end-to-end milestone before a real agent runtime exists.
pub struct MockAgentSessionFactory;

impl AgentSessionFactory for MockAgentSessionFactory {
    fn create_session(&self, _ws_id: &WorkspaceId, _slot_id: &SlotId) -> Box<dyn AgentSession> {
        Box::new(MockAgentSession::new())
    }

    fn create_session_store(&self, _ws_id: &WorkspaceId, _slot_id: &SlotId) -> Arc<dyn SessionStore> {
        Arc::new(NullSessionStore)
    }
}

struct SlotRecord {
    handle: AgentAdapterHandle,
}

struct WorkspaceRecord {
    path: String,
    slots: HashMap<SlotId, SlotRecord>,
    provider_task: JoinHandle<()>,
}

struct Inner {
    by_id: HashMap<WorkspaceId, WorkspaceRecord>,
    by_path: HashMap<String, WorkspaceId>,
    next_id: u64,
}

/// Top-level owner of every open workspace. A process-wide
/// singleton: hold it behind an `Arc` and clone that, not this type.
///
/// Every operation takes the same internal lock for its whole duration,
/// which trivially serializes concurrent slot creation on the same
/// workspace (serializing *all* registry operations is a stronger
/// guarantee than per-workspace, and registry operations are rare enough —
/// workspace/slot open and close, not the delta hot path — that the extra
/// contention is not a concern).
pub struct WorkspaceRegistry {
    inner: Mutex<Inner>,
    log: LogHandle,
    allowed_roots: Vec<PathBuf>,
    factory: Arc<dyn AgentSessionFactory>,
}

impl WorkspaceRegistry {
    pub fn new(log: LogHandle, allowed_roots: Vec<PathBuf>, factory: Arc<dyn AgentSessionFactory>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                by_id: HashMap::new(),
                by_path: HashMap::new(),
                next_id: 0,
            }),
            log,
            allowed_roots,
            factory,
        }
    }

    fn check_allowed(&self, path: &Path) -> Result<(), WorkspaceError> {
        if self.allowed_roots.is_empty() {
            return Ok(());
        }
        if self.allowed_roots.iter().any(|root| path.starts_with(root)) {
            Ok(())
        } else {
            Err(WorkspaceError::NotAllowed(path.to_path_buf()))
        }
    }

    /// Open (or, if already open, return the existing id for) the workspace
    /// rooted at `path`. Always has a `"default"` slot by the time it
    /// returns.
    pub async fn open_workspace(&self, path: &str) -> Result<WorkspaceId, WorkspaceError> {
        let resolved = std::fs::canonicalize(path)
            .map_err(|e| WorkspaceError::PathNotFound(PathBuf::from(path), e.to_string()))?;
        self.check_allowed(&resolved)?;
        let resolved_str = resolved.to_string_lossy().to_string();

        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.by_path.get(&resolved_str) {
            return Ok(existing.clone());
        }

        inner.next_id += 1;
        let ws_id = WorkspaceId(format!("ws-{}", inner.next_id));

        self.log
            .commit(
                Some(ws_id.clone()),
                Mutation::WorkspaceCreate {
                    ws_id: ws_id.clone(),
                    path: resolved_str.clone(),
                },
            )
            .await?;

        let provider_task = self.spawn_plans_jobs_bridge(&ws_id, &resolved_str);

        inner.by_id.insert(
            ws_id.clone(),
            WorkspaceRecord {
                path: resolved_str.clone(),
                slots: HashMap::new(),
                provider_task,
            },
        );
        inner.by_path.insert(resolved_str, ws_id.clone());

        self.create_slot_locked(&mut inner, &ws_id, SlotId::from(DEFAULT_SLOT_ID)).await?;

        info!(%ws_id, path, "workspace opened");
        Ok(ws_id)
    }

    /// Subscribe to the workspace's `PlansJobsProvider` and fold every event
    /// it emits into the matching mutation for the lifetime of the
    /// workspace. Session lists are filtered (`spec.md` §9) against
    /// whichever session files are currently live in one of the workspace's
    /// slots before being committed.
    fn spawn_plans_jobs_bridge(&self, ws_id: &WorkspaceId, path: &str) -> JoinHandle<()> {
        let mut provider = self.factory.create_plans_jobs_provider(ws_id, path);
        let mut events = provider.take_events();
        let log = self.log.clone();
        let ws_id = ws_id.clone();
        tokio::spawn(async move {
            // Keep `provider` alive for as long as this task runs; dropping
            // it early would close the channel `events` reads from.
            let _provider = provider;
            while let Some(event) = events.recv().await {
                let mutation = match event {
                    PlansJobsEvent::Plans(plans) => Mutation::PlansUpdate { ws_id: ws_id.clone(), plans },
                    PlansJobsEvent::Jobs(jobs) => Mutation::JobsUpdate { ws_id: ws_id.clone(), jobs },
                    PlansJobsEvent::ActivePlan(active_plan) => {
                        Mutation::ActivePlanUpdate { ws_id: ws_id.clone(), active_plan }
                    }
                    PlansJobsEvent::ActiveJobs(active_jobs) => {
                        Mutation::ActiveJobsUpdate { ws_id: ws_id.clone(), active_jobs }
                    }
                    PlansJobsEvent::Sessions(sessions) => {
                        let live = live_session_files(&log, &ws_id).await;
                        Mutation::SessionsUpdate {
                            ws_id: ws_id.clone(),
                            sessions: filter_live_sessions(sessions, &live),
                        }
                    }
                };
                if let Err(err) = log.commit(Some(ws_id.clone()), mutation).await {
                    warn!(%ws_id, %err, "plans/jobs update rejected or failed to commit");
                }
            }
        })
    }

    /// Tear down every slot (interrupting any active streaming and
    /// clearing pending UI) and close the workspace.
    pub async fn close_workspace(&self, ws_id: &WorkspaceId) -> Result<(), WorkspaceError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .by_id
            .remove(ws_id)
            .ok_or_else(|| WorkspaceError::UnknownWorkspace(ws_id.clone()))?;
        inner.by_path.remove(&record.path);
        drop(inner);

        record.provider_task.abort();

        for (slot_id, slot) in &record.slots {
            if let Err(err) = slot.handle.abort_and_wait().await {
                warn!(%ws_id, %slot_id, %err, "abort during workspace close did not complete cleanly");
            }
            let _ = self
                .log
                .commit(
                    Some(ws_id.clone()),
                    Mutation::PendingUiCancelled {
                        ws_id: ws_id.clone(),
                        slot_id: slot_id.clone(),
                    },
                )
                .await;
        }

        self.log
            .commit(Some(ws_id.clone()), Mutation::WorkspaceClose { ws_id: ws_id.clone() })
            .await?;

        info!(%ws_id, "workspace closed");
        Ok(())
    }

    /// Split off an additional independent agent session within an already
    /// open workspace.
    pub async fn create_slot(&self, ws_id: &WorkspaceId, slot_id: SlotId) -> Result<(), WorkspaceError> {
        let mut inner = self.inner.lock().await;
        if !inner.by_id.contains_key(ws_id) {
            return Err(WorkspaceError::UnknownWorkspace(ws_id.clone()));
        }
        self.create_slot_locked(&mut inner, ws_id, slot_id).await
    }

    async fn create_slot_locked(
        &self,
        inner: &mut Inner,
        ws_id: &WorkspaceId,
        slot_id: SlotId,
    ) -> Result<(), WorkspaceError> {
        self.log
            .commit(
                Some(ws_id.clone()),
                Mutation::SlotCreate {
                    ws_id: ws_id.clone(),
                    slot_id: slot_id.clone(),
                },
            )
            .await?;

        // `FilteredSessionStore` applies once the concrete
        // `AgentSessionFactory` can report which session file a slot is
        // currently pointed at; the mock factory used here has nothing to
        // filter, so it is wired in by whichever factory backs the real
        // agent runtime.
        let session = self.factory.create_session(ws_id, &slot_id);
        let store = self.factory.create_session_store(ws_id, &slot_id);
        let handle = AgentAdapterService::spawn(ws_id.clone(), slot_id.clone(), session, self.log.clone(), store);

        let record = inner
            .by_id
            .get_mut(ws_id)
            .expect("workspace record present for a slot we just created");
        record.slots.insert(slot_id, SlotRecord { handle });
        Ok(())
    }

    /// Remove an independent slot. The default slot can never be deleted —
    /// `StateModel` rejects the underlying mutation and that
    /// rejection is surfaced here unchanged.
    pub async fn delete_slot(&self, ws_id: &WorkspaceId, slot_id: &SlotId) -> Result<(), WorkspaceError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .by_id
            .get_mut(ws_id)
            .ok_or_else(|| WorkspaceError::UnknownWorkspace(ws_id.clone()))?;

        self.log
            .commit(
                Some(ws_id.clone()),
                Mutation::SlotDelete {
                    ws_id: ws_id.clone(),
                    slot_id: slot_id.clone(),
                },
            )
            .await?;

        record
            .slots
            .remove(slot_id)
            .ok_or_else(|| WorkspaceError::UnknownSlot(ws_id.clone(), slot_id.clone()))?;
        Ok(())
    }

    /// The live `AgentAdapterHandle` for `(wsId, slotId)`, for `SyncHub` to
    /// route a command to.
    pub async fn adapter_handle(
        &self,
        ws_id: &WorkspaceId,
        slot_id: &SlotId,
    ) -> Result<AgentAdapterHandle, WorkspaceError> {
        let inner = self.inner.lock().await;
        inner
            .by_id
            .get(ws_id)
            .ok_or_else(|| WorkspaceError::UnknownWorkspace(ws_id.clone()))?
            .slots
            .get(slot_id)
            .map(|s| s.handle.clone())
            .ok_or_else(|| WorkspaceError::UnknownSlot(ws_id.clone(), slot_id.clone()))
    }
}

/// The set of `sessionFile`s any slot of `ws_id` currently points at, read
/// from the live state tree — the input to `filter_live_sessions`.
async fn live_session_files(log: &LogHandle, ws_id: &WorkspaceId) -> HashSet<String> {
    match log.current().await {
        Ok((_, state)) => state
            .workspaces
            .get(ws_id)
            .map(|ws| ws.slots.values().filter_map(|s| s.session_file.clone()).collect())
            .unwrap_or_default(),
        Err(_) => HashSet::new(),
    }
}
