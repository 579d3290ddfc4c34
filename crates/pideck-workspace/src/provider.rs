use tokio::sync::mpsc;

use pideck_protocol::SessionInfo;

/// One update pushed by a workspace's `PlansJobsProvider`. Each variant maps
/// onto exactly one of the whole-replacement mutations `spec.md` §3 assigns
/// to plans/jobs/session state.
#[derive(Debug, Clone)]
pub enum PlansJobsEvent {
    Plans(serde_json::Value),
    Jobs(serde_json::Value),
    ActivePlan(serde_json::Value),
    ActiveJobs(serde_json::Value),
    /// The raw, unfiltered session list as read off disk — `WorkspaceRegistry`
    /// applies the stale-empty-session filter (`spec.md` §9) before folding
    /// this into a `SessionsUpdate`.
    Sessions(Vec<SessionInfo>),
}

/// The black-box bridge to the job/plan markdown file format and its
/// filesystem watchers. The format itself and the watching are out of scope
/// here (`spec.md` §1) — this crate only owns the narrow seam
/// `WorkspaceRegistry` subscribes through: one provider per open workspace,
/// emitting events that get folded into `Mutation`s.
pub trait PlansJobsProvider: Send {
    /// Called exactly once, right after construction, to obtain the channel
    /// `WorkspaceRegistry`'s bridging task reads from for the lifetime of
    /// the workspace.
    fn take_events(&mut self) -> mpsc::Receiver<PlansJobsEvent>;
}

/// A provider with nothing to report — the default when a workspace has no
/// on-disk plans/jobs backing (e.g. in tests, or before a real filesystem
/// watcher is wired in).
pub struct NullPlansJobsProvider;

impl PlansJobsProvider for NullPlansJobsProvider {
    fn take_events(&mut self) -> mpsc::Receiver<PlansJobsEvent> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }
}
