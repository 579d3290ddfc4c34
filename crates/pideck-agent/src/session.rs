use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use pideck_protocol::{Message, SessionInfo};

use crate::command::AgentCommand;
use crate::event::AgentEvent;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent session has not been started")]
    NotStarted,
    #[error("agent session rejected the command: {0}")]
    Rejected(String),
    #[error("timed out waiting for the agent to acknowledge abort")]
    AbortTimedOut,
    #[error("commit error: {0}")]
    Commit(#[from] pideck_log::CommitError),
}

/// The black-box agent runtime. One instance per
/// `(workspaceId, slotId)`.
///
/// Implementors own their event loop; `take_events` is called exactly once, right
/// after construction, to obtain the channel the adapter will read from for
/// the lifetime of the session.
#[async_trait]
pub trait AgentSession: Send {
    fn take_events(&mut self) -> mpsc::Receiver<AgentEvent>;

    /// Forward one command into the session. Returns promptly; the actual
    /// work is observed later via emitted `AgentEvent`s. A synchronous
    /// failure (unknown session, agent not ready) is surfaced directly as
    /// an `Err` here.
    async fn dispatch(&mut self, command: AgentCommand) -> Result<(), AgentError>;
}

/// Reads session metadata from wherever the agent persists it. Kept as a narrow trait so
/// `pideck-agent` never has an opinion on the on-disk session file format —
/// that belongs to the real agent runtime, which is out of scope here.
pub trait SessionStore: Send + Sync {
    fn list_sessions(&self) -> Vec<SessionInfo>;
    fn read_messages(&self, session_file: Option<&str>) -> Vec<Message>;
}

/// A `SessionStore` with nothing to report — the default when a workspace's
/// agent session does not persist anything (e.g. the mock used in tests).
pub struct NullSessionStore;

impl SessionStore for NullSessionStore {
    fn list_sessions(&self) -> Vec<SessionInfo> {
        Vec::new()
    }

    fn read_messages(&self, _session_file: Option<&str>) -> Vec<Message> {
        Vec::new()
    }
}
