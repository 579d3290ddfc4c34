use pideck_protocol::{Message, PendingUi};

/// The input contract an [`crate::AgentSession`] emits: a flat
/// stream of events with no workspace/slot context of its own — the
/// `AgentAdapter` that owns the session supplies that context when it
/// translates an event into a [`pideck_protocol::Mutation`].
#[derive(Debug, Clone)]
pub enum AgentEvent {
    AgentStart,
    AgentEnd,
    /// A new message began. `message` is either a streaming placeholder
    /// (empty content, to be filled in by subsequent deltas) or already
    /// complete if the session emitted it whole.
    MessageStart(Message),
    MessageUpdate {
        message_id: String,
        delta: MessageDelta,
    },
    MessageEnd(Message),
    ToolStart {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    ToolUpdate {
        id: String,
        partial: String,
    },
    ToolEnd {
        id: String,
        result: String,
        is_error: bool,
    },
    CompactionStart,
    CompactionEnd {
        summary: String,
    },
    /// Something changed on disk outside of a normal turn (e.g. a session
    /// file was touched by another process) — the adapter re-reads the
    /// session list and republishes it.
    StateChanged,
    /// The agent wants to show an interactive dialog and will not proceed
    /// until `respondToPendingUI` arrives.
    PendingUiRequested(PendingUi),
}

#[derive(Debug, Clone)]
pub enum MessageDelta {
    Text(String),
    Thinking(String),
}
