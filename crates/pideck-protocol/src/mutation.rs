//! The `Mutation` sum type: the unit of in-process state change,
//! of the durable log, and of the wire broadcast all at once.

use serde::{Deserialize, Serialize};

use crate::ids::{SlotId, WorkspaceId};
use crate::model::{
    Message, PaneUi, PendingUi, SessionInfo, TabRef, ThinkingLevel, ToolExecution, UiStatePatch,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChannel {
    Text,
    Thinking,
}

/// Field-by-field patch for `SlotUpdate`. A field left as `None` is
/// untouched: "any field absent in the patch is left untouched".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_file: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_streaming: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_compacting: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_ref: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<ThinkingLevel>,
    /// Swaps a streaming placeholder message for its finalized form (same
    /// `id`), or appends it if no placeholder with that id exists yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize_message: Option<Message>,
}

impl SlotPatch {
    pub fn is_streaming(value: bool) -> Self {
        Self {
            is_streaming: Some(value),
            ..Default::default()
        }
    }

    pub fn is_compacting(value: bool) -> Self {
        Self {
            is_compacting: Some(value),
            ..Default::default()
        }
    }
}

/// The tagged-union shape of every mutation kind this build understands.
/// Kept as a private shadow of [`Mutation`] purely so `#[derive(Serialize,
/// Deserialize)]` can do the tag-matching grunt work; [`Mutation`] itself
/// carries one additional variant, [`Mutation::Unknown`], that this shadow
/// has no room for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum KnownMutation {
    WorkspaceCreate {
        ws_id: WorkspaceId,
        path: String,
    },
    WorkspaceClose {
        ws_id: WorkspaceId,
    },
    SlotCreate {
        ws_id: WorkspaceId,
        slot_id: SlotId,
    },
    SlotDelete {
        ws_id: WorkspaceId,
        slot_id: SlotId,
    },
    SlotUpdate {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        patch: SlotPatch,
    },
    MessagesAppend {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        messages: Vec<Message>,
    },
    MessagesReplace {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        messages: Vec<Message>,
    },
    StreamingDelta {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        channel: StreamChannel,
        delta: String,
    },
    StreamingClear {
        ws_id: WorkspaceId,
        slot_id: SlotId,
    },
    ToolStart {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        execution: ToolExecution,
    },
    ToolUpdate {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        tool_call_id: String,
        partial_result: String,
    },
    ToolEnd {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        tool_call_id: String,
        result: String,
        is_error: bool,
    },
    PendingUiSet {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        pending_ui: Option<PendingUi>,
    },
    /// Distinct from `PendingUiSet { pending_ui: None }`: that variant is
    /// the slot's own resolution path (an answer arrived), this one is the
    /// workspace closing out from under a still-open pending UI. Same
    /// resulting state (`slot.pending_ui` cleared), different wire event, so
    /// a client can tell "answered" from "cancelled out from under you".
    PendingUiCancelled {
        ws_id: WorkspaceId,
        slot_id: SlotId,
    },
    SessionsUpdate {
        ws_id: WorkspaceId,
        sessions: Vec<SessionInfo>,
    },
    PlansUpdate {
        ws_id: WorkspaceId,
        plans: serde_json::Value,
    },
    JobsUpdate {
        ws_id: WorkspaceId,
        jobs: serde_json::Value,
    },
    ActivePlanUpdate {
        ws_id: WorkspaceId,
        active_plan: serde_json::Value,
    },
    ActiveJobsUpdate {
        ws_id: WorkspaceId,
        active_jobs: serde_json::Value,
    },
    PaneUiUpdate {
        ws_id: WorkspaceId,
        right_pane_open: bool,
        tabs: Vec<TabRef>,
        active_tab: Option<TabRef>,
    },
    QueuedMessagesUpdate {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        steering: Vec<String>,
        follow_up: Vec<String>,
    },
    UiStateUpdate {
        patch: UiStatePatch,
    },
}

/// The unit of in-process state change, of the durable log, and of the wire
/// broadcast all at once.
///
/// A `kind` this build doesn't recognize still decodes successfully, as
/// [`Mutation::Unknown`] carrying the original tag and the raw JSON body —
/// it is forward compatibility for the wire, not a hard deserialization
/// error, that matters here: a newer peer's mutation kind must not jam
/// decoding for every other client on the log. `pideck-state` is the layer
/// that actually rejects it (with a logged warning); this type just refuses
/// to crash on it.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    WorkspaceCreate {
        ws_id: WorkspaceId,
        path: String,
    },
    WorkspaceClose {
        ws_id: WorkspaceId,
    },
    SlotCreate {
        ws_id: WorkspaceId,
        slot_id: SlotId,
    },
    SlotDelete {
        ws_id: WorkspaceId,
        slot_id: SlotId,
    },
    SlotUpdate {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        patch: SlotPatch,
    },
    MessagesAppend {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        messages: Vec<Message>,
    },
    MessagesReplace {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        messages: Vec<Message>,
    },
    StreamingDelta {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        channel: StreamChannel,
        delta: String,
    },
    StreamingClear {
        ws_id: WorkspaceId,
        slot_id: SlotId,
    },
    ToolStart {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        execution: ToolExecution,
    },
    ToolUpdate {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        tool_call_id: String,
        partial_result: String,
    },
    ToolEnd {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        tool_call_id: String,
        result: String,
        is_error: bool,
    },
    PendingUiSet {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        pending_ui: Option<PendingUi>,
    },
    PendingUiCancelled {
        ws_id: WorkspaceId,
        slot_id: SlotId,
    },
    SessionsUpdate {
        ws_id: WorkspaceId,
        sessions: Vec<SessionInfo>,
    },
    PlansUpdate {
        ws_id: WorkspaceId,
        plans: serde_json::Value,
    },
    JobsUpdate {
        ws_id: WorkspaceId,
        jobs: serde_json::Value,
    },
    ActivePlanUpdate {
        ws_id: WorkspaceId,
        active_plan: serde_json::Value,
    },
    ActiveJobsUpdate {
        ws_id: WorkspaceId,
        active_jobs: serde_json::Value,
    },
    PaneUiUpdate {
        ws_id: WorkspaceId,
        right_pane_open: bool,
        tabs: Vec<TabRef>,
        active_tab: Option<TabRef>,
    },
    QueuedMessagesUpdate {
        ws_id: WorkspaceId,
        slot_id: SlotId,
        steering: Vec<String>,
        follow_up: Vec<String>,
    },
    UiStateUpdate {
        patch: UiStatePatch,
    },
    /// A mutation `kind` this build doesn't know how to interpret, carried
    /// through untouched. `raw` is the full decoded JSON object, `kind` is
    /// its `"kind"` tag — `StateModel::fold` rejects these rather than
    /// guessing at a meaning.
    Unknown {
        kind: String,
        raw: serde_json::Value,
    },
}

impl From<KnownMutation> for Mutation {
    fn from(known: KnownMutation) -> Self {
        match known {
            KnownMutation::WorkspaceCreate { ws_id, path } => Mutation::WorkspaceCreate { ws_id, path },
            KnownMutation::WorkspaceClose { ws_id } => Mutation::WorkspaceClose { ws_id },
            KnownMutation::SlotCreate { ws_id, slot_id } => Mutation::SlotCreate { ws_id, slot_id },
            KnownMutation::SlotDelete { ws_id, slot_id } => Mutation::SlotDelete { ws_id, slot_id },
            KnownMutation::SlotUpdate { ws_id, slot_id, patch } => {
                Mutation::SlotUpdate { ws_id, slot_id, patch }
            }
            KnownMutation::MessagesAppend { ws_id, slot_id, messages } => {
                Mutation::MessagesAppend { ws_id, slot_id, messages }
            }
            KnownMutation::MessagesReplace { ws_id, slot_id, messages } => {
                Mutation::MessagesReplace { ws_id, slot_id, messages }
            }
            KnownMutation::StreamingDelta { ws_id, slot_id, channel, delta } => {
                Mutation::StreamingDelta { ws_id, slot_id, channel, delta }
            }
            KnownMutation::StreamingClear { ws_id, slot_id } => Mutation::StreamingClear { ws_id, slot_id },
            KnownMutation::ToolStart { ws_id, slot_id, execution } => {
                Mutation::ToolStart { ws_id, slot_id, execution }
            }
            KnownMutation::ToolUpdate { ws_id, slot_id, tool_call_id, partial_result } => {
                Mutation::ToolUpdate { ws_id, slot_id, tool_call_id, partial_result }
            }
            KnownMutation::ToolEnd { ws_id, slot_id, tool_call_id, result, is_error } => {
                Mutation::ToolEnd { ws_id, slot_id, tool_call_id, result, is_error }
            }
            KnownMutation::PendingUiSet { ws_id, slot_id, pending_ui } => {
                Mutation::PendingUiSet { ws_id, slot_id, pending_ui }
            }
            KnownMutation::PendingUiCancelled { ws_id, slot_id } => {
                Mutation::PendingUiCancelled { ws_id, slot_id }
            }
            KnownMutation::SessionsUpdate { ws_id, sessions } => Mutation::SessionsUpdate { ws_id, sessions },
            KnownMutation::PlansUpdate { ws_id, plans } => Mutation::PlansUpdate { ws_id, plans },
            KnownMutation::JobsUpdate { ws_id, jobs } => Mutation::JobsUpdate { ws_id, jobs },
            KnownMutation::ActivePlanUpdate { ws_id, active_plan } => {
                Mutation::ActivePlanUpdate { ws_id, active_plan }
            }
            KnownMutation::ActiveJobsUpdate { ws_id, active_jobs } => {
                Mutation::ActiveJobsUpdate { ws_id, active_jobs }
            }
            KnownMutation::PaneUiUpdate { ws_id, right_pane_open, tabs, active_tab } => {
                Mutation::PaneUiUpdate { ws_id, right_pane_open, tabs, active_tab }
            }
            KnownMutation::QueuedMessagesUpdate { ws_id, slot_id, steering, follow_up } => {
                Mutation::QueuedMessagesUpdate { ws_id, slot_id, steering, follow_up }
            }
            KnownMutation::UiStateUpdate { patch } => Mutation::UiStateUpdate { patch },
        }
    }
}

impl TryFrom<&Mutation> for KnownMutation {
    type Error = ();

    fn try_from(mutation: &Mutation) -> Result<Self, Self::Error> {
        Ok(match mutation.clone() {
            Mutation::WorkspaceCreate { ws_id, path } => KnownMutation::WorkspaceCreate { ws_id, path },
            Mutation::WorkspaceClose { ws_id } => KnownMutation::WorkspaceClose { ws_id },
            Mutation::SlotCreate { ws_id, slot_id } => KnownMutation::SlotCreate { ws_id, slot_id },
            Mutation::SlotDelete { ws_id, slot_id } => KnownMutation::SlotDelete { ws_id, slot_id },
            Mutation::SlotUpdate { ws_id, slot_id, patch } => {
                KnownMutation::SlotUpdate { ws_id, slot_id, patch }
            }
            Mutation::MessagesAppend { ws_id, slot_id, messages } => {
                KnownMutation::MessagesAppend { ws_id, slot_id, messages }
            }
            Mutation::MessagesReplace { ws_id, slot_id, messages } => {
                KnownMutation::MessagesReplace { ws_id, slot_id, messages }
            }
            Mutation::StreamingDelta { ws_id, slot_id, channel, delta } => {
                KnownMutation::StreamingDelta { ws_id, slot_id, channel, delta }
            }
            Mutation::StreamingClear { ws_id, slot_id } => KnownMutation::StreamingClear { ws_id, slot_id },
            Mutation::ToolStart { ws_id, slot_id, execution } => {
                KnownMutation::ToolStart { ws_id, slot_id, execution }
            }
            Mutation::ToolUpdate { ws_id, slot_id, tool_call_id, partial_result } => {
                KnownMutation::ToolUpdate { ws_id, slot_id, tool_call_id, partial_result }
            }
            Mutation::ToolEnd { ws_id, slot_id, tool_call_id, result, is_error } => {
                KnownMutation::ToolEnd { ws_id, slot_id, tool_call_id, result, is_error }
            }
            Mutation::PendingUiSet { ws_id, slot_id, pending_ui } => {
                KnownMutation::PendingUiSet { ws_id, slot_id, pending_ui }
            }
            Mutation::PendingUiCancelled { ws_id, slot_id } => {
                KnownMutation::PendingUiCancelled { ws_id, slot_id }
            }
            Mutation::SessionsUpdate { ws_id, sessions } => KnownMutation::SessionsUpdate { ws_id, sessions },
            Mutation::PlansUpdate { ws_id, plans } => KnownMutation::PlansUpdate { ws_id, plans },
            Mutation::JobsUpdate { ws_id, jobs } => KnownMutation::JobsUpdate { ws_id, jobs },
            Mutation::ActivePlanUpdate { ws_id, active_plan } => {
                KnownMutation::ActivePlanUpdate { ws_id, active_plan }
            }
            Mutation::ActiveJobsUpdate { ws_id, active_jobs } => {
                KnownMutation::ActiveJobsUpdate { ws_id, active_jobs }
            }
            Mutation::PaneUiUpdate { ws_id, right_pane_open, tabs, active_tab } => {
                KnownMutation::PaneUiUpdate { ws_id, right_pane_open, tabs, active_tab }
            }
            Mutation::QueuedMessagesUpdate { ws_id, slot_id, steering, follow_up } => {
                KnownMutation::QueuedMessagesUpdate { ws_id, slot_id, steering, follow_up }
            }
            Mutation::UiStateUpdate { patch } => KnownMutation::UiStateUpdate { patch },
            Mutation::Unknown { .. } => return Err(()),
        })
    }
}

impl Serialize for Mutation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Mutation::Unknown { raw, .. } => raw.serialize(serializer),
            known => KnownMutation::try_from(known)
                .expect("every non-Unknown variant converts to KnownMutation")
                .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Mutation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let raw = serde_json::Value::deserialize(deserializer)?;
        if let Ok(known) = serde_json::from_value::<KnownMutation>(raw.clone()) {
            return Ok(known.into());
        }
        match raw.get("kind").and_then(|k| k.as_str()) {
            Some(kind) => Ok(Mutation::Unknown { kind: kind.to_string(), raw }),
            None => Err(D::Error::missing_field("kind")),
        }
    }
}

impl Mutation {
    /// The workspace this mutation targets, if any — global mutations
    /// (`UiStateUpdate`) have none and are delivered to every subscriber
    /// regardless of `subscribedWorkspaces`.
    pub fn workspace_id(&self) -> Option<&WorkspaceId> {
        match self {
            Mutation::WorkspaceCreate { ws_id, .. }
            | Mutation::WorkspaceClose { ws_id }
            | Mutation::SlotCreate { ws_id, .. }
            | Mutation::SlotDelete { ws_id, .. }
            | Mutation::SlotUpdate { ws_id, .. }
            | Mutation::MessagesAppend { ws_id, .. }
            | Mutation::MessagesReplace { ws_id, .. }
            | Mutation::StreamingDelta { ws_id, .. }
            | Mutation::StreamingClear { ws_id, .. }
            | Mutation::ToolStart { ws_id, .. }
            | Mutation::ToolUpdate { ws_id, .. }
            | Mutation::ToolEnd { ws_id, .. }
            | Mutation::PendingUiSet { ws_id, .. }
            | Mutation::PendingUiCancelled { ws_id, .. }
            | Mutation::SessionsUpdate { ws_id, .. }
            | Mutation::PlansUpdate { ws_id, .. }
            | Mutation::JobsUpdate { ws_id, .. }
            | Mutation::ActivePlanUpdate { ws_id, .. }
            | Mutation::ActiveJobsUpdate { ws_id, .. }
            | Mutation::PaneUiUpdate { ws_id, .. }
            | Mutation::QueuedMessagesUpdate { ws_id, .. } => Some(ws_id),
            Mutation::UiStateUpdate { .. } => None,
            // An unrecognized kind carries no structural guarantee of a
            // `wsId` field, let alone one that parses — deliver it like a
            // global mutation rather than guess.
            Mutation::Unknown { .. } => None,
        }
    }
}

/// Why `StateModel::apply` refused to advance the version for a mutation.
/// Some reasons are idempotent no-ops; others are protocol errors that
/// get reported back to the originating client without touching the log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("unknown tool call id {0}, ignored")]
    UnknownToolCallId(String),
    #[error("workspace {0} already exists")]
    WorkspaceAlreadyExists(WorkspaceId),
    #[error("workspace {0} not found")]
    UnknownWorkspace(WorkspaceId),
    #[error("slot {1} not found in workspace {0}")]
    UnknownSlot(WorkspaceId, SlotId),
    #[error("slot {1} already exists in workspace {0}")]
    SlotAlreadyExists(WorkspaceId, SlotId),
    #[error("cannot delete the default slot of workspace {0}")]
    CannotDeleteDefaultSlot(WorkspaceId),
    #[error("message id {0} already present in this slot")]
    DuplicateMessageId(String),
    #[error("pendingUi already set for slot {1} in workspace {0}")]
    PendingUiConflict(WorkspaceId, SlotId),
    #[error("unknown mutation kind {0}, ignored")]
    UnknownMutationKind(String),
}
