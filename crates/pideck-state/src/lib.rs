//! StateModel: the single authoritative in-memory state tree and
//! the pure `apply` function that validates and folds a [`Mutation`] into it.
//!
//! This crate has no async runtime dependency and no I/O — it is exercised
//! directly by unit tests and is driven, in production, by `pideck-log`'s
//! single commit worker. Fan-out to subscribers is intentionally
//! not duplicated here: `pideck-log` owns the `tokio::sync::broadcast`
//! channel and calls `apply` directly, publishing the canonical mutation
//! itself once the durable append succeeds. That keeps this crate pure and
//! synchronous, which is what makes snapshot-then-replay reproducibility
//! (bit-for-bit identical to a from-scratch build) straightforward to unit
//! test.

use tracing::warn;

use pideck_protocol::{
    ContentPart, GlobalState, Message, Mutation, PendingUi, RejectReason, SessionInfo, Slot,
    SlotId, StreamChannel, ToolExecution, ToolStatus, Workspace, WorkspaceId,
};

/// The authoritative state tree plus the rules for mutating it.
#[derive(Debug, Default)]
pub struct StateModel {
    state: GlobalState,
}

impl StateModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.state.version
    }

    /// A deep copy of the current state, suitable for a `Snapshot` or for a
    /// `VersionedLog` rollback backup.
    pub fn snapshot(&self) -> GlobalState {
        self.state.clone()
    }

    /// Read-only access to the live tree, for catch-up reads that don't need
    /// an owned copy.
    pub fn state(&self) -> &GlobalState {
        &self.state
    }

    /// Overwrite the tree wholesale — used both by `load` (below) and by a
    /// `VersionedLog` rollback after a failed durable append.
    pub fn replace_state(&mut self, state: GlobalState) {
        self.state = state;
    }

    /// Deterministically rebuild state from a snapshot plus the deltas
    /// committed after it.
    pub fn load(&mut self, snapshot: GlobalState, deltas: Vec<(u64, Mutation)>) -> Result<(), ApplyError> {
        self.state = snapshot;
        for (version, mutation) in deltas {
            let expected = self.state.version + 1;
            if version != expected {
                return Err(ApplyError::VersionGap {
                    expected,
                    got: version,
                });
            }
            self.apply(mutation).map_err(ApplyError::Rejected)?;
        }
        Ok(())
    }

    /// Validate `mutation` against every state invariant, fold it into
    /// the tree, advance `version` by exactly one, and return the
    /// (possibly canonicalized) mutation that was actually applied.
    ///
    /// On rejection, the tree and `version` are left completely untouched —
    /// the caller (`VersionedLog`) never persists or broadcasts a rejected
    /// mutation.
    pub fn apply(&mut self, mutation: Mutation) -> Result<Mutation, RejectReason> {
        let canonical = self.fold(mutation)?;
        self.state.version += 1;
        Ok(canonical)
    }

    fn fold(&mut self, mutation: Mutation) -> Result<Mutation, RejectReason> {
        match mutation {
            Mutation::WorkspaceCreate { ws_id, path } => {
                if self.state.workspaces.contains_key(&ws_id) {
                    return Err(RejectReason::WorkspaceAlreadyExists(ws_id));
                }
                let name = Workspace::name_from_path(&path);
                self.state.workspaces.insert(
                    ws_id.clone(),
                    Workspace {
                        id: ws_id.clone(),
                        path: path.clone(),
                        name,
                        slots: Default::default(),
                        sessions: Vec::new(),
                        plans: None,
                        jobs: None,
                        active_plan: None,
                        active_jobs: None,
                        pane_ui: Default::default(),
                    },
                );
                Ok(Mutation::WorkspaceCreate { ws_id, path })
            }
            Mutation::WorkspaceClose { ws_id } => {
                if self.state.workspaces.remove(&ws_id).is_none() {
                    return Err(RejectReason::UnknownWorkspace(ws_id));
                }
                Ok(Mutation::WorkspaceClose { ws_id })
            }
            Mutation::SlotCreate { ws_id, slot_id } => {
                let ws = self.workspace_mut(&ws_id)?;
                if ws.slots.contains_key(&slot_id) {
                    return Err(RejectReason::SlotAlreadyExists(ws_id, slot_id));
                }
                ws.slots.insert(slot_id.clone(), Slot::new(slot_id.clone()));
                Ok(Mutation::SlotCreate { ws_id, slot_id })
            }
            Mutation::SlotDelete { ws_id, slot_id } => {
                if slot_id.is_default() {
                    return Err(RejectReason::CannotDeleteDefaultSlot(ws_id));
                }
                let ws = self.workspace_mut(&ws_id)?;
                if ws.slots.remove(&slot_id).is_none() {
                    return Err(RejectReason::UnknownSlot(ws_id, slot_id));
                }
                Ok(Mutation::SlotDelete { ws_id, slot_id })
            }
            Mutation::SlotUpdate {
                ws_id,
                slot_id,
                patch,
            } => {
                let slot = self.slot_mut(&ws_id, &slot_id)?;
                if let Some(v) = patch.session_file.clone() {
                    slot.session_file = v;
                }
                if let Some(was_streaming) = patch.is_streaming {
                    let turned_off = slot.is_streaming && !was_streaming;
                    slot.is_streaming = was_streaming;
                    // isStreaming true->false always clears both buffers.
                    if turned_off {
                        slot.streaming_text.clear();
                        slot.streaming_thinking.clear();
                    }
                }
                if let Some(v) = patch.is_compacting {
                    slot.is_compacting = v;
                }
                if let Some(v) = patch.model_ref.clone() {
                    slot.model_ref = v;
                }
                if let Some(v) = patch.thinking_level {
                    slot.thinking_level = v;
                }
                if let Some(ref msg) = patch.finalize_message {
                    match slot.messages.iter_mut().find(|m| m.id == msg.id) {
                        Some(existing) => *existing = msg.clone(),
                        None => slot.messages.push(msg.clone()),
                    }
                }
                Ok(Mutation::SlotUpdate {
                    ws_id,
                    slot_id,
                    patch,
                })
            }
            Mutation::MessagesAppend {
                ws_id,
                slot_id,
                messages,
            } => {
                let slot = self.slot_mut(&ws_id, &slot_id)?;
                for m in &messages {
                    if slot.messages.iter().any(|existing| existing.id == m.id) {
                        return Err(RejectReason::DuplicateMessageId(m.id.clone()));
                    }
                }
                slot.messages.extend(messages.clone());
                Ok(Mutation::MessagesAppend {
                    ws_id,
                    slot_id,
                    messages,
                })
            }
            Mutation::MessagesReplace {
                ws_id,
                slot_id,
                messages,
            } => {
                let slot = self.slot_mut(&ws_id, &slot_id)?;
                slot.messages = messages.clone();
                Ok(Mutation::MessagesReplace {
                    ws_id,
                    slot_id,
                    messages,
                })
            }
            Mutation::StreamingDelta {
                ws_id,
                slot_id,
                channel,
                delta,
            } => {
                let slot = self.slot_mut(&ws_id, &slot_id)?;
                match channel {
                    StreamChannel::Text => slot.streaming_text.push_str(&delta),
                    StreamChannel::Thinking => slot.streaming_thinking.push_str(&delta),
                }
                Ok(Mutation::StreamingDelta {
                    ws_id,
                    slot_id,
                    channel,
                    delta,
                })
            }
            Mutation::StreamingClear { ws_id, slot_id } => {
                let slot = self.slot_mut(&ws_id, &slot_id)?;
                slot.streaming_text.clear();
                slot.streaming_thinking.clear();
                Ok(Mutation::StreamingClear { ws_id, slot_id })
            }
            Mutation::ToolStart {
                ws_id,
                slot_id,
                execution,
            } => {
                let slot = self.slot_mut(&ws_id, &slot_id)?;
                slot.active_tools.insert(execution.id.clone(), execution.clone());
                Ok(Mutation::ToolStart {
                    ws_id,
                    slot_id,
                    execution,
                })
            }
            Mutation::ToolUpdate {
                ws_id,
                slot_id,
                tool_call_id,
                partial_result,
            } => {
                let slot = self.slot_mut(&ws_id, &slot_id)?;
                match slot.active_tools.get_mut(&tool_call_id) {
                    Some(exec) => {
                        exec.partial_result.push_str(&partial_result);
                        Ok(Mutation::ToolUpdate {
                            ws_id,
                            slot_id,
                            tool_call_id,
                            partial_result,
                        })
                    }
                    None => {
                        warn!(%tool_call_id, "ToolUpdate for unknown tool call, ignored");
                        Err(RejectReason::UnknownToolCallId(tool_call_id))
                    }
                }
            }
            Mutation::ToolEnd {
                ws_id,
                slot_id,
                tool_call_id,
                result,
                is_error,
            } => {
                let slot = self.slot_mut(&ws_id, &slot_id)?;
                if slot.active_tools.remove(&tool_call_id).is_none() {
                    warn!(%tool_call_id, "ToolEnd for unknown tool call, ignored");
                    return Err(RejectReason::UnknownToolCallId(tool_call_id));
                }
                let status = if is_error { ToolStatus::Error } else { ToolStatus::Complete };
                for m in slot.messages.iter_mut() {
                    for part in m.content.iter_mut() {
                        if let ContentPart::ToolCall { call_id, status: s, result: r, .. } = part {
                            if *call_id == tool_call_id {
                                *s = status;
                                *r = Some(result.clone());
                            }
                        }
                    }
                }
                Ok(Mutation::ToolEnd {
                    ws_id,
                    slot_id,
                    tool_call_id,
                    result,
                    is_error,
                })
            }
            Mutation::PendingUiSet {
                ws_id,
                slot_id,
                pending_ui,
            } => {
                let slot = self.slot_mut(&ws_id, &slot_id)?;
                if pending_ui.is_some() && slot.pending_ui.is_some() {
                    return Err(RejectReason::PendingUiConflict(ws_id, slot_id));
                }
                slot.pending_ui = pending_ui.clone();
                Ok(Mutation::PendingUiSet {
                    ws_id,
                    slot_id,
                    pending_ui,
                })
            }
            Mutation::PendingUiCancelled { ws_id, slot_id } => {
                let slot = self.slot_mut(&ws_id, &slot_id)?;
                slot.pending_ui = None;
                Ok(Mutation::PendingUiCancelled { ws_id, slot_id })
            }
            Mutation::SessionsUpdate { ws_id, sessions } => {
                let ws = self.workspace_mut(&ws_id)?;
                ws.sessions = sessions.clone();
                Ok(Mutation::SessionsUpdate { ws_id, sessions })
            }
            Mutation::PlansUpdate { ws_id, plans } => {
                let ws = self.workspace_mut(&ws_id)?;
                ws.plans = Some(plans.clone());
                Ok(Mutation::PlansUpdate { ws_id, plans })
            }
            Mutation::JobsUpdate { ws_id, jobs } => {
                let ws = self.workspace_mut(&ws_id)?;
                ws.jobs = Some(jobs.clone());
                Ok(Mutation::JobsUpdate { ws_id, jobs })
            }
            Mutation::ActivePlanUpdate { ws_id, active_plan } => {
                let ws = self.workspace_mut(&ws_id)?;
                ws.active_plan = Some(active_plan.clone());
                Ok(Mutation::ActivePlanUpdate { ws_id, active_plan })
            }
            Mutation::ActiveJobsUpdate { ws_id, active_jobs } => {
                let ws = self.workspace_mut(&ws_id)?;
                ws.active_jobs = Some(active_jobs.clone());
                Ok(Mutation::ActiveJobsUpdate { ws_id, active_jobs })
            }
            Mutation::PaneUiUpdate {
                ws_id,
                right_pane_open,
                tabs,
                active_tab,
            } => {
                let ws = self.workspace_mut(&ws_id)?;
                ws.pane_ui.right_pane_open = right_pane_open;
                ws.pane_ui.tabs = tabs.clone();
                ws.pane_ui.active_tab = active_tab.clone();
                Ok(Mutation::PaneUiUpdate {
                    ws_id,
                    right_pane_open,
                    tabs,
                    active_tab,
                })
            }
            Mutation::QueuedMessagesUpdate {
                ws_id,
                slot_id,
                steering,
                follow_up,
            } => {
                let slot = self.slot_mut(&ws_id, &slot_id)?;
                slot.queued_messages.steering = steering.clone();
                slot.queued_messages.follow_up = follow_up.clone();
                Ok(Mutation::QueuedMessagesUpdate {
                    ws_id,
                    slot_id,
                    steering,
                    follow_up,
                })
            }
            Mutation::UiStateUpdate { patch } => {
                if let Some(theme) = patch.theme.clone() {
                    self.state.ui_state.theme = Some(theme);
                }
                if let Some(ref d) = patch.draft_input {
                    match &d.text {
                        Some(text) => {
                            self.state
                                .ui_state
                                .draft_inputs
                                .insert(d.workspace_path.clone(), text.clone());
                        }
                        None => {
                            self.state.ui_state.draft_inputs.remove(&d.workspace_path);
                        }
                    }
                }
                if let Some(ws) = patch.last_active_workspace.clone() {
                    self.state.ui_state.last_active_workspace = Some(ws);
                }
                if let Some((ws, slot)) = patch.last_active_session.clone() {
                    self.state.ui_state.last_active_session.insert(ws, slot);
                }
                Ok(Mutation::UiStateUpdate { patch })
            }
            Mutation::Unknown { kind, .. } => {
                warn!(%kind, "rejecting mutation of unknown kind");
                Err(RejectReason::UnknownMutationKind(kind))
            }
        }
    }

    fn workspace_mut(&mut self, ws_id: &WorkspaceId) -> Result<&mut Workspace, RejectReason> {
        self.state
            .workspaces
            .get_mut(ws_id)
            .ok_or_else(|| RejectReason::UnknownWorkspace(ws_id.clone()))
    }

    fn slot_mut(&mut self, ws_id: &WorkspaceId, slot_id: &SlotId) -> Result<&mut Slot, RejectReason> {
        let ws = self.workspace_mut(ws_id)?;
        ws.slots
            .get_mut(slot_id)
            .ok_or_else(|| RejectReason::UnknownSlot(ws_id.clone(), slot_id.clone()))
    }

}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("version gap during replay: expected {expected}, got {got}")]
    VersionGap { expected: u64, got: u64 },
    #[error("rejected during replay: {0}")]
    Rejected(RejectReason),
}

/// Helpers for constructing well-formed placeholder/finalized messages —
/// used by `pideck-agent`'s translation rules and by tests.
pub fn placeholder_message(id: impl Into<String>, role: pideck_protocol::MessageRole) -> Message {
    Message {
        id: id.into(),
        role,
        timestamp: chrono::Utc::now(),
        content: Vec::new(),
    }
}

pub fn user_message(id: impl Into<String>, text: impl Into<String>) -> Message {
    Message {
        id: id.into(),
        role: pideck_protocol::MessageRole::User,
        timestamp: chrono::Utc::now(),
        content: vec![ContentPart::Text { text: text.into() }],
    }
}

pub fn tool_execution(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> ToolExecution {
    ToolExecution {
        id: id.into(),
        name: name.into(),
        args,
        status: ToolStatus::Running,
        started_at: chrono::Utc::now(),
        partial_result: String::new(),
    }
}

pub fn empty_session_info(session_file: impl Into<String>) -> SessionInfo {
    SessionInfo {
        session_file: session_file.into(),
        title: None,
        created_at: chrono::Utc::now().to_rfc3339(),
        message_count: 0,
    }
}

pub fn pending_ui(id: impl Into<String>, kind: pideck_protocol::PendingUiKind, data: serde_json::Value) -> PendingUi {
    PendingUi {
        id: id.into(),
        kind,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pideck_protocol::{MessageRole, SlotPatch};

    fn ws(id: &str) -> WorkspaceId {
        WorkspaceId(id.to_string())
    }

    fn open_workspace(model: &mut StateModel, id: &str, path: &str) {
        model
            .apply(Mutation::WorkspaceCreate {
                ws_id: ws(id),
                path: path.to_string(),
            })
            .unwrap();
        model
            .apply(Mutation::SlotCreate {
                ws_id: ws(id),
                slot_id: SlotId::from("default"),
            })
            .unwrap();
    }

    #[test]
    fn versions_increment_by_one_per_committed_mutation() {
        let mut model = StateModel::new();
        open_workspace(&mut model, "ws-1", "/tmp/ws");
        assert_eq!(model.version(), 2);
    }

    #[test]
    fn duplicate_workspace_create_is_rejected_without_advancing_version() {
        let mut model = StateModel::new();
        open_workspace(&mut model, "ws-1", "/tmp/ws");
        let v = model.version();
        let err = model
            .apply(Mutation::WorkspaceCreate {
                ws_id: ws("ws-1"),
                path: "/tmp/ws".into(),
            })
            .unwrap_err();
        assert_eq!(err, RejectReason::WorkspaceAlreadyExists(ws("ws-1")));
        assert_eq!(model.version(), v);
    }

    #[test]
    fn unknown_mutation_kind_is_rejected_without_advancing_version() {
        let mut model = StateModel::new();
        open_workspace(&mut model, "ws-1", "/tmp/ws");
        let v = model.version();
        let err = model
            .apply(Mutation::Unknown {
                kind: "futureMutation".into(),
                raw: serde_json::json!({"kind": "futureMutation"}),
            })
            .unwrap_err();
        assert_eq!(err, RejectReason::UnknownMutationKind("futureMutation".into()));
        assert_eq!(model.version(), v);
    }

    #[test]
    fn default_slot_exists_after_open_sequence() {
        let mut model = StateModel::new();
        open_workspace(&mut model, "ws-1", "/tmp/ws");
        let state = model.state();
        assert!(state.workspaces[&ws("ws-1")]
            .slots
            .contains_key(&SlotId::from("default")));
    }

    #[test]
    fn tool_update_for_unknown_id_is_ignored_and_does_not_advance_version() {
        let mut model = StateModel::new();
        open_workspace(&mut model, "ws-1", "/tmp/ws");
        let v = model.version();
        let err = model
            .apply(Mutation::ToolUpdate {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
                tool_call_id: "nope".into(),
                partial_result: "x".into(),
            })
            .unwrap_err();
        assert_eq!(err, RejectReason::UnknownToolCallId("nope".into()));
        assert_eq!(model.version(), v);
    }

    #[test]
    fn tool_end_migrates_execution_out_of_active_tools_and_into_message() {
        let mut model = StateModel::new();
        open_workspace(&mut model, "ws-1", "/tmp/ws");

        let mut msg = placeholder_message("m1", MessageRole::Assistant);
        msg.content.push(ContentPart::ToolCall {
            call_id: "t1".into(),
            name: "read_file".into(),
            args: serde_json::json!({}),
            status: ToolStatus::Running,
            result: None,
        });
        model
            .apply(Mutation::MessagesAppend {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
                messages: vec![msg],
            })
            .unwrap();

        model
            .apply(Mutation::ToolStart {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
                execution: tool_execution("t1", "read_file", serde_json::json!({})),
            })
            .unwrap();
        model
            .apply(Mutation::ToolUpdate {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
                tool_call_id: "t1".into(),
                partial_result: "abc".into(),
            })
            .unwrap();
        model
            .apply(Mutation::ToolEnd {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
                tool_call_id: "t1".into(),
                result: "abcdef".into(),
                is_error: false,
            })
            .unwrap();

        let slot = &model.state().workspaces[&ws("ws-1")].slots[&SlotId::from("default")];
        assert!(!slot.active_tools.contains_key("t1"));
        assert!(!slot.message_references_tool("unused"));
        let ContentPart::ToolCall { status, result, .. } = &slot.messages[0].content[0] else {
            panic!("expected tool call part");
        };
        assert_eq!(*status, ToolStatus::Complete);
        assert_eq!(result.as_deref(), Some("abcdef"));
    }

    #[test]
    fn streaming_clears_on_is_streaming_false_transition() {
        let mut model = StateModel::new();
        open_workspace(&mut model, "ws-1", "/tmp/ws");
        model
            .apply(Mutation::StreamingDelta {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
                channel: StreamChannel::Text,
                delta: "hello".into(),
            })
            .unwrap();
        model
            .apply(Mutation::SlotUpdate {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
                patch: SlotPatch::is_streaming(true),
            })
            .unwrap();
        model
            .apply(Mutation::SlotUpdate {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
                patch: SlotPatch::is_streaming(false),
            })
            .unwrap();
        let slot = &model.state().workspaces[&ws("ws-1")].slots[&SlotId::from("default")];
        assert_eq!(slot.streaming_text, "");
        assert_eq!(slot.streaming_thinking, "");
    }

    #[test]
    fn pending_ui_conflict_is_rejected() {
        let mut model = StateModel::new();
        open_workspace(&mut model, "ws-1", "/tmp/ws");
        model
            .apply(Mutation::PendingUiSet {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
                pending_ui: Some(pending_ui(
                    "q1",
                    pideck_protocol::PendingUiKind::Questionnaire,
                    serde_json::json!({}),
                )),
            })
            .unwrap();
        let v = model.version();
        let err = model
            .apply(Mutation::PendingUiSet {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
                pending_ui: Some(pending_ui(
                    "q2",
                    pideck_protocol::PendingUiKind::Confirmation,
                    serde_json::json!({}),
                )),
            })
            .unwrap_err();
        assert_eq!(err, RejectReason::PendingUiConflict(ws("ws-1"), SlotId::from("default")));
        assert_eq!(model.version(), v);
    }

    #[test]
    fn pending_ui_cancelled_clears_it_and_frees_the_slot_for_a_new_one() {
        let mut model = StateModel::new();
        open_workspace(&mut model, "ws-1", "/tmp/ws");
        model
            .apply(Mutation::PendingUiSet {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
                pending_ui: Some(pending_ui(
                    "q1",
                    pideck_protocol::PendingUiKind::Questionnaire,
                    serde_json::json!({}),
                )),
            })
            .unwrap();
        model
            .apply(Mutation::PendingUiCancelled {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
            })
            .unwrap();
        let slot = &model.state().workspaces[&ws("ws-1")].slots[&SlotId::from("default")];
        assert!(slot.pending_ui.is_none());

        // A new pendingUI can now be set without tripping PendingUiConflict.
        model
            .apply(Mutation::PendingUiSet {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
                pending_ui: Some(pending_ui(
                    "q2",
                    pideck_protocol::PendingUiKind::Confirmation,
                    serde_json::json!({}),
                )),
            })
            .unwrap();
    }

    #[test]
    fn duplicate_message_id_is_rejected() {
        let mut model = StateModel::new();
        open_workspace(&mut model, "ws-1", "/tmp/ws");
        model
            .apply(Mutation::MessagesAppend {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
                messages: vec![user_message("m1", "hi")],
            })
            .unwrap();
        let err = model
            .apply(Mutation::MessagesAppend {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
                messages: vec![user_message("m1", "hi again")],
            })
            .unwrap_err();
        assert_eq!(err, RejectReason::DuplicateMessageId("m1".into()));
    }

    #[test]
    fn snapshot_then_replay_is_bit_identical_to_building_from_scratch() {
        let mut model = StateModel::new();
        open_workspace(&mut model, "ws-1", "/tmp/ws");
        model
            .apply(Mutation::MessagesAppend {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
                messages: vec![user_message("m1", "hi")],
            })
            .unwrap();

        let snap_at_2 = {
            let mut half = StateModel::new();
            open_workspace(&mut half, "ws-1", "/tmp/ws");
            half.snapshot()
        };

        let mut replayed = StateModel::new();
        replayed
            .load(
                snap_at_2,
                vec![(
                    3,
                    Mutation::MessagesAppend {
                        ws_id: ws("ws-1"),
                        slot_id: SlotId::from("default"),
                        messages: vec![user_message("m1", "hi")],
                    },
                )],
            )
            .unwrap();

        assert_eq!(replayed.state(), model.state());
    }

    #[test]
    fn cannot_delete_default_slot() {
        let mut model = StateModel::new();
        open_workspace(&mut model, "ws-1", "/tmp/ws");
        let err = model
            .apply(Mutation::SlotDelete {
                ws_id: ws("ws-1"),
                slot_id: SlotId::from("default"),
            })
            .unwrap_err();
        assert_eq!(err, RejectReason::CannotDeleteDefaultSlot(ws("ws-1")));
    }
}
