//! The authoritative state tree.
//!
//! Maps are `BTreeMap` rather than `HashMap` even though insertion order
//! is otherwise irrelevant: a deterministic iteration order is what makes
//! "snapshot + replay is bit-identical to a from-scratch build" checkable
//! by straight `PartialEq`/serialization comparison rather than a
//! set-equality dance.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SlotId, WorkspaceId};

/// The single logical root owned by `StateModel`. Every mutation advances
/// `version` by exactly one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    pub version: u64,
    pub workspaces: BTreeMap<WorkspaceId, Workspace>,
    #[serde(rename = "uiState")]
    pub ui_state: UiState,
}

/// Per-user scratch preferences, replicated to every client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    pub theme: Option<String>,
    /// Draft inputs keyed by absolute workspace path (not workspace id: a
    /// draft survives a workspace being closed and reopened).
    pub draft_inputs: BTreeMap<String, String>,
    pub last_active_workspace: Option<WorkspaceId>,
    pub last_active_session: BTreeMap<WorkspaceId, SlotId>,
}

/// Patch applied field-by-field to [`UiState`] by `UIStateUpdate`. `None`
/// means "leave untouched", matching `SlotUpdate`'s patch semantics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiStatePatch {
    pub theme: Option<String>,
    pub draft_input: Option<DraftInputPatch>,
    pub last_active_workspace: Option<WorkspaceId>,
    pub last_active_session: Option<(WorkspaceId, SlotId)>,
}

/// A single draft-input upsert; `text: None` removes the entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftInputPatch {
    pub workspace_path: String,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: WorkspaceId,
    pub path: String,
    pub name: String,
    pub slots: BTreeMap<SlotId, Slot>,
    pub sessions: Vec<SessionInfo>,
    pub plans: Option<serde_json::Value>,
    pub jobs: Option<serde_json::Value>,
    pub active_plan: Option<serde_json::Value>,
    pub active_jobs: Option<serde_json::Value>,
    pub pane_ui: PaneUi,
}

impl Workspace {
    /// Derive the display name from the path basename — `name` is derived
    /// from the path, not an independently authoritative field.
    pub fn name_from_path(path: &str) -> String {
        let trimmed = path.trim_end_matches('/');
        trimmed
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(trimmed)
            .to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaneUi {
    pub tabs: Vec<TabRef>,
    pub active_tab: Option<TabRef>,
    pub right_pane_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabRef {
    pub slot_id: SlotId,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: SlotId,
    pub session_file: Option<String>,
    pub messages: Vec<Message>,
    pub streaming_text: String,
    pub streaming_thinking: String,
    pub active_tools: BTreeMap<String, ToolExecution>,
    pub is_streaming: bool,
    pub is_compacting: bool,
    pub pending_ui: Option<PendingUi>,
    pub queued_messages: QueuedMessages,
    pub model_ref: Option<String>,
    pub thinking_level: ThinkingLevel,
}

impl Slot {
    pub fn new(id: SlotId) -> Self {
        Self {
            id,
            session_file: None,
            messages: Vec::new(),
            streaming_text: String::new(),
            streaming_thinking: String::new(),
            active_tools: BTreeMap::new(),
            is_streaming: false,
            is_compacting: false,
            pending_ui: None,
            queued_messages: QueuedMessages::default(),
            model_ref: None,
            thinking_level: ThinkingLevel::default(),
        }
    }

    /// True if any finalized message references `tool_call_id` — used to
    /// enforce the testable property that `activeTools` and finalized tool
    /// references never overlap.
    pub fn message_references_tool(&self, tool_call_id: &str) -> bool {
        self.messages.iter().any(|m| {
            m.content.iter().any(|p| match p {
                ContentPart::ToolCall { call_id, .. } => call_id == tool_call_id,
                _ => false,
            })
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessages {
    pub steering: Vec<String>,
    pub follow_up: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingLevel {
    Off,
    #[default]
    Minimal,
    Low,
    Medium,
    High,
    Xhigh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecution {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
    pub status: ToolStatus,
    pub started_at: DateTime<Utc>,
    /// Partial output appended by `ToolUpdate`s as they arrive.
    pub partial_result: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Complete,
    Error,
}

/// An outstanding interactive request from an agent tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUi {
    pub id: String,
    pub kind: PendingUiKind,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingUiKind {
    Questionnaire,
    Confirmation,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub timestamp: DateTime<Utc>,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageRole {
    User,
    Assistant,
    ToolResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentPart {
    Text { text: String },
    Thinking { text: String },
    ToolCall {
        call_id: String,
        name: String,
        args: serde_json::Value,
        status: ToolStatus,
        result: Option<String>,
    },
    Image { mime_type: String, data_base64: String },
}

/// Summary of an on-disk agent session discoverable in a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_file: String,
    pub title: Option<String>,
    pub created_at: String,
    pub message_count: usize,
}
