//! Client/server WebSocket message families.

use serde::{Deserialize, Serialize};

use crate::ids::{SlotId, WorkspaceId};
use crate::model::GlobalState;
use crate::mutation::Mutation;

/// Messages a browser tab sends over `GET /ws`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Hello {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        resume_from_version: Option<u64>,
    },
    Ack {
        version: u64,
    },
    OpenWorkspace {
        path: String,
    },
    CloseWorkspace {
        workspace_id: WorkspaceId,
    },
    BrowseDirectory {
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Prompt {
        workspace_id: WorkspaceId,
        slot_id: SlotId,
        message: String,
        #[serde(default)]
        images: Vec<String>,
    },
    Steer {
        workspace_id: WorkspaceId,
        slot_id: SlotId,
        message: String,
    },
    FollowUp {
        workspace_id: WorkspaceId,
        slot_id: SlotId,
        message: String,
    },
    Abort {
        workspace_id: WorkspaceId,
        slot_id: SlotId,
    },
    SetModel {
        workspace_id: WorkspaceId,
        slot_id: SlotId,
        provider: String,
        model_id: String,
    },
    SetThinkingLevel {
        workspace_id: WorkspaceId,
        slot_id: SlotId,
        level: String,
    },
    NewSession {
        workspace_id: WorkspaceId,
        slot_id: SlotId,
    },
    SwitchSession {
        workspace_id: WorkspaceId,
        slot_id: SlotId,
        session_file: String,
    },
    Compact {
        workspace_id: WorkspaceId,
        slot_id: SlotId,
        #[serde(skip_serializing_if = "Option::is_none")]
        instructions: Option<String>,
    },
    Fork {
        workspace_id: WorkspaceId,
        slot_id: SlotId,
        entry_id: String,
    },
    Bash {
        workspace_id: WorkspaceId,
        slot_id: SlotId,
        command: String,
    },
    AbortBash {
        workspace_id: WorkspaceId,
        slot_id: SlotId,
    },
    QuestionnaireResponse {
        workspace_id: WorkspaceId,
        slot_id: SlotId,
        id: String,
        answers: serde_json::Value,
    },
    CreateSlot {
        workspace_id: WorkspaceId,
        slot_id: SlotId,
    },
    DeleteSlot {
        workspace_id: WorkspaceId,
        slot_id: SlotId,
    },
}

/// Messages the server pushes to a connected tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Snapshot {
        version: u64,
        state: GlobalState,
    },
    Delta {
        version: u64,
        mutation: Mutation,
    },
    DeltaBatch {
        deltas: Vec<crate::Delta>,
    },
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        workspace_id: Option<WorkspaceId>,
    },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
            workspace_id: None,
        }
    }

    pub fn error_for(
        code: impl Into<String>,
        message: impl Into<String>,
        workspace_id: WorkspaceId,
    ) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
            workspace_id: Some(workspace_id),
        }
    }
}
