use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use pideck_agent::{AgentCommand, AgentError};
use pideck_protocol::{ClientMessage, ThinkingLevel, WorkspaceId};
use pideck_workspace::{WorkspaceError, WorkspaceRegistry};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("{0}")]
    Workspace(#[from] WorkspaceError),
    #[error("{0}")]
    Agent(#[from] AgentError),
    #[error("invalid thinking level {0:?}")]
    InvalidThinkingLevel(String),
    #[error("{0} is not a routable command")]
    NotRoutable(&'static str),
}

impl RouteError {
    /// A short machine-readable code for the wire `Error` message.
    pub fn code(&self) -> &'static str {
        match self {
            RouteError::Workspace(WorkspaceError::NotAllowed(_)) => "path_not_allowed",
            RouteError::Workspace(WorkspaceError::PathNotFound(_, _)) => "path_not_found",
            RouteError::Workspace(WorkspaceError::UnknownWorkspace(_)) => "unknown_workspace",
            RouteError::Workspace(WorkspaceError::UnknownSlot(_, _)) => "unknown_slot",
            RouteError::Workspace(WorkspaceError::Commit(_)) => "rejected",
            RouteError::Agent(_) => "agent_error",
            RouteError::InvalidThinkingLevel(_) => "invalid_argument",
            RouteError::NotRoutable(_) => "invalid_command",
        }
    }

    pub fn workspace_id(&self) -> Option<WorkspaceId> {
        match self {
            RouteError::Workspace(WorkspaceError::UnknownWorkspace(id)) => Some(id.clone()),
            RouteError::Workspace(WorkspaceError::UnknownSlot(id, _)) => Some(id.clone()),
            _ => None,
        }
    }
}

/// Routes every `ClientMessage` command variant to
/// `WorkspaceRegistry` or the target slot's `AgentAdapter`. `Hello` and
/// `Ack` are handled by `ClientSession` itself and never reach this router.
pub struct CommandRouter {
    registry: Arc<WorkspaceRegistry>,
}

impl CommandRouter {
    pub fn new(registry: Arc<WorkspaceRegistry>) -> Self {
        Self { registry }
    }

    pub async fn route(&self, message: ClientMessage) -> Result<(), RouteError> {
        match message {
            ClientMessage::Hello { .. } | ClientMessage::Ack { .. } => {
                Err(RouteError::NotRoutable("hello/ack"))
            }
            ClientMessage::OpenWorkspace { path } => {
                self.registry.open_workspace(&path).await?;
                Ok(())
            }
            ClientMessage::CloseWorkspace { workspace_id } => {
                self.registry.close_workspace(&workspace_id).await?;
                Ok(())
            }
            ClientMessage::BrowseDirectory { .. } => {
                debug!("browseDirectory is a client-local file picker concern; ignoring");
                Ok(())
            }
            ClientMessage::Prompt {
                workspace_id,
                slot_id,
                message,
                images,
            } => {
                self.dispatch(&workspace_id, &slot_id, AgentCommand::SendPrompt { text: message, images })
                    .await
            }
            ClientMessage::Steer {
                workspace_id,
                slot_id,
                message,
            } => {
                self.dispatch(&workspace_id, &slot_id, AgentCommand::Steer { text: message })
                    .await
            }
            ClientMessage::FollowUp {
                workspace_id,
                slot_id,
                message,
            } => {
                self.dispatch(&workspace_id, &slot_id, AgentCommand::FollowUp { text: message })
                    .await
            }
            ClientMessage::Abort { workspace_id, slot_id } => {
                self.dispatch(&workspace_id, &slot_id, AgentCommand::Abort).await
            }
            ClientMessage::SetModel {
                workspace_id,
                slot_id,
                provider,
                model_id,
            } => {
                self.dispatch(&workspace_id, &slot_id, AgentCommand::SetModel { provider, model_id })
                    .await
            }
            ClientMessage::SetThinkingLevel {
                workspace_id,
                slot_id,
                level,
            } => {
                let level: ThinkingLevel = serde_json::from_value(serde_json::Value::String(level.clone()))
                    .map_err(|_| RouteError::InvalidThinkingLevel(level))?;
                self.dispatch(&workspace_id, &slot_id, AgentCommand::SetThinkingLevel(level))
                    .await
            }
            ClientMessage::NewSession { workspace_id, slot_id } => {
                self.dispatch(&workspace_id, &slot_id, AgentCommand::NewSession).await
            }
            ClientMessage::SwitchSession {
                workspace_id,
                slot_id,
                session_file,
            } => {
                self.dispatch(&workspace_id, &slot_id, AgentCommand::SwitchSession { session_file })
                    .await
            }
            ClientMessage::Compact {
                workspace_id,
                slot_id,
                instructions,
            } => {
                self.dispatch(&workspace_id, &slot_id, AgentCommand::Compact { instructions })
                    .await
            }
            ClientMessage::Fork {
                workspace_id,
                slot_id,
                entry_id,
            } => {
                self.dispatch(&workspace_id, &slot_id, AgentCommand::Fork { entry_id })
                    .await
            }
            ClientMessage::Bash {
                workspace_id,
                slot_id,
                command,
            } => {
                self.dispatch(&workspace_id, &slot_id, AgentCommand::Bash { command })
                    .await
            }
            ClientMessage::AbortBash { workspace_id, slot_id } => {
                self.dispatch(&workspace_id, &slot_id, AgentCommand::AbortBash).await
            }
            ClientMessage::QuestionnaireResponse {
                workspace_id,
                slot_id,
                id,
                answers,
            } => {
                let response = serde_json::json!({ "id": id, "answers": answers });
                self.dispatch(&workspace_id, &slot_id, AgentCommand::RespondToPendingUi { response })
                    .await
            }
            ClientMessage::CreateSlot { workspace_id, slot_id } => {
                self.registry.create_slot(&workspace_id, slot_id).await?;
                Ok(())
            }
            ClientMessage::DeleteSlot { workspace_id, slot_id } => {
                self.registry.delete_slot(&workspace_id, &slot_id).await?;
                Ok(())
            }
        }
    }

    async fn dispatch(
        &self,
        ws_id: &WorkspaceId,
        slot_id: &pideck_protocol::SlotId,
        command: AgentCommand,
    ) -> Result<(), RouteError> {
        let handle = self.registry.adapter_handle(ws_id, slot_id).await?;
        handle.dispatch(command).await?;
        Ok(())
    }
}
