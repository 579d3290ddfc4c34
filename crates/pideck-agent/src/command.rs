use pideck_protocol::ThinkingLevel;

/// The command contract `WorkspaceRegistry`/`SyncHub` drive an
/// `AgentAdapter` through. The adapter never speculatively
/// mutates state for these — it only forwards them to the agent session and
/// lets the resulting [`crate::AgentEvent`]s drive the translation.
#[derive(Debug, Clone)]
pub enum AgentCommand {
    SendPrompt { text: String, images: Vec<String> },
    Steer { text: String },
    FollowUp { text: String },
    Abort,
    SetModel { provider: String, model_id: String },
    SetThinkingLevel(ThinkingLevel),
    NewSession,
    SwitchSession { session_file: String },
    Compact { instructions: Option<String> },
    Fork { entry_id: String },
    Bash { command: String },
    AbortBash,
    RespondToPendingUi { response: serde_json::Value },
}
