use async_trait::async_trait;
use tokio::sync::mpsc;

use pideck_protocol::{ContentPart, Message, MessageRole};

use crate::command::AgentCommand;
use crate::event::{AgentEvent, MessageDelta};
use crate::session::{AgentError, AgentSession};

/// A deterministic stand-in for the real agent runtime. `SendPrompt`/`Steer`/`FollowUp` each echo the input
/// text back as a streamed assistant message, split into two deltas so
/// tests can observe the streaming path without timing races.
pub struct MockAgentSession {
    events_tx: Option<mpsc::Sender<AgentEvent>>,
    next_message_id: u64,
}

impl Default for MockAgentSession {
    fn default() -> Self {
        Self {
            events_tx: None,
            next_message_id: 0,
        }
    }
}

impl MockAgentSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events_tx {
            let _ = tx.try_send(event);
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_message_id += 1;
        format!("{prefix}-{}", self.next_message_id)
    }

    fn run_turn(&mut self, text: String) {
        // The user's own turn is finalized at emission time — there is no
        // streaming phase for input the caller already has in full.
        let user_message = Message {
            id: self.next_id("msg"),
            role: MessageRole::User,
            timestamp: now(),
            content: vec![ContentPart::Text { text: text.clone() }],
        };
        self.emit(AgentEvent::MessageStart(user_message));

        self.emit(AgentEvent::AgentStart);

        let message_id = self.next_id("msg");
        let placeholder = Message {
            id: message_id.clone(),
            role: MessageRole::Assistant,
            timestamp: now(),
            content: Vec::new(),
        };
        self.emit(AgentEvent::MessageStart(placeholder));

        let reply = format!("echo: {text}");
        let (head, tail) = reply.split_at(reply.len() / 2 + reply.len() % 2);
        self.emit(AgentEvent::MessageUpdate {
            message_id: message_id.clone(),
            delta: MessageDelta::Text(head.to_string()),
        });
        self.emit(AgentEvent::MessageUpdate {
            message_id: message_id.clone(),
            delta: MessageDelta::Text(tail.to_string()),
        });

        let finished = Message {
            id: message_id,
            role: MessageRole::Assistant,
            timestamp: now(),
            content: vec![ContentPart::Text { text: reply }],
        };
        self.emit(AgentEvent::MessageEnd(finished));
        self.emit(AgentEvent::AgentEnd);
    }
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

#[async_trait]
impl AgentSession for MockAgentSession {
    fn take_events(&mut self) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(256);
        self.events_tx = Some(tx);
        rx
    }

    async fn dispatch(&mut self, command: AgentCommand) -> Result<(), AgentError> {
        match command {
            AgentCommand::SendPrompt { text, .. }
            | AgentCommand::Steer { text }
            | AgentCommand::FollowUp { text } => {
                self.run_turn(text);
                Ok(())
            }
            AgentCommand::Abort => {
                self.emit(AgentEvent::AgentEnd);
                Ok(())
            }
            AgentCommand::Compact { .. } => {
                self.emit(AgentEvent::CompactionStart);
                self.emit(AgentEvent::CompactionEnd {
                    summary: "mock compaction".to_string(),
                });
                Ok(())
            }
            AgentCommand::SetModel { .. }
            | AgentCommand::SetThinkingLevel(_)
            | AgentCommand::NewSession
            | AgentCommand::SwitchSession { .. }
            | AgentCommand::Fork { .. }
            | AgentCommand::Bash { .. }
            | AgentCommand::AbortBash
            | AgentCommand::RespondToPendingUi { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_prompt_streams_a_start_delta_end_sequence() {
        let mut session = MockAgentSession::new();
        let mut events = session.take_events();

        session
            .dispatch(AgentCommand::SendPrompt {
                text: "hi".to_string(),
                images: Vec::new(),
            })
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(ev) = events.try_recv() {
            seen.push(ev);
        }
        // The user's own turn is finalized immediately, then the assistant
        // turn starts.
        assert!(matches!(seen[0], AgentEvent::MessageStart(_)));
        assert!(matches!(seen[1], AgentEvent::AgentStart));
        assert!(matches!(seen.last().unwrap(), AgentEvent::AgentEnd));
        assert!(seen
            .iter()
            .any(|e| matches!(e, AgentEvent::MessageUpdate { .. })));
    }
}
