use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, warn};

use pideck_protocol::{Mutation, QueuedMessages, SlotPatch, SlotId, StreamChannel, ToolExecution, ToolStatus, WorkspaceId};
use pideck_log::LogHandle;

use crate::command::AgentCommand;
use crate::event::{AgentEvent, MessageDelta};
use crate::session::{AgentError, AgentSession, SessionStore};

/// How long `abort_and_wait` waits for the session's `agentEnd` before
/// giving up — a defensive ceiling, not part of the protocol itself.
#[derive(Debug, Clone)]
pub struct AgentAdapterConfig {
    pub abort_timeout: Duration,
}

impl Default for AgentAdapterConfig {
    fn default() -> Self {
        Self {
            abort_timeout: Duration::from_secs(10),
        }
    }
}

/// Cheap-to-clone handle to a running `AgentAdapter`. Held by
/// `WorkspaceRegistry` and, indirectly, by `SyncHub` command routing.
#[derive(Clone)]
pub struct AgentAdapterHandle {
    cmd_tx: mpsc::Sender<(AgentCommand, oneshot::Sender<Result<(), AgentError>>)>,
    agent_end: Arc<Notify>,
}

impl AgentAdapterHandle {
    /// Forward one command to the agent session. Resolves once the session has accepted or synchronously
    /// rejected it; the resulting state change, if any, is only observable
    /// via later committed deltas.
    pub async fn dispatch(&self, command: AgentCommand) -> Result<(), AgentError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send((command, reply))
            .await
            .map_err(|_| AgentError::NotStarted)?;
        rx.await.map_err(|_| AgentError::NotStarted)?
    }

    /// Abort the running turn and wait for `agentEnd` to be committed.
    /// `closeWorkspace` interrupts active streaming rather than waiting
    /// for a turn to finish on its own.
    pub async fn abort_and_wait(&self) -> Result<(), AgentError> {
        self.abort_and_wait_with_timeout(Duration::from_secs(10)).await
    }

    pub async fn abort_and_wait_with_timeout(&self, timeout: Duration) -> Result<(), AgentError> {
        self.dispatch(AgentCommand::Abort).await?;
        tokio::time::timeout(timeout, self.agent_end.notified())
            .await
            .map_err(|_| AgentError::AbortTimedOut)
    }
}

/// The task that owns a single `(workspaceId, slotId)`'s agent session and
/// its event loop.
pub struct AgentAdapterService {
    ws_id: WorkspaceId,
    slot_id: SlotId,
    session: Box<dyn AgentSession>,
    events_rx: mpsc::Receiver<AgentEvent>,
    cmd_rx: mpsc::Receiver<(AgentCommand, oneshot::Sender<Result<(), AgentError>>)>,
    log: LogHandle,
    sessions: Arc<dyn SessionStore>,
    pending_ui_open: bool,
    agent_end: Arc<Notify>,
    is_streaming: bool,
    queued: QueuedMessages,
}

impl AgentAdapterService {
    /// Construct and spawn the adapter task, returning the handle other
    /// components use to talk to it.
    pub fn spawn(
        ws_id: WorkspaceId,
        slot_id: SlotId,
        mut session: Box<dyn AgentSession>,
        log: LogHandle,
        sessions: Arc<dyn SessionStore>,
    ) -> AgentAdapterHandle {
        let events_rx = session.take_events();
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let agent_end = Arc::new(Notify::new());

        let handle = AgentAdapterHandle {
            cmd_tx,
            agent_end: agent_end.clone(),
        };
        let service = Self {
            ws_id,
            slot_id,
            session,
            events_rx,
            cmd_rx,
            log,
            sessions,
            pending_ui_open: false,
            agent_end,
            is_streaming: false,
            queued: QueuedMessages::default(),
        };
        tokio::spawn(service.run());
        handle
    }

    async fn run(mut self) {
        info!(ws_id = %self.ws_id, slot_id = %self.slot_id, "agent adapter started");
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    let Some((command, reply)) = cmd else { break };
                    let result = self.handle_command(command).await;
                    let _ = reply.send(result);
                }
                event = self.events_rx.recv() => {
                    match event {
                        Some(ev) => self.handle_event(ev).await,
                        None => break,
                    }
                }
            }
        }
        info!(ws_id = %self.ws_id, slot_id = %self.slot_id, "agent adapter stopped");
    }

    async fn handle_command(&mut self, command: AgentCommand) -> Result<(), AgentError> {
        // A questionnaire response clears the pending UI
        // immediately, independent of whatever the session itself does with
        // the answer.
        if matches!(command, AgentCommand::RespondToPendingUi { .. }) {
            let _ = self
                .commit(Mutation::PendingUiSet {
                    ws_id: self.ws_id.clone(),
                    slot_id: self.slot_id.clone(),
                    pending_ui: None,
                })
                .await;
            self.pending_ui_open = false;
        }

        // A steer nudges the turn in progress, so it only makes sense to
        // forward it immediately while one is running; otherwise it is
        // queued and flushed to the session the moment the next turn starts.
        // A followUp is always queued — it targets the *next* turn, sent
        // once the current one's `agentEnd` has committed.
        match command {
            AgentCommand::Steer { text } if !self.is_streaming => {
                self.queued.steering.push(text);
                self.commit_queued().await;
                return Ok(());
            }
            AgentCommand::FollowUp { text } => {
                self.queued.follow_up.push(text);
                self.commit_queued().await;
                return Ok(());
            }
            other => self.session.dispatch(other).await,
        }
    }

    async fn commit_queued(&self) {
        self.commit(Mutation::QueuedMessagesUpdate {
            ws_id: self.ws_id.clone(),
            slot_id: self.slot_id.clone(),
            steering: self.queued.steering.clone(),
            follow_up: self.queued.follow_up.clone(),
        })
        .await
        .ok();
    }

    /// Flush queued steering messages into the now-running session — called
    /// right after `agentStart` commits.
    async fn drain_steering(&mut self) {
        if self.queued.steering.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.queued.steering);
        self.commit_queued().await;
        for text in pending {
            if let Err(err) = self.session.dispatch(AgentCommand::Steer { text }).await {
                warn!(ws_id = %self.ws_id, slot_id = %self.slot_id, %err, "failed to flush queued steer");
            }
        }
    }

    /// Flush queued follow-up prompts once the current turn has ended —
    /// called right after `agentEnd` commits.
    async fn drain_follow_up(&mut self) {
        if self.queued.follow_up.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.queued.follow_up);
        self.commit_queued().await;
        for text in pending {
            if let Err(err) = self
                .session
                .dispatch(AgentCommand::SendPrompt { text, images: Vec::new() })
                .await
            {
                warn!(ws_id = %self.ws_id, slot_id = %self.slot_id, %err, "failed to flush queued follow-up");
            }
        }
    }

    async fn handle_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::AgentStart => {
                self.is_streaming = true;
                self.commit(Mutation::SlotUpdate {
                    ws_id: self.ws_id.clone(),
                    slot_id: self.slot_id.clone(),
                    patch: SlotPatch::is_streaming(true),
                })
                .await
                .ok();
                self.clear_streaming().await;
                self.drain_steering().await;
            }
            AgentEvent::AgentEnd => {
                self.is_streaming = false;
                self.commit(Mutation::SlotUpdate {
                    ws_id: self.ws_id.clone(),
                    slot_id: self.slot_id.clone(),
                    patch: SlotPatch::is_streaming(false),
                })
                .await
                .ok();
                self.clear_streaming().await;
                let sessions = self.sessions.list_sessions();
                self.commit(Mutation::SessionsUpdate {
                    ws_id: self.ws_id.clone(),
                    sessions,
                })
                .await
                .ok();
                self.agent_end.notify_waiters();
                self.drain_follow_up().await;
            }
            AgentEvent::MessageStart(message) => {
                self.commit(Mutation::MessagesAppend {
                    ws_id: self.ws_id.clone(),
                    slot_id: self.slot_id.clone(),
                    messages: vec![message],
                })
                .await
                .ok();
            }
            AgentEvent::MessageUpdate { message_id: _, delta } => {
                let (channel, delta) = match delta {
                    MessageDelta::Text(d) => (StreamChannel::Text, d),
                    MessageDelta::Thinking(d) => (StreamChannel::Thinking, d),
                };
                self.commit(Mutation::StreamingDelta {
                    ws_id: self.ws_id.clone(),
                    slot_id: self.slot_id.clone(),
                    channel,
                    delta,
                })
                .await
                .ok();
            }
            AgentEvent::MessageEnd(message) => {
                let patch = SlotPatch {
                    finalize_message: Some(message),
                    ..Default::default()
                };
                self.commit(Mutation::SlotUpdate {
                    ws_id: self.ws_id.clone(),
                    slot_id: self.slot_id.clone(),
                    patch,
                })
                .await
                .ok();
                self.clear_streaming().await;
            }
            AgentEvent::ToolStart { id, name, args } => {
                let execution = ToolExecution {
                    id,
                    name,
                    args,
                    status: ToolStatus::Running,
                    started_at: Utc::now(),
                    partial_result: String::new(),
                };
                self.commit(Mutation::ToolStart {
                    ws_id: self.ws_id.clone(),
                    slot_id: self.slot_id.clone(),
                    execution,
                })
                .await
                .ok();
            }
            AgentEvent::ToolUpdate { id, partial } => {
                self.commit(Mutation::ToolUpdate {
                    ws_id: self.ws_id.clone(),
                    slot_id: self.slot_id.clone(),
                    tool_call_id: id,
                    partial_result: partial,
                })
                .await
                .ok();
            }
            AgentEvent::ToolEnd { id, result, is_error } => {
                self.commit(Mutation::ToolEnd {
                    ws_id: self.ws_id.clone(),
                    slot_id: self.slot_id.clone(),
                    tool_call_id: id,
                    result,
                    is_error,
                })
                .await
                .ok();
            }
            AgentEvent::CompactionStart => {
                self.commit(Mutation::SlotUpdate {
                    ws_id: self.ws_id.clone(),
                    slot_id: self.slot_id.clone(),
                    patch: SlotPatch::is_compacting(true),
                })
                .await
                .ok();
            }
            AgentEvent::CompactionEnd { summary } => {
                debug!(ws_id = %self.ws_id, slot_id = %self.slot_id, %summary, "compaction finished");
                self.commit(Mutation::SlotUpdate {
                    ws_id: self.ws_id.clone(),
                    slot_id: self.slot_id.clone(),
                    patch: SlotPatch::is_compacting(false),
                })
                .await
                .ok();
                let messages = self.sessions.read_messages(None);
                self.commit(Mutation::MessagesReplace {
                    ws_id: self.ws_id.clone(),
                    slot_id: self.slot_id.clone(),
                    messages,
                })
                .await
                .ok();
            }
            AgentEvent::StateChanged => {
                let sessions = self.sessions.list_sessions();
                self.commit(Mutation::SessionsUpdate {
                    ws_id: self.ws_id.clone(),
                    sessions,
                })
                .await
                .ok();
            }
            AgentEvent::PendingUiRequested(pending_ui) => {
                // Don't pre-empt this with a local `pending_ui_open` check: a
                // second pending UI while one is already open is exactly the
                // state-machine violation `StateModel::apply` itself rejects
                // with `RejectReason::PendingUiConflict`. Let it reach
                // `commit()` so that check actually runs, instead of a
                // separate local gate silently swallowing it beforehand.
                if self
                    .commit(Mutation::PendingUiSet {
                        ws_id: self.ws_id.clone(),
                        slot_id: self.slot_id.clone(),
                        pending_ui: Some(pending_ui),
                    })
                    .await
                    .is_ok()
                {
                    self.pending_ui_open = true;
                }
            }
        }
    }

    async fn clear_streaming(&self) {
        self.commit(Mutation::StreamingClear {
            ws_id: self.ws_id.clone(),
            slot_id: self.slot_id.clone(),
        })
        .await
        .ok();
    }

    async fn commit(&self, mutation: Mutation) -> Result<(), ()> {
        match self.log.commit(Some(self.ws_id.clone()), mutation).await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(
                    ws_id = %self.ws_id, slot_id = %self.slot_id, %err,
                    "translated mutation was rejected or failed to commit"
                );
                Err(())
            }
        }
    }
}
