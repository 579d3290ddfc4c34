use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use pideck_agent::{
    AgentAdapterService, AgentCommand, AgentError, AgentEvent, AgentSession, MockAgentSession, NullSessionStore,
};
use pideck_log::{LogConfig, LogService};
use pideck_protocol::{Mutation, PendingUi, PendingUiKind, SlotId, WorkspaceId};
use pideck_state::StateModel;
use pideck_store::PersistentStore;

/// An `AgentSession` double that does nothing but forward whatever events
/// the test pushes onto its channel, for exercising adapter-side event
/// handling without the full turn machinery `MockAgentSession` drives.
struct ScriptedAgentSession {
    events_rx: Option<mpsc::Receiver<AgentEvent>>,
}

#[async_trait]
impl AgentSession for ScriptedAgentSession {
    fn take_events(&mut self) -> mpsc::Receiver<AgentEvent> {
        self.events_rx.take().expect("take_events called twice")
    }

    async fn dispatch(&mut self, _command: AgentCommand) -> Result<(), AgentError> {
        Ok(())
    }
}

async fn open_workspace(log: &pideck_log::LogHandle, ws_id: &WorkspaceId) {
    log.commit(
        Some(ws_id.clone()),
        Mutation::WorkspaceCreate {
            ws_id: ws_id.clone(),
            path: "/tmp/ws".to_string(),
        },
    )
    .await
    .unwrap();
    log.commit(
        Some(ws_id.clone()),
        Mutation::SlotCreate {
            ws_id: ws_id.clone(),
            slot_id: SlotId::from("default"),
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn send_prompt_streams_through_to_committed_deltas() {
    let (service, log) = LogService::new(
        StateModel::new(),
        PersistentStore::open_in_memory().unwrap(),
        LogConfig::default(),
    );
    tokio::spawn(service.run());

    let ws_id = WorkspaceId("ws-1".to_string());
    let slot_id = SlotId::from("default");
    open_workspace(&log, &ws_id).await;

    let mut deltas = log.subscribe();
    let adapter = AgentAdapterService::spawn(
        ws_id.clone(),
        slot_id.clone(),
        Box::new(MockAgentSession::new()),
        log.clone(),
        Arc::new(NullSessionStore),
    );

    adapter
        .dispatch(AgentCommand::SendPrompt {
            text: "hello".to_string(),
            images: Vec::new(),
        })
        .await
        .unwrap();

    let mut saw_streaming_true = false;
    let mut saw_streaming_false = false;
    let mut saw_message_append = false;

    for _ in 0..32 {
        let delta = tokio::time::timeout(Duration::from_secs(1), deltas.recv())
            .await
            .expect("delta within timeout")
            .unwrap();
        match delta.mutation {
            Mutation::SlotUpdate { patch, .. } if patch.is_streaming == Some(true) => {
                saw_streaming_true = true
            }
            Mutation::SlotUpdate { patch, .. } if patch.is_streaming == Some(false) => {
                saw_streaming_false = true;
                break;
            }
            Mutation::MessagesAppend { .. } => saw_message_append = true,
            _ => {}
        }
    }

    assert!(saw_streaming_true, "expected agentStart to flip isStreaming on");
    assert!(saw_message_append, "expected a MessagesAppend for the placeholder message");
    assert!(saw_streaming_false, "expected agentEnd to flip isStreaming off");

    let (version, state) = log.current().await.unwrap();
    let slot = &state.workspaces[&ws_id].slots[&slot_id];
    assert!(!slot.is_streaming);
    assert!(version > 0);
}

#[tokio::test]
async fn abort_and_wait_resolves_once_agent_end_is_committed() {
    let (service, log) = LogService::new(
        StateModel::new(),
        PersistentStore::open_in_memory().unwrap(),
        LogConfig::default(),
    );
    tokio::spawn(service.run());

    let ws_id = WorkspaceId("ws-1".to_string());
    let slot_id = SlotId::from("default");
    open_workspace(&log, &ws_id).await;

    let adapter = AgentAdapterService::spawn(
        ws_id,
        slot_id,
        Box::new(MockAgentSession::new()),
        log.clone(),
        Arc::new(NullSessionStore),
    );

    tokio::time::timeout(Duration::from_secs(2), adapter.abort_and_wait())
        .await
        .expect("abort_and_wait should not hang")
        .unwrap();
}

#[tokio::test]
async fn follow_up_queued_during_idle_is_flushed_and_drains_the_queue() {
    let (service, log) = LogService::new(
        StateModel::new(),
        PersistentStore::open_in_memory().unwrap(),
        LogConfig::default(),
    );
    tokio::spawn(service.run());

    let ws_id = WorkspaceId("ws-1".to_string());
    let slot_id = SlotId::from("default");
    open_workspace(&log, &ws_id).await;

    let mut deltas = log.subscribe();
    let adapter = AgentAdapterService::spawn(
        ws_id.clone(),
        slot_id.clone(),
        Box::new(MockAgentSession::new()),
        log.clone(),
        Arc::new(NullSessionStore),
    );

    adapter
        .dispatch(AgentCommand::FollowUp { text: "do the next thing".to_string() })
        .await
        .unwrap();

    // Queuing alone commits a QueuedMessagesUpdate; it must not start a turn.
    let queued_delta = tokio::time::timeout(Duration::from_secs(1), deltas.recv())
        .await
        .expect("queued delta within timeout")
        .unwrap();
    match queued_delta.mutation {
        Mutation::QueuedMessagesUpdate { follow_up, .. } => {
            assert_eq!(follow_up, vec!["do the next thing".to_string()]);
        }
        other => panic!("expected QueuedMessagesUpdate, got {other:?}"),
    }

    let (_, state) = log.current().await.unwrap();
    let slot = &state.workspaces[&ws_id].slots[&slot_id];
    assert!(!slot.is_streaming, "a queued followUp must not itself start a turn");
    assert_eq!(slot.queued_messages.follow_up, vec!["do the next thing".to_string()]);

    // Driving a real prompt through causes agentEnd to flush the queued
    // follow-up as its own subsequent turn.
    adapter
        .dispatch(AgentCommand::SendPrompt { text: "hi".to_string(), images: Vec::new() })
        .await
        .unwrap();

    let mut agent_end_count = 0;
    let mut saw_drain = false;
    for _ in 0..64 {
        let delta = tokio::time::timeout(Duration::from_secs(1), deltas.recv())
            .await
            .expect("delta within timeout")
            .unwrap();
        match delta.mutation {
            Mutation::SlotUpdate { patch, .. } if patch.is_streaming == Some(false) => {
                agent_end_count += 1;
                if agent_end_count == 2 {
                    break;
                }
            }
            Mutation::QueuedMessagesUpdate { follow_up, .. } if follow_up.is_empty() => {
                saw_drain = true;
            }
            _ => {}
        }
    }

    assert_eq!(agent_end_count, 2, "expected the original turn plus the flushed follow-up turn");
    assert!(saw_drain, "expected the follow-up queue to be cleared once flushed");

    let (_, state) = log.current().await.unwrap();
    let slot = &state.workspaces[&ws_id].slots[&slot_id];
    assert!(slot.queued_messages.follow_up.is_empty());
}

#[tokio::test]
async fn steer_sent_while_idle_is_queued_not_forwarded_immediately() {
    let (service, log) = LogService::new(
        StateModel::new(),
        PersistentStore::open_in_memory().unwrap(),
        LogConfig::default(),
    );
    tokio::spawn(service.run());

    let ws_id = WorkspaceId("ws-1".to_string());
    let slot_id = SlotId::from("default");
    open_workspace(&log, &ws_id).await;

    let mut deltas = log.subscribe();
    let adapter = AgentAdapterService::spawn(
        ws_id.clone(),
        slot_id.clone(),
        Box::new(MockAgentSession::new()),
        log.clone(),
        Arc::new(NullSessionStore),
    );

    adapter
        .dispatch(AgentCommand::Steer { text: "nudge".to_string() })
        .await
        .unwrap();

    let delta = tokio::time::timeout(Duration::from_secs(1), deltas.recv())
        .await
        .expect("queued delta within timeout")
        .unwrap();
    assert!(
        matches!(delta.mutation, Mutation::QueuedMessagesUpdate { .. }),
        "an idle steer must only enqueue, not start a turn"
    );

    let (_, state) = log.current().await.unwrap();
    let slot = &state.workspaces[&ws_id].slots[&slot_id];
    assert!(!slot.is_streaming);
    assert_eq!(slot.queued_messages.steering, vec!["nudge".to_string()]);
}

#[tokio::test]
async fn a_second_pending_ui_while_one_is_open_is_rejected_by_the_state_model() {
    let (service, log) = LogService::new(
        StateModel::new(),
        PersistentStore::open_in_memory().unwrap(),
        LogConfig::default(),
    );
    tokio::spawn(service.run());

    let ws_id = WorkspaceId("ws-1".to_string());
    let slot_id = SlotId::from("default");
    open_workspace(&log, &ws_id).await;

    let (events_tx, events_rx) = mpsc::channel(8);
    let session = ScriptedAgentSession { events_rx: Some(events_rx) };
    let _adapter = AgentAdapterService::spawn(
        ws_id.clone(),
        slot_id.clone(),
        Box::new(session),
        log.clone(),
        Arc::new(NullSessionStore),
    );

    let mut deltas = log.subscribe();

    events_tx
        .send(AgentEvent::PendingUiRequested(PendingUi {
            id: "q1".into(),
            kind: PendingUiKind::Questionnaire,
            data: serde_json::json!({}),
        }))
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), deltas.recv())
        .await
        .expect("first pendingUiSet delta within timeout")
        .unwrap();
    assert!(matches!(first.mutation, Mutation::PendingUiSet { pending_ui: Some(_), .. }));

    // The adapter has no local gate anymore; the second request reaches
    // `commit()` and it is `StateModel::apply`'s own `PendingUiConflict`
    // check that must refuse it.
    events_tx
        .send(AgentEvent::PendingUiRequested(PendingUi {
            id: "q2".into(),
            kind: PendingUiKind::Confirmation,
            data: serde_json::json!({}),
        }))
        .await
        .unwrap();

    // Give the adapter a beat to process the rejected commit; no further
    // delta should ever arrive for it.
    let no_second_delta = tokio::time::timeout(Duration::from_millis(300), deltas.recv()).await;
    assert!(no_second_delta.is_err(), "a conflicting pendingUI must not produce a second delta");

    let (_, state) = log.current().await.unwrap();
    let pending = state.workspaces[&ws_id].slots[&slot_id].pending_ui.clone().unwrap();
    assert_eq!(pending.id, "q1", "the first pendingUI must survive the rejected second request");
}
