//! Full-stack rehearsal of "open, prompt, stream, end", driven through the
//! same public surface `src/main.rs` wires together: `ClientSession` over
//! an in-memory transport, routing through `CommandRouter`/
//! `WorkspaceRegistry`, backed by `LogService` and a `MockAgentSession`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use pideck_log::{LogConfig, LogHandle, LogService};
use pideck_protocol::{decode, encode, ClientMessage, Mutation, ServerMessage, SlotId};
use pideck_state::StateModel;
use pideck_store::PersistentStore;
use pideck_sync::{ClientSession, ClientTransport, CommandRouter, SyncConfig};
use pideck_workspace::{MockAgentSessionFactory, WorkspaceRegistry};

struct ChannelTransport {
    inbound: mpsc::Receiver<String>,
    outbound: mpsc::Sender<String>,
}

#[async_trait]
impl ClientTransport for ChannelTransport {
    async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    async fn send(&mut self, text: String) -> bool {
        self.outbound.send(text).await.is_ok()
    }
}

struct Harness {
    to_server: mpsc::Sender<String>,
    from_server: mpsc::Receiver<String>,
}

impl Harness {
    async fn send(&self, message: ClientMessage) {
        self.to_server.send(encode(&message).unwrap()).await.unwrap();
    }

    async fn recv(&mut self) -> ServerMessage {
        let raw = timeout(Duration::from_secs(2), self.from_server.recv())
            .await
            .expect("timed out waiting for a server message")
            .expect("server closed the connection");
        decode(&raw).unwrap()
    }
}

fn start_log() -> LogHandle {
    let (service, log) = LogService::new(
        StateModel::new(),
        PersistentStore::open_in_memory().unwrap(),
        LogConfig::default(),
    );
    tokio::spawn(service.run());
    log
}

fn spawn_session(log: LogHandle) -> Harness {
    let registry = Arc::new(WorkspaceRegistry::new(log.clone(), Vec::new(), Arc::new(MockAgentSessionFactory)));
    let router = Arc::new(CommandRouter::new(registry));

    let (to_server, server_inbound) = mpsc::channel(64);
    let (server_outbound, from_server) = mpsc::channel(64);
    let transport = ChannelTransport {
        inbound: server_inbound,
        outbound: server_outbound,
    };

    let session = ClientSession::new(transport, log, router, SyncConfig::default());
    tokio::spawn(session.run());

    Harness { to_server, from_server }
}

/// Walks through the full open/prompt/stream/end flow: open a workspace, send a
/// prompt, and observe the streamed assistant turn arrive as a
/// version-consecutive run of deltas ending with `isStreaming: false`.
#[tokio::test]
async fn open_prompt_stream_end() {
    let log = start_log();
    let mut harness = spawn_session(log);
    let dir = tempfile::tempdir().unwrap();

    harness
        .send(ClientMessage::Hello {
            client_id: Some("tab-1".into()),
            resume_from_version: None,
        })
        .await;
    assert!(matches!(harness.recv().await, ServerMessage::Snapshot { version: 0, .. }));

    harness
        .send(ClientMessage::OpenWorkspace {
            path: dir.path().to_str().unwrap().to_string(),
        })
        .await;

    let ws_id = match harness.recv().await {
        ServerMessage::Delta { version: 1, mutation: Mutation::WorkspaceCreate { ws_id, .. } } => ws_id,
        other => panic!("expected delta 1 to be WorkspaceCreate, got {other:?}"),
    };
    match harness.recv().await {
        ServerMessage::Delta { version: 2, mutation: Mutation::SlotCreate { .. } } => {}
        other => panic!("expected delta 2 to be SlotCreate, got {other:?}"),
    }

    harness
        .send(ClientMessage::Prompt {
            workspace_id: ws_id,
            slot_id: SlotId::from("default"),
            message: "hi".to_string(),
            images: Vec::new(),
        })
        .await;

    // MessagesAppend (user turn), SlotUpdate{isStreaming:true}, then the
    // assistant placeholder/stream/finalize run, ending with
    // isStreaming:false. Versions must be consecutive starting at 3.
    let mut next_version = 3u64;
    let mut saw_user_message = false;
    let mut saw_streaming_true = false;
    let mut saw_streaming_delta = false;
    let mut saw_streaming_false = false;

    loop {
        let reply = harness.recv().await;
        let (version, mutation) = match reply {
            ServerMessage::Delta { version, mutation } => (version, mutation),
            other => panic!("expected a Delta, got {other:?}"),
        };
        assert_eq!(version, next_version, "versions must be gap-free");
        next_version += 1;

        match mutation {
            Mutation::MessagesAppend { .. } => saw_user_message = true,
            Mutation::SlotUpdate { patch, .. } => {
                if patch.is_streaming == Some(true) {
                    saw_streaming_true = true;
                }
                if patch.is_streaming == Some(false) {
                    saw_streaming_false = true;
                    break;
                }
            }
            Mutation::StreamingDelta { .. } => saw_streaming_delta = true,
            _ => {}
        }
    }

    assert!(saw_user_message, "the user's prompt must be appended as a message");
    assert!(saw_streaming_true, "isStreaming must flip true when the turn starts");
    assert!(saw_streaming_delta, "the assistant reply must stream incrementally");
    assert!(saw_streaming_false, "isStreaming must flip back to false when the turn ends");
}

/// A brand-new client with no resume point gets a full `Snapshot` even
/// once the log already has history, never a `DeltaBatch`.
#[tokio::test]
async fn first_connect_with_no_resume_point_gets_a_snapshot() {
    let log = start_log();

    log.commit(
        None,
        Mutation::WorkspaceCreate {
            ws_id: pideck_protocol::WorkspaceId("ws-1".into()),
            path: "/tmp/ws-1".into(),
        },
    )
    .await
    .unwrap();

    let mut harness = spawn_session(log);
    harness
        .send(ClientMessage::Hello {
            client_id: Some("tab-1".into()),
            resume_from_version: None,
        })
        .await;

    match harness.recv().await {
        ServerMessage::Snapshot { version, .. } => assert_eq!(version, 1),
        other => panic!("expected a Snapshot, got {other:?}"),
    }
}
