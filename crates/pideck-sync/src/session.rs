use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use pideck_log::LogHandle;
use pideck_protocol::{decode, encode, ClientMessage, Delta, ServerMessage};

use crate::router::CommandRouter;
use crate::transport::ClientTransport;

/// Outbound-queue thresholds plus the batch size used for catch-up
/// reads. Live streaming pauses once either threshold is hit — delta count
/// or accumulated wire bytes since the client's last ack — and only resumes
/// once both are back under bound.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub client_queue_max_deltas: u64,
    pub client_queue_max_bytes: u64,
    pub catch_up_batch_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_queue_max_deltas: 10_000,
            client_queue_max_bytes: 64 * 1024 * 1024,
            catch_up_batch_limit: 500,
        }
    }
}

/// One browser tab's WebSocket session. Owns its own
/// `lastSentVersion`/`lastAckedVersion` cursor even if another tab shares the
/// same `clientId` — sessions are never merged.
pub struct ClientSession<T: ClientTransport> {
    transport: T,
    log: LogHandle,
    router: Arc<CommandRouter>,
    config: SyncConfig,
    client_id: String,
    last_sent_version: u64,
    last_acked_version: u64,
    live_paused: bool,
    /// Wire bytes sent for each not-yet-acked version (or batch, keyed by its
    /// highest version), oldest first — lets an `Ack` release exactly the
    /// bytes it covers instead of just a version count.
    unacked_bytes_by_version: VecDeque<(u64, u64)>,
    unacked_bytes: u64,
}

impl<T: ClientTransport> ClientSession<T> {
    pub fn new(transport: T, log: LogHandle, router: Arc<CommandRouter>, config: SyncConfig) -> Self {
        Self {
            transport,
            log,
            router,
            config,
            client_id: String::new(),
            last_sent_version: 0,
            last_acked_version: 0,
            live_paused: false,
            unacked_bytes_by_version: VecDeque::new(),
            unacked_bytes: 0,
        }
    }

    /// Drive the session to completion: handshake, catch-up, then live
    /// streaming + command routing until the transport closes or the client
    /// is dropped for being too slow.
    pub async fn run(mut self) {
        // Subscribe before reading any catch-up state, so no commit that
        // lands between "read current version" and "subscribe" is lost.
        let mut live_rx = self.log.subscribe();

        let hello = match self.transport.recv().await {
            Some(raw) => raw,
            None => return,
        };
        let hello = match decode::<ClientMessage>(&hello) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(%err, "first frame was not a valid envelope");
                self.send_error("bad_request", &err.to_string(), None).await;
                return;
            }
        };
        let (client_id, resume_from) = match hello {
            ClientMessage::Hello { client_id, resume_from_version } => (client_id, resume_from_version),
            _ => {
                self.send_error("protocol_violation", "expected Hello as the first message", None)
                    .await;
                return;
            }
        };
        self.client_id = client_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if !self.catch_up(resume_from).await {
            return;
        }

        info!(client_id = %self.client_id, version = self.last_sent_version, "client caught up, entering live mode");
        self.live_loop(live_rx).await;
    }

    /// Step 1 of the per-client flow: snapshot vs. `DeltaBatch` catch-up.
    /// Returns `false` if the session should end (send failed or client
    /// asked for something the router rejected outright).
    async fn catch_up(&mut self, resume_from_version: Option<u64>) -> bool {
        let min_retained = match self.log.min_delta_version().await {
            Ok(v) => v,
            Err(err) => {
                self.send_error("internal_error", &err.to_string(), None).await;
                return false;
            }
        };

        let needs_snapshot = match (resume_from_version, min_retained) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(resume), Some(min_v)) => resume + 1 < min_v,
        };

        if needs_snapshot {
            let (version, state) = match self.log.current().await {
                Ok(v) => v,
                Err(err) => {
                    self.send_error("internal_error", &err.to_string(), None).await;
                    return false;
                }
            };
            self.last_sent_version = version;
            self.send(ServerMessage::Snapshot { version, state }).await
        } else {
            let from = resume_from_version.unwrap_or(0);
            let (version, _) = match self.log.current().await {
                Ok(v) => v,
                Err(err) => {
                    self.send_error("internal_error", &err.to_string(), None).await;
                    return false;
                }
            };
            if version <= from {
                self.last_sent_version = from;
                return true;
            }
            match self.send_catch_up_batch(from, version).await {
                Ok(()) => true,
                Err(()) => false,
            }
        }
    }

    /// Sends `DeltaBatch`es from `(from+1)..=up_to`, one batch per
    /// `catch_up_batch_limit` deltas.
    async fn send_catch_up_batch(&mut self, from: u64, up_to: u64) -> Result<(), ()> {
        let mut cursor = from;
        while cursor < up_to {
            let deltas = self
                .log
                .deltas_since(cursor, self.config.catch_up_batch_limit)
                .await
                .map_err(|err| {
                    warn!(client_id = %self.client_id, %err, "failed reading catch-up deltas");
                })?;
            if deltas.is_empty() {
                break;
            }
            cursor = deltas.last().map(|d| d.version).unwrap_or(cursor);
            self.last_sent_version = cursor;
            let message = ServerMessage::DeltaBatch { deltas };
            let bytes = encode(&message).map(|raw| raw.len() as u64).unwrap_or(0);
            self.record_sent_bytes(cursor, bytes);
            if !self.send(message).await {
                return Err(());
            }
        }
        Ok(())
    }

    async fn live_loop(&mut self, mut live_rx: broadcast::Receiver<Delta>) {
        loop {
            if self.live_paused {
                if self.queue_depth() < self.config.client_queue_max_deltas
                    && self.queue_bytes() < self.config.client_queue_max_bytes
                {
                    self.live_paused = false;
                    debug!(client_id = %self.client_id, "resuming live streaming after ack caught up");
                } else {
                    // Only listen for inbound frames while paused; the
                    // client must ack before we resume forwarding deltas.
                    match self.transport.recv().await {
                        Some(raw) => {
                            if !self.handle_inbound(&raw).await {
                                return;
                            }
                        }
                        None => return,
                    }
                    continue;
                }
            }

            tokio::select! {
                inbound = self.transport.recv() => {
                    match inbound {
                        Some(raw) => {
                            if !self.handle_inbound(&raw).await {
                                return;
                            }
                        }
                        None => {
                            debug!(client_id = %self.client_id, "transport closed");
                            return;
                        }
                    }
                }
                delta = live_rx.recv() => {
                    match delta {
                        Ok(delta) => {
                            if delta.version <= self.last_sent_version {
                                continue;
                            }
                            self.last_sent_version = delta.version;
                            let message = ServerMessage::Delta { version: delta.version, mutation: delta.mutation };
                            let bytes = encode(&message).map(|raw| raw.len() as u64).unwrap_or(0);
                            self.record_sent_bytes(delta.version, bytes);
                            if !self.send(message).await {
                                return;
                            }
                            if self.queue_depth() >= self.config.client_queue_max_deltas
                                || self.queue_bytes() >= self.config.client_queue_max_bytes
                            {
                                self.live_paused = true;
                                debug!(
                                    client_id = %self.client_id,
                                    queue_bytes = self.queue_bytes(),
                                    "pausing live streaming; client is falling behind"
                                );
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            if (n as usize) > self.config.catch_up_batch_limit * 4 {
                                warn!(client_id = %self.client_id, missed = n, "client too slow, disconnecting");
                                self.send_error("client_too_slow", "outbound queue exceeded its limit", None).await;
                                return;
                            }
                            let current_version = match self.log.current().await {
                                Ok((v, _)) => v,
                                Err(_) => return,
                            };
                            if self.send_catch_up_batch(self.last_sent_version, current_version).await.is_err() {
                                return;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!(client_id = %self.client_id, "versioned log shut down");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn queue_depth(&self) -> u64 {
        self.last_sent_version.saturating_sub(self.last_acked_version)
    }

    fn queue_bytes(&self) -> u64 {
        self.unacked_bytes
    }

    fn record_sent_bytes(&mut self, up_to_version: u64, bytes: u64) {
        self.unacked_bytes_by_version.push_back((up_to_version, bytes));
        self.unacked_bytes += bytes;
    }

    /// Releases the bytes of every sent entry whose version is now covered
    /// by `acked_version`.
    fn release_acked_bytes(&mut self, acked_version: u64) {
        while let Some(&(version, bytes)) = self.unacked_bytes_by_version.front() {
            if version > acked_version {
                break;
            }
            self.unacked_bytes_by_version.pop_front();
            self.unacked_bytes = self.unacked_bytes.saturating_sub(bytes);
        }
    }

    /// Handle one inbound frame (`Ack` or a routable command). Returns
    /// `false` if the session should end.
    async fn handle_inbound(&mut self, raw: &str) -> bool {
        let message = match decode::<ClientMessage>(raw) {
            Ok(m) => m,
            Err(err) => {
                self.send_error("bad_request", &err.to_string(), None).await;
                return true;
            }
        };

        match message {
            ClientMessage::Hello { .. } => {
                self.send_error("protocol_violation", "unexpected Hello after handshake", None)
                    .await
            }
            ClientMessage::Ack { version } => {
                self.last_acked_version = self.last_acked_version.max(version);
                self.release_acked_bytes(self.last_acked_version);
                if let Err(err) = self.log.client_ack(self.client_id.clone(), self.last_acked_version).await {
                    warn!(client_id = %self.client_id, %err, "failed to persist client ack");
                }
                true
            }
            other => {
                let ws_id = workspace_id_of(&other);
                if let Err(err) = self.router.route(other).await {
                    self.send_error(err.code(), &err.to_string(), err.workspace_id().or(ws_id))
                        .await
                } else {
                    true
                }
            }
        }
    }

    /// Sends a message; returns `false` (and logs) if the transport is gone.
    async fn send(&mut self, message: ServerMessage) -> bool {
        let raw = match encode(&message) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(client_id = %self.client_id, %err, "failed to encode outbound message");
                return true;
            }
        };
        if !self.transport.send(raw).await {
            debug!(client_id = %self.client_id, "transport rejected send, ending session");
            return false;
        }
        true
    }

    async fn send_error(&mut self, code: &str, message: &str, workspace_id: Option<pideck_protocol::WorkspaceId>) -> bool {
        let msg = match workspace_id {
            Some(id) => ServerMessage::error_for(code, message, id),
            None => ServerMessage::error(code, message),
        };
        self.send(msg).await
    }
}

fn workspace_id_of(message: &ClientMessage) -> Option<pideck_protocol::WorkspaceId> {
    use ClientMessage::*;
    match message {
        CloseWorkspace { workspace_id }
        | Prompt { workspace_id, .. }
        | Steer { workspace_id, .. }
        | FollowUp { workspace_id, .. }
        | Abort { workspace_id, .. }
        | SetModel { workspace_id, .. }
        | SetThinkingLevel { workspace_id, .. }
        | NewSession { workspace_id, .. }
        | SwitchSession { workspace_id, .. }
        | Compact { workspace_id, .. }
        | Fork { workspace_id, .. }
        | Bash { workspace_id, .. }
        | AbortBash { workspace_id, .. }
        | QuestionnaireResponse { workspace_id, .. }
        | CreateSlot { workspace_id, .. }
        | DeleteSlot { workspace_id, .. } => Some(workspace_id.clone()),
        _ => None,
    }
}
