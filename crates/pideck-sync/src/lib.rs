//! SyncHub: the per-client WebSocket session state machine.
//!
//! A `tokio::select!` loop races the socket against a
//! `broadcast::Receiver`, with `Lagged(n)` driving catch-up or
//! disconnect, over a per-client cursor into `pideck-log`'s versioned
//! deltas. Commands route across many `(workspaceId, slotId)` pairs via
//! [`pideck_workspace::WorkspaceRegistry`].

mod router;
mod session;
mod transport;

pub use router::{CommandRouter, RouteError};
pub use session::{ClientSession, SyncConfig};
pub use transport::ClientTransport;
