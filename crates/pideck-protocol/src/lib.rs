//! Wire protocol and in-memory data model shared by every component of the
//! Pi-Deck realtime state hub.
//!
//! This crate owns the tagged-union types that cross every seam in the
//! system: the [`GlobalState`] tree, the [`Mutation`] sum type that is both
//! the in-process event and the on-disk/on-wire log unit, the versioned
//! [`Delta`]/[`Snapshot`] envelopes, and the client/server WebSocket message
//! families. Nothing in here talks to a socket or a database — it is pure
//! data plus the schema-versioned codec that (de)serializes it.

mod codec;
mod ids;
mod model;
mod mutation;
mod wire;

pub use codec::{decode, encode, Delta, Envelope, ProtocolError, Snapshot, PROTOCOL_VERSION};
pub use ids::{SlotId, WorkspaceId, DEFAULT_SLOT_ID};
pub use model::{
    ContentPart, DraftInputPatch, GlobalState, Message, MessageRole, PaneUi, PendingUi,
    PendingUiKind, QueuedMessages, SessionInfo, Slot, TabRef, ThinkingLevel, ToolExecution,
    ToolStatus, UiState, UiStatePatch, Workspace,
};
pub use mutation::{Mutation, RejectReason, SlotPatch, StreamChannel};
pub use wire::{ClientMessage, ServerMessage};
