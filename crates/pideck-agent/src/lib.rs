//! AgentAdapter: bridges the black-box agent runtime into
//! committed [`pideck_protocol::Mutation`]s.
//!
//! A bounded `mpsc::channel::<AgentEvent>` carries events out of the
//! agent's own event loop into a bridging task, which translates each
//! event into one or more mutations and commits them through a
//! `pideck_log::LogHandle`.

mod adapter;
mod command;
mod event;
mod mock;
mod session;

pub use adapter::{AgentAdapterConfig, AgentAdapterHandle, AgentAdapterService};
pub use command::AgentCommand;
pub use event::{AgentEvent, MessageDelta};
pub use mock::MockAgentSession;
pub use session::{AgentError, AgentSession, NullSessionStore, SessionStore};
