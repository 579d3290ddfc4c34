//! WorkspaceRegistry: the process-wide owner of every open
//! workspace and its slots.
//!
//! One process hosts many independently-addressable workspaces and
//! slots, each backed by a `HashMap`-keyed lookup table for registry
//! bookkeeping.

mod provider;
mod registry;
mod sessions;

pub use provider::{NullPlansJobsProvider, PlansJobsEvent, PlansJobsProvider};
pub use registry::{AgentSessionFactory, MockAgentSessionFactory, WorkspaceError, WorkspaceRegistry};
pub use sessions::{filter_live_sessions, FilteredSessionStore};
