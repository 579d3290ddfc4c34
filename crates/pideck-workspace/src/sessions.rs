use std::collections::HashSet;
use std::sync::Arc;

use pideck_agent::SessionStore;
use pideck_protocol::{Message, SessionInfo};

/// Drops sessions with no messages whose `sessionFile` is not the current
/// file of any live slot: an empty scratch session some slot once pointed at but
/// has since moved on from is clutter, not history.
pub fn filter_live_sessions(
    sessions: Vec<SessionInfo>,
    live_slot_files: &HashSet<String>,
) -> Vec<SessionInfo> {
    sessions
        .into_iter()
        .filter(|s| s.message_count > 0 || live_slot_files.contains(&s.session_file))
        .collect()
}

/// Wraps a workspace's real [`SessionStore`] with [`filter_live_sessions`],
/// consulting the registry's up-to-date view of which session files are
/// currently open in a slot.
pub struct FilteredSessionStore<F> {
    inner: Arc<dyn SessionStore>,
    live_slot_files: F,
}

impl<F> FilteredSessionStore<F>
where
    F: Fn() -> HashSet<String> + Send + Sync,
{
    pub fn new(inner: Arc<dyn SessionStore>, live_slot_files: F) -> Self {
        Self {
            inner,
            live_slot_files,
        }
    }
}

impl<F> SessionStore for FilteredSessionStore<F>
where
    F: Fn() -> HashSet<String> + Send + Sync,
{
    fn list_sessions(&self) -> Vec<SessionInfo> {
        let live = (self.live_slot_files)();
        filter_live_sessions(self.inner.list_sessions(), &live)
    }

    fn read_messages(&self, session_file: Option<&str>) -> Vec<Message> {
        self.inner.read_messages(session_file)
    }
}
