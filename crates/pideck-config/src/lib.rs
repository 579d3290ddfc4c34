//! Layered configuration for the Pi-Deck realtime state hub.
//!
//! Lowest-to-highest-priority YAML layers are deep-merged with
//! `serde_yaml`, with an explicit `--config` path layered on top, and
//! environment variable overrides (`PIDECK_LISTEN`, `PIDECK_STATE_DIR`,
//! `PIDECK_ALLOWED_ROOTS`) applied last for container-style deployment.

mod loader;
mod schema;

pub use loader::load;
pub use schema::{Config, LogTuning, SyncTuning};
