//! Long-running maintenance tasks spawned by the service binary.

pub mod event_log;
pub mod rate_limit_purge;
pub mod stale_sweeper;
