//! Job event bus for the occlusion tracking service.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`]: one detection job lifecycle change.

pub mod bus;

pub use bus::{EventBus, JobEvent};
