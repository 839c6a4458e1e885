//! Domain types and pure logic for the occlusion tracking service.
//!
//! Nothing in this crate touches storage or the async runtime beyond the
//! [`analysis::Analyzer`] seam; the `db` and `worker` crates build on it.

pub mod analysis;
pub mod annotation;
pub mod error;
pub mod history;
pub mod job_events;
pub mod lifecycle;
pub mod occlusion;
pub mod types;
pub mod upload;
pub mod user;
