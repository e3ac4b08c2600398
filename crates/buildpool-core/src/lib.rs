//! buildpool core domain types
//!
//! This crate contains pure domain types with no dependencies on:
//! - HTTP or any other transport
//! - The async runtime
//! - Process execution
//!
//! Everything the scheduler, the workers and the clients exchange is
//! defined here.

pub mod action;
pub mod api;
pub mod error;
pub mod ids;
pub mod status;
pub mod worker;

// Re-export commonly used types
pub use action::{BuildAction, BuildOptions, DockerfileSource, GitSource, JobRequest, PushTarget};
pub use error::{CoreError, JobError, JobOutcome};
pub use ids::{CapId, JobId};
pub use status::{JobStatus, Priority};
pub use worker::{WorkerInfo, WorkerSummary};
