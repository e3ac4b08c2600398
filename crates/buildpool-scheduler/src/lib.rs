//! buildpool scheduling engine
//!
//! Pools, the assignment algorithm, the submission → ticket → job
//! capability chain, job logs, the capability registry and the HTTP
//! surface that exposes all of it.

pub mod caps;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod job;
pub mod log;
pub mod metrics;
pub mod pool;
pub mod scheduler;
pub mod state;
pub mod ticket;

pub use caps::{CapRegistry, Capability, Service, SturdyRef};
pub use config::{Config, RetryPolicy};
pub use dispatch::{Assignment, JobDispatch, JobReporter, OutputStream};
pub use error::SchedulerError;
pub use job::Job;
pub use pool::{Pool, PoolStats, Registration};
pub use scheduler::Scheduler;
pub use state::AppState;
pub use ticket::{Submission, Ticket};
