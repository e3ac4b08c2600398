//! buildpool worker runtime
//!
//! Spawns and supervises build engine processes, translates build requests
//! into engine invocations, and runs a worker's side of pool membership:
//! accepting offers within capacity, draining for self-update and keeping
//! the disk clean.

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod hygiene;
pub mod process;
pub mod queue;

pub use config::{EngineConfig, WorkerConfig};
pub use error::ExecutorError;
pub use executor::{Executor, Finish};
pub use hygiene::{DfProbe, DiskMonitor, FreeSpaceProbe};
pub use process::{CommandSpec, ProcessHandle, ProcessOutput};
pub use queue::{LocalWorker, WorkerLink};
