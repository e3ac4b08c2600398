//! HTTP request handlers.

mod health;
mod jobs;
mod pools;

pub use health::{health_check, metrics_handler};
pub use jobs::{cancel_job, job_log, job_result, job_status, redeem_ticket, release_cap, submit};
pub use pools::{
    dump_pool, list_pools, list_unassignable, list_workers, set_worker_active, update_worker,
};
