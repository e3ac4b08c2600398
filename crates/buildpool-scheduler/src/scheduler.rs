//! The scheduler: the set of named pools and the submission entry point.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use buildpool_core::{CoreError, JobRequest};

use crate::config::Config;
use crate::pool::Pool;
use crate::ticket::{Submission, Ticket};

/// Owns every pool. Pools share nothing, including locks.
pub struct Scheduler {
    pools: BTreeMap<String, Arc<Pool>>,
}

impl Scheduler {
    /// Create the pools named in `config`.
    pub fn new(config: &Config) -> Arc<Self> {
        let pools = config
            .pools
            .iter()
            .map(|name| {
                let pool = Pool::new(
                    name.clone(),
                    config.retry_policy,
                    config.report_channel_capacity,
                );
                (name.clone(), pool)
            })
            .collect::<BTreeMap<_, _>>();

        info!(
            pools = ?pools.keys().collect::<Vec<_>>(),
            retry_policy = ?config.retry_policy,
            "Scheduler created"
        );

        Arc::new(Self { pools })
    }

    /// Pool names in a stable order.
    pub fn pool_names(&self) -> Vec<String> {
        self.pools.keys().cloned().collect()
    }

    pub fn pools(&self) -> impl Iterator<Item = &Arc<Pool>> {
        self.pools.values()
    }

    /// Look up a pool; the error carries the names that do exist.
    pub fn pool(&self, name: &str) -> Result<Arc<Pool>, CoreError> {
        self.pools
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::PoolNotFound {
                name: name.to_string(),
                candidates: self.pool_names(),
            })
    }

    /// A submission capability bound to this scheduler.
    pub fn submission(self: &Arc<Self>) -> Submission {
        Submission::new(self.clone())
    }

    /// Validate, admit and queue a build.
    ///
    /// Admission is fully resolved here: a bad request or an unknown pool
    /// fails before the caller is handed anything.
    pub fn submit(&self, request: JobRequest) -> Result<Ticket, CoreError> {
        request.validate()?;
        let pool = self.pool(&request.pool)?;
        let job = pool.submit(request)?;
        Ok(Ticket::new(job))
    }
}
