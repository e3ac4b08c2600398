//! Capability registry.
//!
//! Two tables: sturdy references (long-lived, resolved by token hash, backed
//! by capability files) and live handles (tickets and jobs, addressed by an
//! opaque [`CapId`] and revoked with [`CapRegistry::release`]).

mod sturdy;
mod token;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use buildpool_core::CapId;

use crate::error::SchedulerError;
use crate::job::Job;
use crate::pool::Pool;
use crate::scheduler::Scheduler;
use crate::ticket::{Submission, Ticket};

pub use sturdy::{Service, SturdyRef};
pub use token::{generate_token, hash_token};

/// Something a token or id grants access to.
#[derive(Clone)]
pub enum Capability {
    Submission(Submission),
    Admin(Arc<Scheduler>),
    Registration(Arc<Pool>),
    Ticket(Ticket),
    Job(Arc<Job>),
}

impl Capability {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Submission(_) => "submission",
            Self::Admin(_) => "admin",
            Self::Registration(_) => "registration",
            Self::Ticket(_) => "ticket",
            Self::Job(_) => "job",
        }
    }

    pub fn into_submission(self) -> Result<Submission, SchedulerError> {
        match self {
            Self::Submission(submission) => Ok(submission),
            _ => Err(SchedulerError::WrongCapabilityKind {
                expected: "submission",
            }),
        }
    }

    pub fn into_admin(self) -> Result<Arc<Scheduler>, SchedulerError> {
        match self {
            Self::Admin(scheduler) => Ok(scheduler),
            _ => Err(SchedulerError::WrongCapabilityKind { expected: "admin" }),
        }
    }

    pub fn into_registration(self) -> Result<Arc<Pool>, SchedulerError> {
        match self {
            Self::Registration(pool) => Ok(pool),
            _ => Err(SchedulerError::WrongCapabilityKind {
                expected: "registration",
            }),
        }
    }

    pub fn into_job(self) -> Result<Arc<Job>, SchedulerError> {
        match self {
            Self::Job(job) => Ok(job),
            _ => Err(SchedulerError::WrongCapabilityKind { expected: "job" }),
        }
    }
}

struct LiveEntry {
    cap: Capability,
    /// For tickets: the job handle already handed out.
    redeemed: Option<CapId>,
}

/// Registry of sturdy references and live handles.
#[derive(Default)]
pub struct CapRegistry {
    /// Sturdy references indexed by token hash.
    sturdy: RwLock<HashMap<String, Capability>>,
    live: RwLock<HashMap<CapId, LiveEntry>>,
}

impl CapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a sturdy reference for `cap`.
    pub async fn issue_sturdy(
        &self,
        url: &str,
        service: Service,
        pool: Option<String>,
        cap: Capability,
    ) -> SturdyRef {
        let (token, token_hash) = generate_token();
        self.sturdy.write().await.insert(token_hash, cap);
        info!(service = ?service, pool = pool.as_deref().unwrap_or("-"), "Sturdy reference issued");
        SturdyRef {
            url: url.to_string(),
            service,
            pool,
            token,
        }
    }

    /// Mint a sturdy reference and write it to `path`.
    pub async fn issue_file(
        &self,
        path: &Path,
        url: &str,
        service: Service,
        pool: Option<String>,
        cap: Capability,
    ) -> Result<SturdyRef, SchedulerError> {
        let sturdy = self.issue_sturdy(url, service, pool, cap).await;
        sturdy.save(path)?;
        debug!(path = %path.display(), "Capability file written");
        Ok(sturdy)
    }

    /// Resolve a bearer token: a sturdy token first, then a live id.
    pub async fn resolve_token(&self, token: &str) -> Result<Capability, SchedulerError> {
        if let Some(cap) = self.sturdy.read().await.get(&hash_token(token)) {
            return Ok(cap.clone());
        }
        self.live(&CapId::new(token)).await
    }

    /// Resolve a capability file written by [`CapRegistry::issue_file`].
    pub async fn resolve_file(&self, path: &Path) -> Result<Capability, SchedulerError> {
        let sturdy = SturdyRef::load(path)?;
        self.resolve_token(&sturdy.token).await
    }

    /// Register a live handle and return its id.
    pub async fn insert_live(&self, cap: Capability) -> CapId {
        let id = CapId::generate();
        debug!(cap_id = %id, kind = cap.kind(), "Live capability created");
        self.live.write().await.insert(
            id.clone(),
            LiveEntry {
                cap,
                redeemed: None,
            },
        );
        id
    }

    pub async fn live(&self, id: &CapId) -> Result<Capability, SchedulerError> {
        self.live
            .read()
            .await
            .get(id)
            .map(|entry| entry.cap.clone())
            .ok_or(SchedulerError::UnknownCapability)
    }

    /// Exchange a ticket for its job handle. Every call for the same ticket
    /// returns the same job id.
    pub async fn redeem_ticket(&self, ticket_id: &CapId) -> Result<CapId, SchedulerError> {
        let mut live = self.live.write().await;
        let entry = live
            .get_mut(ticket_id)
            .ok_or(SchedulerError::UnknownCapability)?;

        if let Some(job_id) = &entry.redeemed {
            return Ok(job_id.clone());
        }
        let job = match &entry.cap {
            Capability::Ticket(ticket) => ticket.job(),
            _ => return Err(SchedulerError::WrongCapabilityKind { expected: "ticket" }),
        };

        let job_cap = CapId::generate();
        entry.redeemed = Some(job_cap.clone());
        debug!(ticket = %ticket_id, cap_id = %job_cap, job_id = %job.id(), "Ticket redeemed");
        live.insert(
            job_cap.clone(),
            LiveEntry {
                cap: Capability::Job(job),
                redeemed: None,
            },
        );
        Ok(job_cap)
    }

    /// Revoke a live handle. Releasing a job handle never cancels the job.
    pub async fn release(&self, id: &CapId) -> bool {
        let removed = self.live.write().await.remove(id);
        match removed {
            Some(entry) => {
                debug!(cap_id = %id, kind = entry.cap.kind(), "Capability released");
                true
            }
            None => {
                warn!(cap_id = %id, "Release of unknown capability");
                false
            }
        }
    }

    /// Number of live handles.
    pub async fn live_count(&self) -> usize {
        self.live.read().await.len()
    }
}
