//! A named pool: its workers, its two queues and the assignment algorithm.
//!
//! All pool state sits behind one mutex. Enqueue, assignment, completion,
//! cancellation and worker (de)registration each run as a single critical
//! section, so they are linearized per pool. Separate pools never share a
//! lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use buildpool_core::{
    CoreError, JobError, JobId, JobOutcome, JobRequest, JobStatus, Priority, WorkerInfo,
    WorkerSummary,
};

use crate::config::RetryPolicy;
use crate::dispatch::{pump_reports, Assignment, JobDispatch, JobReporter};
use crate::job::Job;

/// A registered worker as the pool tracks it.
struct WorkerEntry {
    info: WorkerInfo,
    link: Arc<dyn JobDispatch>,
    active: bool,
    running: u32,
    /// Cache hint of the last job assigned here.
    last_hint: Option<String>,
    /// Registration sequence number; also the tie-break order.
    session: u64,
}

impl WorkerEntry {
    fn has_free_slot(&self) -> bool {
        self.running < self.info.capacity
    }

    fn is_eligible(&self, request: &JobRequest) -> bool {
        self.active
            && self.has_free_slot()
            && request
                .push_repository()
                .map_or(true, |repo| self.info.can_push(repo))
    }

    fn has_affinity(&self, cache_hint: &str) -> bool {
        !cache_hint.is_empty() && self.last_hint.as_deref() == Some(cache_hint)
    }
}

struct RunningJob {
    job: Arc<Job>,
    worker: String,
    session: u64,
    attempt: u32,
    assigned_at: DateTime<Utc>,
}

#[derive(Default)]
struct PoolState {
    /// Registration order.
    workers: Vec<WorkerEntry>,
    next_session: u64,
    urgent: VecDeque<Arc<Job>>,
    normal: VecDeque<Arc<Job>>,
    running: HashMap<JobId, RunningJob>,
    /// Queued jobs already reported as unassignable.
    unassignable: HashSet<JobId>,
}

impl PoolState {
    fn queue(&self, priority: Priority) -> &VecDeque<Arc<Job>> {
        match priority {
            Priority::Urgent => &self.urgent,
            Priority::Normal => &self.normal,
        }
    }

    fn queue_mut(&mut self, priority: Priority) -> &mut VecDeque<Arc<Job>> {
        match priority {
            Priority::Urgent => &mut self.urgent,
            Priority::Normal => &mut self.normal,
        }
    }

    fn worker_index(&self, name: &str) -> Option<usize> {
        self.workers.iter().position(|w| w.info.name == name)
    }

    fn worker_names(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.info.name.clone()).collect()
    }

    fn any_free_slot(&self) -> bool {
        self.workers.iter().any(|w| w.active && w.has_free_slot())
    }

    fn queued(&self) -> impl Iterator<Item = &Arc<Job>> {
        self.urgent.iter().chain(self.normal.iter())
    }

    /// Queued jobs whose push target no connected worker accepts.
    fn unassignable_jobs(&self) -> Vec<Arc<Job>> {
        self.queued()
            .filter(|job| match job.request().push_repository() {
                Some(repo) => !self.workers.iter().any(|w| w.info.can_push(repo)),
                None => false,
            })
            .cloned()
            .collect()
    }
}

/// Pick the worker for `request`: affinity first, then the least loaded,
/// then the earliest registered.
fn pick_worker(workers: &[WorkerEntry], request: &JobRequest, refused: &[usize]) -> Option<usize> {
    workers
        .iter()
        .enumerate()
        .filter(|(i, w)| !refused.contains(i) && w.is_eligible(request))
        .min_by_key(|(_, w)| (!w.has_affinity(&request.cache_hint), w.running, w.session))
        .map(|(i, _)| i)
}

/// Counters for metrics and status output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub workers_active: usize,
    pub workers_paused: usize,
    pub capacity: u64,
    pub running: usize,
    pub queued_urgent: usize,
    pub queued_normal: usize,
}

/// One named pool.
pub struct Pool {
    name: String,
    retry_policy: RetryPolicy,
    report_capacity: usize,
    state: Mutex<PoolState>,
    this: Weak<Pool>,
}

impl Pool {
    pub fn new(name: impl Into<String>, retry_policy: RetryPolicy, report_capacity: usize) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|this| Self {
            name,
            retry_policy,
            report_capacity,
            state: Mutex::new(PoolState::default()),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind a worker to this pool.
    ///
    /// A worker already registered under the same name is treated as
    /// disconnected and replaced. Dropping the returned [`Registration`]
    /// disconnects the worker.
    pub fn register(self: &Arc<Self>, info: WorkerInfo, link: Arc<dyn JobDispatch>) -> Registration {
        let mut state = self.lock();

        if let Some(idx) = state.worker_index(&info.name) {
            warn!(pool = %self.name, worker = %info.name, "Replacing stale registration");
            self.remove_worker(&mut state, idx);
        }

        let session = state.next_session;
        state.next_session += 1;

        info!(
            pool = %self.name,
            worker = %info.name,
            capacity = info.capacity,
            allow_push = ?info.allow_push,
            "Worker registered"
        );

        let name = info.name.clone();
        state.workers.push(WorkerEntry {
            info,
            link,
            active: true,
            running: 0,
            last_hint: None,
            session,
        });

        self.assign_pending(&mut state);

        Registration {
            pool: self.clone(),
            worker: name,
            session,
            released: false,
        }
    }

    /// Queue a job and try to assign it.
    pub fn submit(self: &Arc<Self>, request: JobRequest) -> Result<Arc<Job>, CoreError> {
        request.validate()?;
        if request.pool != self.name {
            return Err(CoreError::InvalidRequest(format!(
                "job for pool '{}' submitted to pool '{}'",
                request.pool, self.name
            )));
        }

        let priority = request.priority();
        let job = Job::new(request, Arc::downgrade(self));

        let mut state = self.lock();
        info!(
            pool = %self.name,
            job_id = %job.id(),
            priority = ?priority,
            cache_hint = %job.request().cache_hint,
            "Job queued"
        );
        state.queue_mut(priority).push_back(job.clone());
        self.assign_pending(&mut state);

        Ok(job)
    }

    /// Hand queued jobs to free workers until nothing more fits.
    ///
    /// The urgent queue is scanned before the normal one. A job nobody can
    /// take right now (capacity, push permission) keeps its place and the
    /// scan moves on to the next one.
    fn assign_pending(&self, state: &mut PoolState) {
        for priority in [Priority::Urgent, Priority::Normal] {
            let mut i = 0;
            while i < state.queue(priority).len() {
                if !state.any_free_slot() {
                    self.flag_unassignable(state);
                    return;
                }
                let job = state.queue(priority)[i].clone();
                if job.status().is_terminal() {
                    state.queue_mut(priority).remove(i);
                    continue;
                }
                if self.try_assign(state, &job) {
                    state.queue_mut(priority).remove(i);
                } else {
                    i += 1;
                }
            }
        }
        self.flag_unassignable(state);
    }

    fn try_assign(&self, state: &mut PoolState, job: &Arc<Job>) -> bool {
        let mut refused = Vec::new();
        loop {
            let Some(idx) = pick_worker(&state.workers, job.request(), &refused) else {
                return false;
            };

            let cancel = CancellationToken::new();
            let worker_name = state.workers[idx].info.name.clone();
            let attempt = job.assign(&worker_name, cancel.clone());
            let (reporter, rx) = JobReporter::channel(job.id().clone(), self.report_capacity);
            let assignment = Assignment {
                job_id: job.id().clone(),
                request: job.request().clone(),
                reporter,
                cancel,
            };

            let entry = &mut state.workers[idx];
            if !entry.link.offer(assignment) {
                debug!(pool = %self.name, worker = %worker_name, job_id = %job.id(), "Offer refused");
                job.unassign(attempt);
                refused.push(idx);
                continue;
            }

            entry.running += 1;
            if !job.request().cache_hint.is_empty() {
                entry.last_hint = Some(job.request().cache_hint.clone());
            }
            let session = entry.session;

            info!(
                pool = %self.name,
                worker = %worker_name,
                job_id = %job.id(),
                attempt,
                running = entry.running,
                capacity = entry.info.capacity,
                "Job assigned"
            );

            state.running.insert(
                job.id().clone(),
                RunningJob {
                    job: job.clone(),
                    worker: worker_name,
                    session,
                    attempt,
                    assigned_at: Utc::now(),
                },
            );
            state.unassignable.remove(job.id());
            tokio::spawn(pump_reports(self.this.clone(), job.clone(), attempt, rx));
            return true;
        }
    }

    fn flag_unassignable(&self, state: &mut PoolState) {
        let stuck = state.unassignable_jobs();
        let stuck_ids: HashSet<JobId> = stuck.iter().map(|j| j.id().clone()).collect();
        for job in &stuck {
            if !state.unassignable.contains(job.id()) {
                warn!(
                    pool = %self.name,
                    job_id = %job.id(),
                    push_to = job.request().push_repository().unwrap_or_default(),
                    "No connected worker may push to this repository; job stays queued"
                );
            }
        }
        state.unassignable = stuck_ids;
    }

    /// A worker finished (or failed to run) an attempt.
    pub(crate) fn finish(&self, job_id: &JobId, attempt: u32, outcome: JobOutcome) {
        let mut state = self.lock();

        let running = match state.running.remove(job_id) {
            Some(r) if r.attempt == attempt => r,
            other => {
                if let Some(current) = other {
                    state.running.insert(job_id.clone(), current);
                }
                warn!(
                    pool = %self.name,
                    job_id = %job_id,
                    attempt,
                    "Ignoring completion for an attempt the pool no longer tracks"
                );
                return;
            }
        };

        let outcome = match outcome {
            Err(_) if running.job.cancel_requested() => Err(JobError::Cancelled),
            other => other,
        };
        running.job.finish(outcome);

        let elapsed = Utc::now() - running.assigned_at;
        debug!(job_id = %job_id, elapsed_ms = elapsed.num_milliseconds(), "Attempt finished");

        match state
            .workers
            .iter_mut()
            .find(|w| w.info.name == running.worker && w.session == running.session)
        {
            Some(worker) => match worker.running.checked_sub(1) {
                Some(n) => worker.running = n,
                None => error!(pool = %self.name, worker = %running.worker, "Running count underflow"),
            },
            None => debug!(worker = %running.worker, "Slot owner already gone"),
        }

        self.assign_pending(&mut state);
    }

    /// Cancel `job`. Safe to call any number of times.
    pub(crate) fn cancel(&self, job: &Job) {
        let mut state = self.lock();
        match job.status() {
            JobStatus::Queued => {
                let priority = job.request().priority();
                state.queue_mut(priority).retain(|queued| queued.id() != job.id());
                state.unassignable.remove(job.id());
                info!(pool = %self.name, job_id = %job.id(), "Queued job cancelled");
                job.finish(Err(JobError::Cancelled));
            }
            JobStatus::Assigned | JobStatus::Running => {
                if let Some(token) = job.request_cancel() {
                    info!(
                        pool = %self.name,
                        job_id = %job.id(),
                        worker = job.worker().unwrap_or_default(),
                        "Forwarding cancel to worker"
                    );
                    token.cancel();
                }
            }
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled => {}
        }
    }

    /// Called when a worker's connection goes away.
    pub(crate) fn disconnect(&self, worker: &str, session: u64) {
        let mut state = self.lock();
        match state
            .workers
            .iter()
            .position(|w| w.info.name == worker && w.session == session)
        {
            Some(idx) => {
                self.remove_worker(&mut state, idx);
                self.assign_pending(&mut state);
            }
            None => debug!(pool = %self.name, worker, "Registration already replaced"),
        }
    }

    /// Drop a worker and settle every job it was running.
    fn remove_worker(&self, state: &mut PoolState, idx: usize) {
        let entry = state.workers.remove(idx);
        info!(pool = %self.name, worker = %entry.info.name, running = entry.running, "Worker disconnected");

        let lost: Vec<JobId> = state
            .running
            .iter()
            .filter(|(_, r)| r.worker == entry.info.name && r.session == entry.session)
            .map(|(id, _)| id.clone())
            .collect();

        for job_id in lost {
            let Some(running) = state.running.remove(&job_id) else {
                continue;
            };
            let job = running.job;

            let retry = self.retry_policy == RetryPolicy::Idempotent
                && job.request().idempotent
                && !job.retried();
            // Stop whatever the worker may still be doing for this attempt.
            if let Some(token) = job.take_cancel_token() {
                token.cancel();
            }

            if retry && job.requeue() {
                job.note(&format!(
                    "worker {} disconnected; retrying the job once",
                    entry.info.name
                ));
                info!(pool = %self.name, job_id = %job.id(), "Re-queued after worker loss");
                state.queue_mut(job.request().priority()).push_front(job);
            } else {
                job.note(&format!("worker {} disconnected", entry.info.name));
                job.finish(Err(JobError::WorkerDisconnected));
            }
        }
    }

    /// Re-run assignment after a worker that declined offers opened up again.
    fn worker_ready(&self, worker: &str) {
        let mut state = self.lock();
        debug!(pool = %self.name, worker, "Worker ready for offers");
        self.assign_pending(&mut state);
    }

    /// Pause or resume a worker. Paused workers keep their running jobs.
    pub fn set_active(&self, worker: &str, active: bool) -> Result<(), CoreError> {
        let mut state = self.lock();
        let idx = state
            .worker_index(worker)
            .ok_or_else(|| CoreError::WorkerNotFound {
                name: worker.to_string(),
                candidates: state.worker_names(),
            })?;
        if state.workers[idx].active != active {
            state.workers[idx].active = active;
            info!(pool = %self.name, worker, active, "Worker activity changed");
        }
        if active {
            self.assign_pending(&mut state);
        }
        Ok(())
    }

    /// Ask a worker to update itself after draining.
    pub fn self_update(&self, worker: &str) -> Result<bool, CoreError> {
        let link = {
            let state = self.lock();
            let idx = state
                .worker_index(worker)
                .ok_or_else(|| CoreError::WorkerNotFound {
                    name: worker.to_string(),
                    candidates: state.worker_names(),
                })?;
            state.workers[idx].link.clone()
        };
        let scheduled = link.self_update();
        info!(pool = %self.name, worker, scheduled, "Self-update requested");
        Ok(scheduled)
    }

    /// Snapshot of the registered workers in registration order.
    pub fn workers(&self) -> Vec<WorkerSummary> {
        self.lock()
            .workers
            .iter()
            .map(|w| WorkerSummary {
                name: w.info.name.clone(),
                active: w.active,
                running: w.running,
                capacity: w.info.capacity,
            })
            .collect()
    }

    /// Number of queued jobs as (urgent, normal).
    pub fn queue_lengths(&self) -> (usize, usize) {
        let state = self.lock();
        (state.urgent.len(), state.normal.len())
    }

    /// Queued jobs whose push target no connected worker accepts.
    pub fn unassignable(&self) -> Vec<JobId> {
        self.lock()
            .unassignable_jobs()
            .iter()
            .map(|job| job.id().clone())
            .collect()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            workers_active: state.workers.iter().filter(|w| w.active).count(),
            workers_paused: state.workers.iter().filter(|w| !w.active).count(),
            capacity: state.workers.iter().map(|w| u64::from(w.info.capacity)).sum(),
            running: state.running.len(),
            queued_urgent: state.urgent.len(),
            queued_normal: state.normal.len(),
        }
    }

    /// Human-readable status.
    pub fn dump(&self) -> String {
        let state = self.lock();
        let mut out = String::new();

        writeln!(out, "pool {}", self.name).ok();
        writeln!(out, "workers ({}):", state.workers.len()).ok();
        for w in &state.workers {
            writeln!(
                out,
                "  {:<24} {}/{}  {:<6}  hint={}",
                w.info.name,
                w.running,
                w.info.capacity,
                if w.active { "active" } else { "paused" },
                w.last_hint.as_deref().unwrap_or("-"),
            )
            .ok();
        }

        writeln!(out, "queue: urgent={} normal={}", state.urgent.len(), state.normal.len()).ok();
        for (label, queue) in [("urgent", &state.urgent), ("normal", &state.normal)] {
            for job in queue {
                let stuck = if state.unassignable.contains(job.id()) {
                    "  (no worker may push)"
                } else {
                    ""
                };
                writeln!(
                    out,
                    "  {} {} hint={}{}",
                    job.id(),
                    label,
                    if job.request().cache_hint.is_empty() {
                        "-"
                    } else {
                        job.request().cache_hint.as_str()
                    },
                    stuck
                )
                .ok();
            }
        }

        writeln!(out, "running ({}):", state.running.len()).ok();
        let mut running: Vec<&RunningJob> = state.running.values().collect();
        running.sort_by_key(|r| r.assigned_at);
        for r in running {
            writeln!(
                out,
                "  {} on {} since {}",
                r.job.id(),
                r.worker,
                r.assigned_at.format("%Y-%m-%d %H:%M:%S")
            )
            .ok();
        }

        out
    }
}

/// A worker's membership in a pool. Dropping it disconnects the worker.
pub struct Registration {
    pool: Arc<Pool>,
    worker: String,
    session: u64,
    released: bool,
}

impl Registration {
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Tell the pool this worker takes offers again.
    pub fn ready(&self) {
        self.pool.worker_ready(&self.worker);
    }

    /// Leave the pool now.
    pub fn disconnect(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.pool.disconnect(&self.worker, self.session);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}
