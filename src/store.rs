//! Job store.
//!
//! Owns every [`Job`]. Each job lives in its own slot holding the latest
//! committed snapshot in a `watch` channel, so status readers never wait on
//! the writer and can await changes without polling. Writes go through the
//! job's single [`JobWriter`]: the current snapshot is cloned, mutated,
//! validated and then published as a whole.

use crate::error::StoreError;
use crate::models::{
    AnalysisRequest, Job, JobFailure, JobId, JobStatus, Report, StageName, StageResult,
    StageState,
};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

struct JobSlot {
    tx: watch::Sender<Arc<Job>>,
}

impl JobSlot {
    fn snapshot(&self) -> Arc<Job> {
        self.tx.borrow().clone()
    }
}

/// Concurrent map of job id to job slot.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<DashMap<JobId, Arc<JobSlot>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a job in `CREATED` and hand out its only writer.
    pub fn create(&self, request: AnalysisRequest) -> JobWriter {
        let job = Job::new(request);
        let id = job.id;
        let (tx, _rx) = watch::channel(Arc::new(job));
        let slot = Arc::new(JobSlot { tx });
        self.jobs.insert(id, Arc::clone(&slot));
        debug!(job_id = %id, "Job created");
        JobWriter { id, slot }
    }

    /// Latest committed snapshot.
    pub fn get(&self, id: JobId) -> Option<Arc<Job>> {
        self.jobs.get(&id).map(|slot| slot.snapshot())
    }

    /// Receiver that observes every committed snapshot of a job.
    pub fn subscribe(&self, id: JobId) -> Option<watch::Receiver<Arc<Job>>> {
        self.jobs.get(&id).map(|slot| slot.tx.subscribe())
    }

    /// Snapshots of all jobs, oldest first.
    pub fn list(&self) -> Vec<Arc<Job>> {
        let mut jobs: Vec<Arc<Job>> = self.jobs.iter().map(|entry| entry.snapshot()).collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Remove a job that reached a terminal state.
    pub fn remove_finished(&self, id: JobId) -> Result<Arc<Job>, StoreError> {
        let mut seen = None;
        let removed = self.jobs.remove_if(&id, |_, slot| {
            let status = slot.snapshot().status;
            seen = Some(status);
            status.is_terminal()
        });

        match (removed, seen) {
            (Some((_, slot)), _) => Ok(slot.snapshot()),
            (None, Some(status)) => Err(StoreError::StillRunning { id, status }),
            (None, None) => Err(StoreError::UnknownJob(id)),
        }
    }
}

/// Exclusive write handle of one job.
///
/// Not `Clone`: whoever holds it is the job's single writer.
pub struct JobWriter {
    id: JobId,
    slot: Arc<JobSlot>,
}

impl JobWriter {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn snapshot(&self) -> Arc<Job> {
        self.slot.snapshot()
    }

    /// Clone, mutate, validate, publish.
    fn commit<F>(&self, mutate: F) -> Result<Arc<Job>, StoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), StoreError>,
    {
        let current = self.slot.snapshot();
        if current.status.is_terminal() {
            return Err(StoreError::Finalized(self.id));
        }

        let mut next = (*current).clone();
        mutate(&mut next)?;
        next.updated_at = Utc::now().max(current.updated_at);

        let next = Arc::new(next);
        self.slot.tx.send_replace(Arc::clone(&next));
        Ok(next)
    }

    /// Move the job along the state machine.
    pub fn transition(&self, to: JobStatus) -> Result<Arc<Job>, StoreError> {
        let job = self.commit(|job| {
            if !job.status.can_transition_to(to) {
                return Err(StoreError::IllegalTransition {
                    from: job.status,
                    to,
                });
            }
            job.status = to;
            Ok(())
        })?;
        debug!(job_id = %self.id, status = %to, "Job transitioned");
        Ok(job)
    }

    /// Register stages as `PENDING`.
    pub fn init_stages(&self, stages: &[StageName]) -> Result<Arc<Job>, StoreError> {
        self.commit(|job| {
            for stage in stages {
                if job.stage(*stage).is_some_and(|r| r.state.is_terminal()) {
                    return Err(StoreError::StageAlreadyTerminal(*stage));
                }
            }
            for stage in stages {
                job.stage_results
                    .insert(*stage, StageResult::pending(*stage));
            }
            Ok(())
        })
    }

    /// Mark a stage `RUNNING` for the given attempt.
    pub fn start_attempt(&self, stage: StageName, attempt: u32) -> Result<Arc<Job>, StoreError> {
        self.commit(|job| {
            let result = job
                .stage_results
                .entry(stage)
                .or_insert_with(|| StageResult::pending(stage));
            if result.state.is_terminal() {
                return Err(StoreError::StageAlreadyTerminal(stage));
            }
            result.state = StageState::Running;
            result.attempts = attempt.max(1);
            result.started_at.get_or_insert_with(Utc::now);
            Ok(())
        })
    }

    /// Record a stage's terminal result. Terminal results are never replaced.
    pub fn finish_stage(&self, mut result: StageResult) -> Result<Arc<Job>, StoreError> {
        let stage = result.stage;
        if !result.state.is_terminal() {
            return Err(StoreError::StageNotTerminal(stage));
        }

        self.commit(|job| {
            if let Some(existing) = job.stage(stage) {
                if existing.state.is_terminal() {
                    return Err(StoreError::StageAlreadyTerminal(stage));
                }
                if result.started_at.is_none() {
                    result.started_at = existing.started_at;
                }
            }
            job.stage_results.insert(stage, result);
            Ok(())
        })
    }

    /// Finish the job with its report.
    pub fn complete(&self, report: Report) -> Result<Arc<Job>, StoreError> {
        self.commit(|job| {
            if !job.status.can_transition_to(JobStatus::Completed) {
                return Err(StoreError::IllegalTransition {
                    from: job.status,
                    to: JobStatus::Completed,
                });
            }
            job.status = JobStatus::Completed;
            job.report = Some(report);
            Ok(())
        })
    }

    /// Fail the job, optionally keeping a partial report.
    pub fn fail(
        &self,
        failure: JobFailure,
        partial: Option<Report>,
    ) -> Result<Arc<Job>, StoreError> {
        self.commit(|job| {
            if !job.status.can_transition_to(JobStatus::Failed) {
                return Err(StoreError::IllegalTransition {
                    from: job.status,
                    to: JobStatus::Failed,
                });
            }
            job.status = JobStatus::Failed;
            job.failure = Some(failure);
            job.report = partial;
            Ok(())
        })
    }
}
