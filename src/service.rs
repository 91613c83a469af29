//! Analysis service.
//!
//! The public face of the orchestrator: validates submissions, spawns one
//! controller task per job and answers status, report and listing queries
//! from job store snapshots.

use crate::analysis::{ResultAggregator, ScoringPolicy};
use crate::config::Config;
use crate::documents::{DocumentInfo, DocumentStore};
use crate::error::{ServiceError, StoreError, ValidationError};
use crate::gateway::CapabilityGateway;
use crate::models::{
    AnalysisRequest, ExecutiveSummary, Job, JobFailure, JobId, JobListing, JobStatus,
    JobStatusView, Report,
};
use crate::pipeline::{PipelineController, RetryPolicy, StageRunner};
use crate::store::JobStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

const SUMMARY_HIGHLIGHTS: usize = 3;
const SUMMARY_CONCERNS: usize = 2;

/// What a finished job produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed {
        report: Report,
    },
    Failed {
        failure: JobFailure,
        #[serde(skip_serializing_if = "Option::is_none")]
        partial_report: Option<Report>,
    },
}

/// Service health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub capability: String,
    pub capability_reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability_error: Option<String>,
    /// Job counts keyed by status.
    pub jobs: BTreeMap<String, usize>,
    pub supported_formats: Vec<String>,
}

/// Orchestrator entry point.
#[derive(Clone)]
pub struct AnalysisService {
    store: JobStore,
    controller: PipelineController,
    documents: Arc<dyn DocumentStore>,
    gateway: Arc<dyn CapabilityGateway>,
}

impl AnalysisService {
    pub fn new(
        config: &Config,
        gateway: Arc<dyn CapabilityGateway>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        let runner = StageRunner::new(
            Arc::clone(&gateway),
            RetryPolicy::from(&config.pipeline),
            config.pipeline.stage_timeout(),
        );
        let aggregator = ResultAggregator::new(ScoringPolicy::from(&config.scoring));
        let controller = PipelineController::new(
            runner,
            Arc::clone(&documents),
            aggregator,
            config.pipeline.job_deadline(),
        );

        Self {
            store: JobStore::new(),
            controller,
            documents,
            gateway,
        }
    }

    /// Check a submission without creating a job.
    pub fn validate(
        &self,
        request: &AnalysisRequest,
    ) -> Result<Vec<DocumentInfo>, ValidationError> {
        if request.documents.is_empty() {
            return Err(ValidationError::NoDocuments);
        }

        let limit = self.documents.max_documents();
        if request.documents.len() > limit {
            return Err(ValidationError::TooManyDocuments {
                count: request.documents.len(),
                limit,
            });
        }

        if request
            .company_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(ValidationError::BlankCompanyName);
        }

        request
            .documents
            .iter()
            .map(|doc| self.documents.validate(doc))
            .collect()
    }

    /// Validate a request, create its job and start driving it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, request: AnalysisRequest) -> Result<JobId, ServiceError> {
        let documents = self.validate(&request)?;

        let writer = self.store.create(request);
        let id = writer.id();
        info!(job_id = %id, documents = documents.len(), "Job submitted");

        let controller = self.controller.clone();
        tokio::spawn(async move {
            controller.drive(writer).await;
        });

        Ok(id)
    }

    pub fn job(&self, id: JobId) -> Result<Arc<Job>, ServiceError> {
        self.store.get(id).ok_or(ServiceError::JobNotFound(id))
    }

    pub fn status(&self, id: JobId) -> Result<JobStatusView, ServiceError> {
        Ok(self.job(id)?.status_view())
    }

    /// Report of a finished job, or why it failed.
    pub fn report(&self, id: JobId) -> Result<JobOutcome, ServiceError> {
        let job = self.job(id)?;
        match job.status {
            JobStatus::Completed => job
                .report
                .clone()
                .map(|report| JobOutcome::Completed { report })
                .ok_or(ServiceError::NoReport(id)),
            JobStatus::Failed => {
                let failure = job.failure.clone().ok_or(ServiceError::NoReport(id))?;
                Ok(JobOutcome::Failed {
                    failure,
                    partial_report: job.report.clone(),
                })
            }
            status => Err(ServiceError::ReportNotReady { id, status }),
        }
    }

    /// Short preview of a finished job's report.
    pub fn summary(&self, id: JobId) -> Result<ExecutiveSummary, ServiceError> {
        let job = self.job(id)?;
        if !job.status.is_terminal() {
            return Err(ServiceError::ReportNotReady {
                id,
                status: job.status,
            });
        }
        let report = job.report.as_ref().ok_or(ServiceError::NoReport(id))?;

        let (highlights, concerns) = match &report.synthesis {
            Some(synthesis) => (
                synthesis.key_highlights.clone(),
                synthesis.critical_concerns.clone(),
            ),
            None => (Vec::new(), report.critical_flags.clone()),
        };

        Ok(ExecutiveSummary {
            id,
            status: job.status,
            company_name: report.company_name.clone().or_else(|| job.company_name()),
            overall_score: report.overall_score,
            recommendation: report.recommendation,
            key_highlights: highlights.into_iter().take(SUMMARY_HIGHLIGHTS).collect(),
            critical_concerns: concerns.into_iter().take(SUMMARY_CONCERNS).collect(),
            missing_sections: report.missing_sections.clone(),
        })
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Vec<JobListing> {
        self.store.list().iter().map(|job| job.listing()).collect()
    }

    /// Remove a finished job.
    pub fn delete(&self, id: JobId) -> Result<(), ServiceError> {
        match self.store.remove_finished(id) {
            Ok(_) => {
                debug!(job_id = %id, "Job deleted");
                Ok(())
            }
            Err(StoreError::StillRunning { id, status }) => {
                Err(ServiceError::JobStillRunning { id, status })
            }
            Err(_) => Err(ServiceError::JobNotFound(id)),
        }
    }

    /// Wait until the job is terminal and return that snapshot.
    pub async fn wait_for_terminal(&self, id: JobId) -> Result<Arc<Job>, ServiceError> {
        let mut rx = self.store.subscribe(id).ok_or(ServiceError::JobNotFound(id))?;
        let job = rx
            .wait_for(|job| job.status.is_terminal())
            .await
            .map_err(|_| ServiceError::JobNotFound(id))?;
        Ok(job.clone())
    }

    pub async fn health(&self) -> HealthReport {
        let check = self.gateway.health().await;

        let mut jobs = BTreeMap::new();
        for job in self.store.list() {
            *jobs.entry(job.status.to_string()).or_insert(0) += 1;
        }

        HealthReport {
            capability: self.gateway.name().to_string(),
            capability_reachable: check.is_ok(),
            capability_error: check.err().map(|e| e.to_string()),
            jobs,
            supported_formats: self.documents.supported_formats(),
        }
    }

    pub fn supported_formats(&self) -> Vec<String> {
        self.documents.supported_formats()
    }
}
