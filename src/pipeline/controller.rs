//! Pipeline controller.
//!
//! Drives one job from `CREATED` to a terminal state:
//!
//! ```text
//! CREATED -> EXTRACTING -> ANALYZING (financial | risk | market) -> SYNTHESIZING -> COMPLETED
//!                 \                                                      \
//!                  -> FAILED                                              -> FAILED
//! ```
//!
//! Every transition and every stage result is committed to the job store
//! before the next stage is dispatched. The analysis stages are polled
//! concurrently on the job's task, so the job keeps a single writer.

use crate::analysis::aggregator::ResultAggregator;
use crate::analysis::payload::StagePayload;
use crate::documents::DocumentStore;
use crate::error::{AggregationError, ErrorKind, StageError, StoreError};
use crate::models::{AnalysisRequest, Job, JobFailure, JobStatus, StageName, StageResult};
use crate::pipeline::runner::StageRunner;
use crate::store::JobWriter;
use futures::future::{join_all, try_join_all};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Stand-in for "no deadline": about thirty years.
const FAR_FUTURE_SECS: u64 = 86_400 * 365 * 30;

/// Sequences the stages of a job.
#[derive(Clone)]
pub struct PipelineController {
    runner: StageRunner,
    documents: Arc<dyn DocumentStore>,
    aggregator: ResultAggregator,
    job_deadline: Duration,
}

impl PipelineController {
    pub fn new(
        runner: StageRunner,
        documents: Arc<dyn DocumentStore>,
        aggregator: ResultAggregator,
        job_deadline: Duration,
    ) -> Self {
        Self {
            runner,
            documents,
            aggregator,
            job_deadline,
        }
    }

    /// Run the job to completion and return its terminal snapshot.
    pub async fn drive(&self, writer: JobWriter) -> Arc<Job> {
        let deadline = deadline_after(self.job_deadline);

        if let Err(e) = self.execute(&writer, deadline).await {
            error!(job_id = %writer.id(), "Job store rejected a write: {}", e);
            if let Err(e) = abandon(&writer, &e) {
                error!(job_id = %writer.id(), "Could not fail the job: {}", e);
            }
        }

        let job = writer.snapshot();
        match job.status {
            JobStatus::Completed => info!(job_id = %job.id, "Job completed"),
            JobStatus::Failed => warn!(
                job_id = %job.id,
                "Job failed: {}",
                job.failure.as_ref().map(ToString::to_string).unwrap_or_default()
            ),
            status => error!(job_id = %job.id, %status, "Job stopped before a terminal state"),
        }
        job
    }

    async fn execute(&self, writer: &JobWriter, deadline: Instant) -> Result<(), StoreError> {
        writer.transition(JobStatus::Extracting)?;
        let request = writer.snapshot().request.clone();

        let loaded = tokio::time::timeout_at(deadline, self.extraction_input(&request))
            .await
            .unwrap_or_else(|_| Err(StageError::job_timeout()));
        let input = match loaded {
            Ok(input) => input,
            Err(error) => {
                let kind = error.kind;
                let message = error.message.clone();
                writer.finish_stage(StageResult::failed(StageName::Extraction, 1, error))?;
                writer.fail(
                    JobFailure {
                        kind,
                        stages: vec![StageName::Extraction],
                        message,
                    },
                    None,
                )?;
                return Ok(());
            }
        };

        let extraction = self
            .run_stage(writer, StageName::Extraction, &input, deadline)
            .await?;
        let profile = match extraction.payload {
            Some(payload) if extraction.error.is_none() => payload,
            _ => {
                let error = extraction.error.unwrap_or_else(|| {
                    StageError::new(ErrorKind::StageFailure, "extraction produced no payload")
                });
                let kind = if error.kind == ErrorKind::JobTimeout {
                    ErrorKind::JobTimeout
                } else {
                    ErrorKind::StageFailure
                };
                writer.fail(
                    JobFailure {
                        kind,
                        stages: vec![StageName::Extraction],
                        message: error.to_string(),
                    },
                    None,
                )?;
                return Ok(());
            }
        };

        writer.transition(JobStatus::Analyzing)?;
        writer.init_stages(&StageName::ANALYSIS)?;

        let analysis_input = json!({
            "company": profile.to_data(),
            "additional_writeup": request.additional_writeup,
        });
        let runs = StageName::ANALYSIS
            .iter()
            .map(|stage| self.run_stage(writer, *stage, &analysis_input, deadline));
        let analysis: Vec<StageResult> = join_all(runs)
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;

        writer.transition(JobStatus::Synthesizing)?;

        if !analysis.iter().any(StageResult::is_succeeded) {
            let message = AggregationError::NoViableSections.to_string();
            writer.finish_stage(StageResult::failed(
                StageName::Synthesis,
                1,
                StageError::new(ErrorKind::AggregationError, message.clone()),
            ))?;
            writer.fail(
                JobFailure {
                    kind: ErrorKind::AggregationError,
                    stages: StageName::ANALYSIS.to_vec(),
                    message,
                },
                None,
            )?;
            return Ok(());
        }

        let synthesis_input = synthesis_input(&profile, &analysis, &request);
        let synthesis_deadline = deadline.max(deadline_after(self.runner.timeout()));
        self.run_stage(
            writer,
            StageName::Synthesis,
            &synthesis_input,
            synthesis_deadline,
        )
        .await?;

        let job_id = writer.id();
        let results = writer.snapshot().stage_results.clone();
        match self.aggregator.aggregate(job_id, &results) {
            Ok(report) => {
                if report.is_partial() {
                    info!(
                        job_id = %job_id,
                        missing = ?report.missing_sections,
                        "Report generated with missing sections"
                    );
                }
                writer.complete(report)?;
            }
            Err(err) => {
                let partial = self.aggregator.partial(job_id, &results);
                let partial = (!partial.sections.is_empty()).then_some(partial);
                let kind = match &err {
                    AggregationError::NoViableSections => ErrorKind::AggregationError,
                    AggregationError::SynthesisFailed(e) if e.kind == ErrorKind::JobTimeout => {
                        ErrorKind::JobTimeout
                    }
                    AggregationError::SynthesisFailed(_) => ErrorKind::StageFailure,
                };
                writer.fail(
                    JobFailure {
                        kind,
                        stages: vec![StageName::Synthesis],
                        message: err.to_string(),
                    },
                    partial,
                )?;
            }
        }

        Ok(())
    }

    /// Run one stage under the deadline and commit its terminal result.
    async fn run_stage(
        &self,
        writer: &JobWriter,
        stage: StageName,
        input: &Value,
        deadline: Instant,
    ) -> Result<StageResult, StoreError> {
        let outcome = tokio::time::timeout_at(deadline, self.runner.run(stage, input, writer)).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(job_id = %writer.id(), stage = %stage, "Job deadline expired mid-stage");
                let attempts = writer
                    .snapshot()
                    .stage(stage)
                    .map(|r| r.attempts)
                    .unwrap_or(0);
                StageResult::failed(stage, attempts, StageError::job_timeout())
            }
        };

        writer.finish_stage(result.clone())?;
        Ok(result)
    }

    async fn extraction_input(&self, request: &AnalysisRequest) -> Result<Value, StageError> {
        let loads = request.documents.iter().map(|doc| self.documents.load(doc));
        let documents = try_join_all(loads)
            .await
            .map_err(|e| StageError::new(ErrorKind::DocumentUnavailable, e.to_string()))?;

        let documents: Vec<Value> = documents
            .into_iter()
            .map(|doc| json!({"name": doc.name, "content": doc.content}))
            .collect();

        Ok(json!({
            "company_name_hint": request.company_name,
            "documents": documents,
            "additional_writeup": request.additional_writeup,
        }))
    }
}

/// `now + after`, saturating far in the future instead of overflowing.
fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

/// Move a job the controller could not finish to `FAILED`.
///
/// Walks forward along the state machine to a state with a `FAILED` edge and
/// closes every stage that is still open.
fn abandon(writer: &JobWriter, cause: &StoreError) -> Result<(), StoreError> {
    let job = writer.snapshot();
    if job.status.is_terminal() {
        return Ok(());
    }

    let open: Vec<StageName> = job
        .stage_results
        .values()
        .filter(|r| !r.state.is_terminal())
        .map(|r| r.stage)
        .collect();
    let message = format!("job aborted: {}", cause);
    for stage in &open {
        let attempts = job.stage(*stage).map(|r| r.attempts).unwrap_or(0);
        writer.finish_stage(StageResult::failed(
            *stage,
            attempts,
            StageError::new(ErrorKind::StageFailure, message.clone()),
        ))?;
    }

    let status = writer.snapshot().status;
    match status {
        JobStatus::Created => {
            writer.transition(JobStatus::Extracting)?;
        }
        JobStatus::Analyzing => {
            writer.transition(JobStatus::Synthesizing)?;
        }
        _ => {}
    }

    writer.fail(
        JobFailure {
            kind: ErrorKind::StageFailure,
            stages: open,
            message,
        },
        None,
    )?;
    Ok(())
}

fn synthesis_input(
    profile: &StagePayload,
    analysis: &[StageResult],
    request: &AnalysisRequest,
) -> Value {
    let mut sections = Map::new();
    let mut missing = Vec::new();

    for result in analysis {
        match &result.payload {
            Some(payload) => {
                sections.insert(result.stage.to_string(), payload.to_data());
            }
            None => missing.push(result.stage.to_string()),
        }
    }

    json!({
        "company": profile.to_data(),
        "sections": sections,
        "missing_sections": missing,
        "additional_writeup": request.additional_writeup,
    })
}
