//! Data models for the analysis orchestrator.
//!
//! This module contains the job and stage records owned by the job store,
//! the submission shape, and the report produced by the aggregator.

use crate::analysis::payload::{StagePayload, SynthesisOutput};
use crate::error::{ErrorKind, StageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique, immutable identifier of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Overall status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Extracting,
    Analyzing,
    Synthesizing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Position in the state ordering. Both terminal states share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Created => 0,
            JobStatus::Extracting => 1,
            JobStatus::Analyzing => 2,
            JobStatus::Synthesizing => 3,
            JobStatus::Completed | JobStatus::Failed => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Edges of the job state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Created, JobStatus::Extracting)
                | (JobStatus::Extracting, JobStatus::Analyzing)
                | (JobStatus::Extracting, JobStatus::Failed)
                | (JobStatus::Analyzing, JobStatus::Synthesizing)
                | (JobStatus::Synthesizing, JobStatus::Completed)
                | (JobStatus::Synthesizing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Created => "CREATED",
            JobStatus::Extracting => "EXTRACTING",
            JobStatus::Analyzing => "ANALYZING",
            JobStatus::Synthesizing => "SYNTHESIZING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Identifier of one analytical stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Extraction,
    Financial,
    Risk,
    Market,
    Synthesis,
}

impl StageName {
    pub const ALL: [StageName; 5] = [
        StageName::Extraction,
        StageName::Financial,
        StageName::Risk,
        StageName::Market,
        StageName::Synthesis,
    ];

    /// The concurrent stages of the ANALYZING phase.
    pub const ANALYSIS: [StageName; 3] = [StageName::Financial, StageName::Risk, StageName::Market];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Extraction => "extraction",
            StageName::Financial => "financial",
            StageName::Risk => "risk",
            StageName::Market => "market",
            StageName::Synthesis => "synthesis",
        }
    }

    /// Human-readable title for reports and progress lines.
    pub fn title(&self) -> &'static str {
        match self {
            StageName::Extraction => "Document Extraction",
            StageName::Financial => "Financial Analysis",
            StageName::Risk => "Risk Assessment",
            StageName::Market => "Market Intelligence",
            StageName::Synthesis => "Synthesis",
        }
    }

    /// A critical stage's failure terminates the whole job.
    pub fn is_critical(&self) -> bool {
        matches!(self, StageName::Extraction | StageName::Synthesis)
    }

    pub fn is_analysis(&self) -> bool {
        StageName::ANALYSIS.contains(self)
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageName::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown stage: {}", s))
    }
}

/// Per-stage execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageState::Succeeded | StageState::Failed)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageState::Pending => "PENDING",
            StageState::Running => "RUNNING",
            StageState::Succeeded => "SUCCEEDED",
            StageState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Outcome record of one stage of a job.
///
/// `payload` is set only when `SUCCEEDED`, `error` only when `FAILED`, and
/// `attempts` is at least 1 once the stage has left `PENDING`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageName,
    pub state: StageState,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<StagePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageResult {
    pub fn pending(stage: StageName) -> Self {
        Self {
            stage,
            state: StageState::Pending,
            attempts: 0,
            payload: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn succeeded(stage: StageName, attempts: u32, payload: StagePayload) -> Self {
        Self {
            stage,
            state: StageState::Succeeded,
            attempts: attempts.max(1),
            payload: Some(payload),
            error: None,
            started_at: None,
            finished_at: Some(Utc::now()),
        }
    }

    pub fn failed(stage: StageName, attempts: u32, error: StageError) -> Self {
        Self {
            stage,
            state: StageState::Failed,
            attempts: attempts.max(1),
            payload: None,
            error: Some(error),
            started_at: None,
            finished_at: Some(Utc::now()),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.state == StageState::Succeeded
    }

    /// Checks the payload/error/attempts invariants.
    pub fn is_consistent(&self) -> bool {
        let attempts_ok = self.state == StageState::Pending || self.attempts >= 1;
        let exclusive = !(self.payload.is_some() && self.error.is_some());
        let shape_ok = match self.state {
            StageState::Succeeded => self.payload.is_some(),
            StageState::Failed => self.error.is_some(),
            StageState::Pending | StageState::Running => {
                self.payload.is_none() && self.error.is_none()
            }
        };
        attempts_ok && exclusive && shape_ok
    }
}

/// Reference to an already ingested document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentRef(pub String);

impl DocumentRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An analysis submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Optional hint; the extraction stage determines the actual name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    pub documents: Vec<DocumentRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_writeup: Option<String>,
}

/// Reason attached to a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    /// Stages that caused the failure.
    pub stages: Vec<StageName>,
    pub message: String,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<&str> = self.stages.iter().map(StageName::as_str).collect();
        write!(f, "{} in [{}]: {}", self.kind, stages.join(", "), self.message)
    }
}

/// Derived investment recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StronglyRecommend,
    Recommend,
    ProceedWithCaution,
    DoNotRecommend,
    InsufficientData,
}

impl Recommendation {
    pub fn label(&self) -> &'static str {
        match self {
            Recommendation::StronglyRecommend => {
                "STRONGLY RECOMMEND - High potential with manageable risks"
            }
            Recommendation::Recommend => "RECOMMEND - Good opportunity with some considerations",
            Recommendation::ProceedWithCaution => {
                "PROCEED WITH CAUTION - Mixed signals, thorough due diligence required"
            }
            Recommendation::DoNotRecommend => {
                "DO NOT RECOMMEND - Significant risks outweigh potential"
            }
            Recommendation::InsufficientData => {
                "INSUFFICIENT DATA - Critical analysis dimensions are missing"
            }
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether the report is based on every analysis dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Full,
    Reduced,
}

/// Contribution of one section to the overall score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionScore {
    pub stage: StageName,
    pub score: f64,
    /// Weight after renormalization over the available sections.
    pub weight: f64,
}

/// The aggregated investment report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    pub sections: BTreeMap<StageName, StagePayload>,
    pub missing_sections: BTreeSet<StageName>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub missing_reasons: BTreeMap<StageName, StageError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<f64>,
    #[serde(default)]
    pub score_basis: Vec<SectionScore>,
    pub recommendation: Recommendation,
    pub confidence: Confidence,
    #[serde(default)]
    pub critical_flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisOutput>,
}

impl Report {
    pub fn is_partial(&self) -> bool {
        !self.missing_sections.is_empty()
    }
}

/// One analysis job, as owned by the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub request: AnalysisRequest,
    pub stage_results: BTreeMap<StageName, StageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a job in `CREATED` with no stage results yet.
    pub fn new(request: AnalysisRequest) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Created,
            request,
            stage_results: BTreeMap::new(),
            report: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage(&self, stage: StageName) -> Option<&StageResult> {
        self.stage_results.get(&stage)
    }

    /// Company name from extraction, falling back to the submission hint.
    pub fn company_name(&self) -> Option<String> {
        self.stage(StageName::Extraction)
            .and_then(|r| match &r.payload {
                Some(StagePayload::Extraction(profile)) => Some(profile.company_name.clone()),
                _ => None,
            })
            .or_else(|| self.request.company_name.clone())
    }

    /// Rough completion percentage for progress reporting.
    pub fn progress(&self) -> u8 {
        match self.status {
            JobStatus::Created => 0,
            JobStatus::Extracting => 15,
            JobStatus::Analyzing => {
                let done = StageName::ANALYSIS
                    .iter()
                    .filter(|s| self.stage(**s).is_some_and(|r| r.state.is_terminal()))
                    .count() as u8;
                35 + done * 40 / 3
            }
            JobStatus::Synthesizing => 90,
            JobStatus::Completed | JobStatus::Failed => 100,
        }
    }

    /// Human-readable description of what the job is doing.
    pub fn current_step(&self) -> String {
        match self.status {
            JobStatus::Created => "Queued for analysis".to_string(),
            JobStatus::Extracting => "Extracting company data from documents".to_string(),
            JobStatus::Analyzing => {
                let running: Vec<&str> = StageName::ANALYSIS
                    .iter()
                    .filter(|s| self.stage(**s).is_some_and(|r| !r.state.is_terminal()))
                    .map(|s| s.title())
                    .collect();
                if running.is_empty() {
                    "Analysis stages finished".to_string()
                } else {
                    format!("Running {}", running.join(", "))
                }
            }
            JobStatus::Synthesizing => "Generating investment report".to_string(),
            JobStatus::Completed => match &self.report {
                Some(report) if report.is_partial() => {
                    "Report generated with missing sections".to_string()
                }
                _ => "Report generated successfully".to_string(),
            },
            JobStatus::Failed => match &self.failure {
                Some(failure) => format!("Analysis failed: {}", failure),
                None => "Analysis failed".to_string(),
            },
        }
    }

    pub fn status_view(&self) -> JobStatusView {
        let stages = self
            .stage_results
            .iter()
            .map(|(name, result)| {
                (
                    *name,
                    StageView {
                        state: result.state,
                        attempts: result.attempts,
                        error: result.error.clone(),
                    },
                )
            })
            .collect();

        JobStatusView {
            id: self.id,
            status: self.status,
            progress: self.progress(),
            current_step: self.current_step(),
            stages,
            failure: self.failure.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn listing(&self) -> JobListing {
        JobListing {
            id: self.id,
            status: self.status,
            company_name: self.company_name(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Per-stage slice of a status view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageView {
    pub state: StageState,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
}

/// What a status poll returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: String,
    pub stages: BTreeMap<StageName, StageView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One line of the job listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobListing {
    pub id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Short preview of a finished report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<f64>,
    pub recommendation: Recommendation,
    pub key_highlights: Vec<String>,
    pub critical_concerns: Vec<String>,
    pub missing_sections: BTreeSet<StageName>,
}
