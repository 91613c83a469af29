//! Markdown and JSON report generation.
//!
//! Renders a finished job: the aggregated report when there is one, the
//! failure reason otherwise, and the per-stage execution record.

use crate::analysis::payload::{
    Flag, FinancialAnalysis, MarketAnalysis, RiskAssessment, StagePayload, SynthesisOutput,
};
use crate::models::{Job, JobFailure, JobId, JobStatus, Report, StageName, StageView};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Run details shown in the metadata section.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub model_used: String,
    pub generated_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(job: &Job, metadata: &ReportMetadata) -> String {
    let mut output = String::new();

    let company = job
        .company_name()
        .unwrap_or_else(|| "Unknown Company".to_string());
    output.push_str(&format!("# Investment Analysis: {}\n\n", company));

    output.push_str(&generate_metadata_section(job, metadata));

    if let Some(failure) = &job.failure {
        output.push_str(&generate_failure_section(failure));
    }

    if let Some(report) = &job.report {
        output.push_str(&generate_verdict_section(report));
        output.push_str(&generate_score_section(report));
        for (stage, payload) in &report.sections {
            output.push_str(&generate_payload_section(*stage, payload));
        }
        output.push_str(&generate_missing_section(report));
        if let Some(synthesis) = &report.synthesis {
            output.push_str(&generate_synthesis_section(synthesis));
        }
        output.push_str(&generate_critical_flags_section(&report.critical_flags));
    }

    output.push_str(&generate_stage_table(job));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(job: &Job, metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Job ID:** `{}`\n", job.id));
    section.push_str(&format!("- **Status:** {}\n", job.status));
    section.push_str(&format!(
        "- **Analysis Date:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Model Used:** `{}`\n", metadata.model_used));
    section.push_str(&format!(
        "- **Documents Analyzed:** {}\n",
        job.request.documents.len()
    ));
    section.push_str(&format!(
        "- **Analysis Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

fn generate_failure_section(failure: &JobFailure) -> String {
    let mut section = String::new();

    section.push_str("## Analysis Failed\n\n");
    section.push_str(&format!("**Reason:** {}\n\n", failure.kind));
    if !failure.stages.is_empty() {
        let stages: Vec<&str> = failure.stages.iter().map(|s| s.title()).collect();
        section.push_str(&format!("**Stages:** {}\n\n", stages.join(", ")));
    }
    section.push_str(&format!("> {}\n\n", failure.message));

    section
}

/// Recommendation, score and executive summary.
fn generate_verdict_section(report: &Report) -> String {
    let mut section = String::new();

    section.push_str("## Executive Summary\n\n");
    if let Some(synthesis) = &report.synthesis {
        section.push_str(&synthesis.executive_summary);
        section.push_str("\n\n");
    }

    section.push_str(&format!("**Recommendation:** {}\n\n", report.recommendation));
    match report.overall_score {
        Some(score) => section.push_str(&format!("**Overall Score:** {:.1}/100\n\n", score)),
        None => section.push_str("**Overall Score:** n/a\n\n"),
    }
    if report.is_partial() {
        section.push_str(
            "*Confidence is reduced: some analysis sections are missing (see below).*\n\n",
        );
    }

    section
}

fn generate_score_section(report: &Report) -> String {
    if report.score_basis.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Score Breakdown\n\n");
    section.push_str("| Section | Score | Weight |\n");
    section.push_str("|:---|:---:|:---:|\n");
    for basis in &report.score_basis {
        section.push_str(&format!(
            "| {} | {:.1} | {:.0}% |\n",
            basis.stage.title(),
            basis.score,
            basis.weight * 100.0
        ));
    }
    section.push('\n');

    section
}

fn generate_payload_section(stage: StageName, payload: &StagePayload) -> String {
    let mut section = format!("## {}\n\n", stage.title());

    match payload {
        StagePayload::Financial(f) => section.push_str(&financial_body(f)),
        StagePayload::Risk(r) => section.push_str(&risk_body(r)),
        StagePayload::Market(m) => section.push_str(&market_body(m)),
        StagePayload::Extraction(_) | StagePayload::Synthesis(_) => {}
    }

    section
}

fn financial_body(f: &FinancialAnalysis) -> String {
    let mut body = format!(
        "*Score: {:.1}/100 | Confidence: {:.0}%*\n\n",
        f.score,
        f.confidence * 100.0
    );
    body.push_str(&bullet_list("Key Insights", &f.insights));
    body.push_str(&metrics_table(&f.metrics));
    body.push_str(&bullet_list("Recommendations", &f.recommendations));
    body.push_str(&flag_list(&f.flags));
    body
}

fn risk_body(r: &RiskAssessment) -> String {
    let mut body = format!(
        "*Risk Score: {:.1}/100 ({} risk) | Confidence: {:.0}%*\n\n",
        r.risk_score,
        r.risk_level(),
        r.confidence * 100.0
    );
    body.push_str(&bullet_list("Findings", &r.insights));
    body.push_str(&bullet_list("Mitigation Strategies", &r.mitigations));
    body.push_str(&flag_list(&r.flags));
    body
}

fn market_body(m: &MarketAnalysis) -> String {
    let mut body = format!(
        "*Score: {:.1}/100 | Confidence: {:.0}%*\n\n",
        m.score,
        m.confidence * 100.0
    );
    body.push_str(&bullet_list("Key Insights", &m.insights));
    if !m.competitors.is_empty() {
        body.push_str(&format!("**Competitors:** {}\n\n", m.competitors.join(", ")));
    }
    body.push_str(&metrics_table(&m.metrics));
    body.push_str(&bullet_list("Recommendations", &m.recommendations));
    body.push_str(&flag_list(&m.flags));
    body
}

fn bullet_list(title: &str, items: &[String]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut list = format!("### {}\n\n", title);
    for item in items {
        list.push_str(&format!("- {}\n", item));
    }
    list.push('\n');
    list
}

fn metrics_table(metrics: &BTreeMap<String, f64>) -> String {
    if metrics.is_empty() {
        return String::new();
    }
    let mut table = String::from("### Metrics\n\n| Metric | Value |\n|:---|---:|\n");
    for (name, value) in metrics {
        table.push_str(&format!("| {} | {} |\n", name, value));
    }
    table.push('\n');
    table
}

fn flag_list(flags: &[Flag]) -> String {
    if flags.is_empty() {
        return String::new();
    }
    let mut list = String::from("### Flags\n\n");
    for flag in flags {
        list.push_str(&format!("- **{}:** {}\n", flag.severity, flag.message));
    }
    list.push('\n');
    list
}

fn generate_missing_section(report: &Report) -> String {
    if report.missing_sections.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Missing Sections\n\n");
    for stage in &report.missing_sections {
        match report.missing_reasons.get(stage) {
            Some(reason) => section.push_str(&format!("- **{}:** {}\n", stage.title(), reason)),
            None => section.push_str(&format!("- **{}**\n", stage.title())),
        }
    }
    section.push('\n');

    section
}

fn generate_synthesis_section(synthesis: &SynthesisOutput) -> String {
    let mut section = String::new();
    section.push_str(&bullet_list("Key Highlights", &synthesis.key_highlights));
    section.push_str(&bullet_list("Critical Concerns", &synthesis.critical_concerns));

    if !synthesis.next_steps.is_empty() {
        section.push_str("## Next Steps\n\n");
        for (i, step) in synthesis.next_steps.iter().enumerate() {
            section.push_str(&format!("{}. {}\n", i + 1, step));
        }
        section.push('\n');
    }

    section
}

fn generate_critical_flags_section(flags: &[String]) -> String {
    if flags.is_empty() {
        return String::new();
    }
    let mut section = String::from("## Critical Flags\n\n");
    for flag in flags {
        section.push_str(&format!("- {}\n", flag));
    }
    section.push('\n');
    section
}

/// Per-stage execution record.
fn generate_stage_table(job: &Job) -> String {
    if job.stage_results.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Stage Execution\n\n");
    section.push_str("| Stage | State | Attempts | Error |\n");
    section.push_str("|:---|:---:|:---:|:---|\n");
    for (stage, result) in &job.stage_results {
        let error = result
            .error
            .as_ref()
            .map(|e| e.kind.to_string())
            .unwrap_or_default();
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            stage.title(),
            result.state,
            result.attempts,
            error
        ));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by PitchLens v{}. AI-assisted analysis; verify before investing.*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

#[derive(Serialize)]
struct JsonReport<'a> {
    job_id: JobId,
    status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    company_name: Option<String>,
    metadata: &'a ReportMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<&'a JobFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a Report>,
    stages: BTreeMap<StageName, StageView>,
}

/// Generate a JSON report.
pub fn generate_json_report(job: &Job, metadata: &ReportMetadata) -> Result<String> {
    let document = JsonReport {
        job_id: job.id,
        status: job.status,
        company_name: job.company_name(),
        metadata,
        failure: job.failure.as_ref(),
        report: job.report.as_ref(),
        stages: job.status_view().stages,
    };
    serde_json::to_string_pretty(&document).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::aggregator::tests::{extraction, financial, market, risk, synthesis};
    use crate::analysis::payload::FlagSeverity;
    use crate::analysis::ResultAggregator;
    use crate::error::{ErrorKind, StageError};
    use crate::models::{AnalysisRequest, DocumentRef, StageResult};

    fn metadata() -> ReportMetadata {
        ReportMetadata {
            model_used: "test-model".to_string(),
            generated_at: Utc::now(),
            duration_seconds: 42.0,
        }
    }

    fn finished_job(with_risk: bool) -> Job {
        let mut job = Job::new(AnalysisRequest {
            company_name: None,
            documents: vec![DocumentRef::new("deck.md")],
            additional_writeup: None,
        });

        let high = Flag {
            severity: FlagSeverity::High,
            message: "Customer concentration exceeds 60%".to_string(),
        };
        let mut results = vec![
            StageResult::succeeded(StageName::Extraction, 1, extraction()),
            StageResult::succeeded(StageName::Financial, 1, financial(72.0, vec![high])),
            StageResult::succeeded(StageName::Market, 2, market(80.0)),
            StageResult::succeeded(StageName::Synthesis, 1, synthesis()),
        ];
        results.push(if with_risk {
            StageResult::succeeded(StageName::Risk, 1, risk(30.0))
        } else {
            StageResult::failed(
                StageName::Risk,
                3,
                StageError::new(ErrorKind::CapabilityTimeout, "timed out after 120s"),
            )
        });
        for result in results {
            job.stage_results.insert(result.stage, result);
        }

        job.report = ResultAggregator::default()
            .aggregate(job.id, &job.stage_results)
            .ok();
        job.status = JobStatus::Completed;
        job
    }

    #[test]
    fn test_generate_markdown_report() {
        let job = finished_job(true);
        let markdown = generate_markdown_report(&job, &metadata());

        assert!(markdown.contains("# Investment Analysis: TechFlow AI"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("## Executive Summary"));
        assert!(markdown.contains("## Financial Analysis"));
        assert!(markdown.contains("## Risk Assessment"));
        assert!(markdown.contains("## Market Intelligence"));
        assert!(markdown.contains("## Next Steps"));
        assert!(markdown.contains("HIGH RISK"));
        assert!(!markdown.contains("## Missing Sections"));
        assert!(!markdown.contains("## Analysis Failed"));
    }

    #[test]
    fn test_partial_report_lists_missing_sections() {
        let job = finished_job(false);
        let markdown = generate_markdown_report(&job, &metadata());

        assert!(markdown.contains("## Missing Sections"));
        assert!(markdown.contains("**Risk Assessment:** capability timeout"));
        assert!(markdown.contains("Confidence is reduced"));
        assert!(markdown.contains("| Risk Assessment | FAILED | 3 | capability timeout |"));
    }

    #[test]
    fn test_failed_job_without_report() {
        let mut job = Job::new(AnalysisRequest::default());
        job.status = JobStatus::Failed;
        job.failure = Some(JobFailure {
            kind: ErrorKind::StageFailure,
            stages: vec![StageName::Extraction],
            message: "capability unavailable: connection refused".to_string(),
        });

        let markdown = generate_markdown_report(&job, &metadata());
        assert!(markdown.contains("# Investment Analysis: Unknown Company"));
        assert!(markdown.contains("## Analysis Failed"));
        assert!(markdown.contains("Document Extraction"));
        assert!(!markdown.contains("## Executive Summary"));
    }

    #[test]
    fn test_score_section() {
        let job = finished_job(true);
        let section = generate_score_section(job.report.as_ref().unwrap());
        assert!(section.contains("| Financial Analysis | 72.0 | 40% |"));
        assert!(section.contains("| Risk Assessment | 70.0 | 33% |"));
    }

    #[test]
    fn test_generate_json_report() {
        let job = finished_job(false);
        let json = generate_json_report(&job, &metadata()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["status"], "COMPLETED");
        assert_eq!(value["company_name"], "TechFlow AI");
        assert_eq!(value["report"]["missing_sections"][0], "risk");
        assert_eq!(value["stages"]["risk"]["attempts"], 3);
        assert!(value.get("failure").is_none());
    }
}
