//! Report aggregation and scoring.
//!
//! Merges the terminal results of the parallel analysis stages into one
//! [`Report`], marks missing sections, and computes a composite score whose
//! weights are renormalized over the sections that are actually present.
//! Aggregation is pure: ordered collections only, no clocks, no I/O.

use crate::analysis::payload::{FlagSeverity, StagePayload};
use crate::config::ScoringConfig;
use crate::error::{AggregationError, ErrorKind, StageError};
use crate::models::{
    Confidence, JobId, Recommendation, Report, SectionScore, StageName, StageResult, StageState,
};
use std::collections::{BTreeMap, BTreeSet};

/// Weights and critical dimensions used to score a report.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringPolicy {
    pub weights: BTreeMap<StageName, f64>,
    /// Dimensions whose absence degrades the recommendation to insufficient data.
    pub critical_dimensions: BTreeSet<StageName>,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self::from(&ScoringConfig::default())
    }
}

impl From<&ScoringConfig> for ScoringPolicy {
    fn from(config: &ScoringConfig) -> Self {
        let weights = [
            (StageName::Financial, config.financial_weight),
            (StageName::Risk, config.risk_weight),
            (StageName::Market, config.market_weight),
        ]
        .into_iter()
        .collect();

        Self {
            weights,
            critical_dimensions: config
                .critical_dimensions
                .iter()
                .copied()
                .filter(StageName::is_analysis)
                .collect(),
        }
    }
}

impl ScoringPolicy {
    fn weight(&self, stage: StageName) -> f64 {
        self.weights.get(&stage).copied().unwrap_or(0.0).max(0.0)
    }
}

/// Builds reports out of terminal stage results.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    policy: ScoringPolicy,
}

impl ResultAggregator {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    /// Aggregate a finished job into its final report.
    ///
    /// Fails when every analysis stage failed or when synthesis did not
    /// succeed.
    pub fn aggregate(
        &self,
        job_id: JobId,
        stage_results: &BTreeMap<StageName, StageResult>,
    ) -> Result<Report, AggregationError> {
        let mut report = self.partial(job_id, stage_results);

        if report.sections.is_empty() {
            return Err(AggregationError::NoViableSections);
        }

        match stage_results.get(&StageName::Synthesis) {
            Some(StageResult {
                state: StageState::Succeeded,
                payload: Some(StagePayload::Synthesis(synthesis)),
                ..
            }) => {
                report.synthesis = Some(synthesis.clone());
                Ok(report)
            }
            Some(StageResult {
                error: Some(error), ..
            }) => Err(AggregationError::SynthesisFailed(error.clone())),
            _ => Err(AggregationError::SynthesisFailed(StageError::new(
                ErrorKind::StageFailure,
                "synthesis did not produce a result",
            ))),
        }
    }

    /// Sections, score and recommendation without synthesis.
    ///
    /// Used for the final report and to attach partial data to failed jobs.
    pub fn partial(
        &self,
        job_id: JobId,
        stage_results: &BTreeMap<StageName, StageResult>,
    ) -> Report {
        let mut sections = BTreeMap::new();
        let mut missing_sections = BTreeSet::new();
        let mut missing_reasons = BTreeMap::new();

        for stage in StageName::ANALYSIS {
            match stage_results.get(&stage) {
                Some(StageResult {
                    state: StageState::Succeeded,
                    payload: Some(payload),
                    ..
                }) => {
                    sections.insert(stage, payload.clone());
                }
                other => {
                    missing_sections.insert(stage);
                    let reason = other.and_then(|r| r.error.clone()).unwrap_or_else(|| {
                        StageError::new(ErrorKind::StageFailure, "stage did not run")
                    });
                    missing_reasons.insert(stage, reason);
                }
            }
        }

        let score_basis = self.score_basis(&sections);
        let overall_score: Option<f64> = if score_basis.is_empty() {
            None
        } else {
            let raw: f64 = score_basis.iter().map(|s| s.score * s.weight).sum();
            Some(round_score(raw))
        };

        let critical_flags = critical_flags(&sections);
        let recommendation = self.recommend(overall_score, critical_flags.len(), &missing_sections);
        let confidence = if missing_sections.is_empty() {
            Confidence::Full
        } else {
            Confidence::Reduced
        };

        let company_name = stage_results
            .get(&StageName::Extraction)
            .and_then(|r| match &r.payload {
                Some(StagePayload::Extraction(profile)) => Some(profile.company_name.clone()),
                _ => None,
            });

        Report {
            job_id,
            company_name,
            sections,
            missing_sections,
            missing_reasons,
            overall_score,
            score_basis,
            recommendation,
            confidence,
            critical_flags,
            synthesis: None,
        }
    }

    /// Per-section scores with weights renormalized over available sections.
    fn score_basis(&self, sections: &BTreeMap<StageName, StagePayload>) -> Vec<SectionScore> {
        let scored: Vec<(StageName, f64, f64)> = sections
            .iter()
            .filter_map(|(stage, payload)| {
                payload
                    .section_score()
                    .map(|score| (*stage, score, self.policy.weight(*stage)))
            })
            .collect();

        if scored.is_empty() {
            return Vec::new();
        }

        let total: f64 = scored.iter().map(|(_, _, w)| w).sum();
        let equal = 1.0 / scored.len() as f64;

        scored
            .into_iter()
            .map(|(stage, score, weight)| SectionScore {
                stage,
                score,
                weight: if total > 0.0 { weight / total } else { equal },
            })
            .collect()
    }

    fn recommend(
        &self,
        score: Option<f64>,
        high_flags: usize,
        missing: &BTreeSet<StageName>,
    ) -> Recommendation {
        if self
            .policy
            .critical_dimensions
            .iter()
            .any(|stage| missing.contains(stage))
        {
            return Recommendation::InsufficientData;
        }

        match score {
            None => Recommendation::InsufficientData,
            Some(s) if s >= 80.0 && high_flags == 0 => Recommendation::StronglyRecommend,
            Some(s) if s >= 65.0 && high_flags <= 1 => Recommendation::Recommend,
            Some(s) if s >= 50.0 => Recommendation::ProceedWithCaution,
            Some(_) => Recommendation::DoNotRecommend,
        }
    }
}

/// Two decimals, so weight renormalization noise never flips a threshold.
fn round_score(raw: f64) -> f64 {
    (raw * 100.0).round() / 100.0
}

/// High-severity flags across sections, in section order, deduplicated.
fn critical_flags(sections: &BTreeMap<StageName, StagePayload>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    sections
        .values()
        .flat_map(|payload| payload.flags())
        .filter(|flag| flag.severity == FlagSeverity::High)
        .map(|flag| flag.to_string())
        .filter(|line| seen.insert(line.clone()))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analysis::payload::{
        CompanyProfile, Flag, FinancialAnalysis, MarketAnalysis, RiskAssessment, SynthesisOutput,
    };

    pub(crate) fn financial(score: f64, flags: Vec<Flag>) -> StagePayload {
        StagePayload::Financial(FinancialAnalysis {
            score,
            confidence: 0.92,
            insights: vec!["Revenue growth rate of 15% MoM shows strong traction".to_string()],
            metrics: [("burn_rate".to_string(), 85000.0)].into_iter().collect(),
            recommendations: vec![],
            flags,
        })
    }

    pub(crate) fn risk(risk_score: f64) -> StagePayload {
        StagePayload::Risk(RiskAssessment {
            risk_score,
            confidence: 0.88,
            insights: vec!["Team risk: Low".to_string()],
            mitigations: vec![],
            flags: vec![],
        })
    }

    pub(crate) fn market(score: f64) -> StagePayload {
        StagePayload::Market(MarketAnalysis {
            score,
            confidence: 0.82,
            insights: vec!["Market growing at 23% CAGR".to_string()],
            competitors: vec!["Incumbent Inc".to_string()],
            metrics: BTreeMap::new(),
            recommendations: vec![],
            flags: vec![],
        })
    }

    pub(crate) fn synthesis() -> StagePayload {
        StagePayload::Synthesis(SynthesisOutput {
            executive_summary: "Promising company with concentration risk".to_string(),
            key_highlights: vec!["Strong growth".to_string()],
            critical_concerns: vec!["Customer concentration".to_string()],
            next_steps: vec!["Review customer contracts".to_string()],
        })
    }

    pub(crate) fn extraction() -> StagePayload {
        StagePayload::Extraction(CompanyProfile {
            company_name: "TechFlow AI".to_string(),
            sector: Some("Artificial Intelligence".to_string()),
            stage: Some("Series A".to_string()),
            summary: "Workflow automation".to_string(),
            key_facts: vec![],
            financial_data: BTreeMap::new(),
        })
    }

    fn ok(payload: StagePayload) -> StageResult {
        StageResult::succeeded(payload.stage(), 1, payload)
    }

    fn failed(stage: StageName, kind: ErrorKind) -> StageResult {
        StageResult::failed(stage, 3, StageError::new(kind, "gave up"))
    }

    fn results(items: Vec<StageResult>) -> BTreeMap<StageName, StageResult> {
        items.into_iter().map(|r| (r.stage, r)).collect()
    }

    #[test]
    fn test_full_report() {
        let aggregator = ResultAggregator::default();
        let all = results(vec![
            ok(extraction()),
            ok(financial(80.0, vec![])),
            ok(risk(20.0)),
            ok(market(80.0)),
            ok(synthesis()),
        ]);

        let report = aggregator.aggregate(JobId::new(), &all).unwrap();
        assert_eq!(report.sections.len(), 3);
        assert!(report.missing_sections.is_empty());
        assert_eq!(report.confidence, Confidence::Full);
        assert_eq!(report.company_name.as_deref(), Some("TechFlow AI"));
        let score = report.overall_score.unwrap();
        assert!((score - 80.0).abs() < 1e-9);
        assert_eq!(report.recommendation, Recommendation::StronglyRecommend);
        assert!(report.synthesis.is_some());
    }

    #[test]
    fn test_missing_section_renormalizes_weights() {
        let aggregator = ResultAggregator::default();
        let partial = results(vec![
            ok(extraction()),
            ok(financial(80.0, vec![])),
            failed(StageName::Risk, ErrorKind::CapabilityTimeout),
            ok(market(60.0)),
            ok(synthesis()),
        ]);

        let report = aggregator.aggregate(JobId::new(), &partial).unwrap();
        assert_eq!(
            report.missing_sections,
            [StageName::Risk].into_iter().collect::<BTreeSet<_>>()
        );
        assert_eq!(
            report.sections.keys().copied().collect::<Vec<_>>(),
            vec![StageName::Financial, StageName::Market]
        );
        assert_eq!(
            report.missing_reasons[&StageName::Risk].kind,
            ErrorKind::CapabilityTimeout
        );

        // 0.3 * 80 + 0.2 * 60 over a total weight of 0.5
        let score = report.overall_score.unwrap();
        assert!((score - 72.0).abs() < 1e-9);
        let weight_sum: f64 = report.score_basis.iter().map(|s| s.weight).sum();
        assert!((weight_sum - 1.0).abs() < 1e-9);
        assert_eq!(report.confidence, Confidence::Reduced);
        assert_eq!(report.recommendation, Recommendation::Recommend);
    }

    #[test]
    fn test_all_analysis_failed() {
        let aggregator = ResultAggregator::default();
        let none = results(vec![
            ok(extraction()),
            failed(StageName::Financial, ErrorKind::CapabilityUnavailable),
            failed(StageName::Risk, ErrorKind::CapabilityTimeout),
            failed(StageName::Market, ErrorKind::CapabilityMalformedResponse),
        ]);

        let err = aggregator.aggregate(JobId::new(), &none).unwrap_err();
        assert_eq!(err, AggregationError::NoViableSections);
        assert!(aggregator.partial(JobId::new(), &none).overall_score.is_none());
    }

    #[test]
    fn test_synthesis_failure() {
        let aggregator = ResultAggregator::default();
        let synth_failed = results(vec![
            ok(financial(70.0, vec![])),
            ok(risk(40.0)),
            ok(market(70.0)),
            failed(StageName::Synthesis, ErrorKind::CapabilityMalformedResponse),
        ]);

        match aggregator.aggregate(JobId::new(), &synth_failed) {
            Err(AggregationError::SynthesisFailed(err)) => {
                assert_eq!(err.kind, ErrorKind::CapabilityMalformedResponse)
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let aggregator = ResultAggregator::default();
        let id = JobId::new();
        let all = results(vec![
            ok(extraction()),
            ok(financial(
                66.0,
                vec![Flag {
                    severity: FlagSeverity::High,
                    message: "Customer concentration exceeds 60%".to_string(),
                }],
            )),
            failed(StageName::Risk, ErrorKind::CapabilityTimeout),
            ok(market(71.0)),
            ok(synthesis()),
        ]);

        let first = serde_json::to_vec(&aggregator.aggregate(id, &all).unwrap()).unwrap();
        let second = serde_json::to_vec(&aggregator.aggregate(id, &all).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_critical_dimension_is_insufficient_data() {
        let aggregator = ResultAggregator::default();
        let no_financials = results(vec![
            failed(StageName::Financial, ErrorKind::CapabilityTimeout),
            ok(risk(10.0)),
            ok(market(95.0)),
            ok(synthesis()),
        ]);

        let report = aggregator.aggregate(JobId::new(), &no_financials).unwrap();
        assert_eq!(report.recommendation, Recommendation::InsufficientData);
        assert!(report.overall_score.is_some());
    }

    #[test]
    fn test_high_flags_lower_recommendation() {
        let policy = ScoringPolicy {
            critical_dimensions: BTreeSet::new(),
            ..ScoringPolicy::default()
        };
        let aggregator = ResultAggregator::new(policy);
        let flag = |m: &str| Flag {
            severity: FlagSeverity::High,
            message: m.to_string(),
        };
        let flagged = results(vec![
            ok(financial(85.0, vec![flag("Burn rate"), flag("Concentration")])),
            ok(market(85.0)),
            ok(synthesis()),
        ]);

        let report = aggregator.aggregate(JobId::new(), &flagged).unwrap();
        assert_eq!(report.critical_flags.len(), 2);
        assert_eq!(report.recommendation, Recommendation::ProceedWithCaution);
    }

    #[test]
    fn test_zero_weights_fall_back_to_equal() {
        let mut policy = ScoringPolicy::default();
        policy.weights.insert(StageName::Financial, 0.0);
        policy.weights.insert(StageName::Market, 0.0);
        let aggregator = ResultAggregator::new(policy);
        let two = results(vec![ok(financial(40.0, vec![])), ok(market(60.0))]);

        let report = aggregator.partial(JobId::new(), &two);
        assert!((report.overall_score.unwrap() - 50.0).abs() < 1e-9);
    }
}
