//! Typed stage outputs.
//!
//! Every stage produces one variant of [`StagePayload`]. The capability
//! gateway validates the raw JSON against the stage's output schema; the
//! stage runner then decodes it here.

use crate::models::StageName;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Severity of a flag raised by an analysis stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagSeverity {
    Low,
    Medium,
    High,
}

impl fmt::Display for FlagSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagSeverity::Low => write!(f, "LOW RISK"),
            FlagSeverity::Medium => write!(f, "MEDIUM RISK"),
            FlagSeverity::High => write!(f, "HIGH RISK"),
        }
    }
}

/// A red flag noted by an analysis stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    pub severity: FlagSeverity,
    pub message: String,
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// Structured company facts extracted from the documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub company_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub summary: String,
    #[serde(default)]
    pub key_facts: Vec<String>,
    /// Figures such as monthly revenue, burn rate, cash balance.
    #[serde(default)]
    pub financial_data: BTreeMap<String, f64>,
}

/// Output of the financial stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialAnalysis {
    /// Financial health, 0-100, higher is better.
    pub score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub flags: Vec<Flag>,
}

/// Output of the risk stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Overall risk, 0-100, lower is better.
    pub risk_score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub mitigations: Vec<String>,
    #[serde(default)]
    pub flags: Vec<Flag>,
}

impl RiskAssessment {
    pub fn risk_level(&self) -> &'static str {
        match self.risk_score {
            s if s < 25.0 => "Low",
            s if s < 50.0 => "Medium",
            s if s < 75.0 => "High",
            _ => "Very High",
        }
    }
}

/// Output of the market stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketAnalysis {
    /// Market attractiveness, 0-100, higher is better.
    pub score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub competitors: Vec<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub flags: Vec<Flag>,
}

/// Output of the synthesis stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisOutput {
    pub executive_summary: String,
    #[serde(default)]
    pub key_highlights: Vec<String>,
    #[serde(default)]
    pub critical_concerns: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

/// Tagged union of stage outputs, keyed by stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "data", rename_all = "lowercase")]
pub enum StagePayload {
    Extraction(CompanyProfile),
    Financial(FinancialAnalysis),
    Risk(RiskAssessment),
    Market(MarketAnalysis),
    Synthesis(SynthesisOutput),
}

impl StagePayload {
    /// Decode a schema-validated gateway result into the stage's payload.
    pub fn decode(stage: StageName, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match stage {
            StageName::Extraction => StagePayload::Extraction(serde_json::from_value(value)?),
            StageName::Financial => StagePayload::Financial(serde_json::from_value(value)?),
            StageName::Risk => StagePayload::Risk(serde_json::from_value(value)?),
            StageName::Market => StagePayload::Market(serde_json::from_value(value)?),
            StageName::Synthesis => StagePayload::Synthesis(serde_json::from_value(value)?),
        })
    }

    pub fn stage(&self) -> StageName {
        match self {
            StagePayload::Extraction(_) => StageName::Extraction,
            StagePayload::Financial(_) => StageName::Financial,
            StagePayload::Risk(_) => StageName::Risk,
            StagePayload::Market(_) => StageName::Market,
            StagePayload::Synthesis(_) => StageName::Synthesis,
        }
    }

    /// Contribution to the overall score, on a 0-100 "higher is better" scale.
    pub fn section_score(&self) -> Option<f64> {
        let raw = match self {
            StagePayload::Financial(f) => f.score,
            StagePayload::Risk(r) => 100.0 - r.risk_score,
            StagePayload::Market(m) => m.score,
            StagePayload::Extraction(_) | StagePayload::Synthesis(_) => return None,
        };
        Some(raw.clamp(0.0, 100.0))
    }

    pub fn flags(&self) -> &[Flag] {
        match self {
            StagePayload::Financial(f) => &f.flags,
            StagePayload::Risk(r) => &r.flags,
            StagePayload::Market(m) => &m.flags,
            StagePayload::Extraction(_) | StagePayload::Synthesis(_) => &[],
        }
    }

    pub fn insights(&self) -> &[String] {
        match self {
            StagePayload::Financial(f) => &f.insights,
            StagePayload::Risk(r) => &r.insights,
            StagePayload::Market(m) => &m.insights,
            StagePayload::Extraction(p) => &p.key_facts,
            StagePayload::Synthesis(s) => &s.key_highlights,
        }
    }

    /// Payload as plain JSON, without the stage tag.
    pub fn to_data(&self) -> Value {
        let encoded = match self {
            StagePayload::Extraction(p) => serde_json::to_value(p),
            StagePayload::Financial(f) => serde_json::to_value(f),
            StagePayload::Risk(r) => serde_json::to_value(r),
            StagePayload::Market(m) => serde_json::to_value(m),
            StagePayload::Synthesis(s) => serde_json::to_value(s),
        };
        encoded.unwrap_or(Value::Null)
    }
}
