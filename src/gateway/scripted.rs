//! In-memory gateway for tests.

use crate::error::CapabilityError;
use crate::gateway::schema::OutputSchema;
use crate::gateway::CapabilityGateway;
use crate::models::StageName;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// What the gateway does for one call.
#[derive(Debug, Clone)]
pub enum Step {
    Respond(Value),
    Fail(CapabilityError),
    /// Respond after a delay.
    Delayed(Duration, Value),
    /// Never respond.
    Hang,
}

/// Replays scripted steps per stage and counts calls.
///
/// Queued steps are consumed first; afterwards the stage's fallback step
/// repeats forever. Responses are schema-checked like a real gateway.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    queued: Mutex<HashMap<StageName, VecDeque<Step>>>,
    fallback: Mutex<HashMap<StageName, Step>>,
    calls: Mutex<HashMap<StageName, u32>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stage answers with a valid response.
    pub fn happy() -> Self {
        let gateway = Self::new();
        for stage in StageName::ALL {
            gateway.set_always(stage, Step::Respond(valid_response(stage)));
        }
        gateway
    }

    pub fn always(self, stage: StageName, step: Step) -> Self {
        self.set_always(stage, step);
        self
    }

    pub fn then(self, stage: StageName, step: Step) -> Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.entry(stage).or_default().push_back(step);
        }
        self
    }

    fn set_always(&self, stage: StageName, step: Step) {
        if let Ok(mut fallback) = self.fallback.lock() {
            fallback.insert(stage, step);
        }
    }

    pub fn calls(&self, stage: StageName) -> u32 {
        self.calls
            .lock()
            .map(|calls| calls.get(&stage).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn next_step(&self, stage: StageName) -> Step {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(stage).or_default() += 1;
        }
        let queued = self
            .queued
            .lock()
            .ok()
            .and_then(|mut queued| queued.get_mut(&stage).and_then(VecDeque::pop_front));
        queued
            .or_else(|| {
                self.fallback
                    .lock()
                    .ok()
                    .and_then(|fallback| fallback.get(&stage).cloned())
            })
            .unwrap_or_else(|| {
                Step::Fail(CapabilityError::Unavailable(format!(
                    "no script for stage {}",
                    stage
                )))
            })
    }
}

#[async_trait]
impl CapabilityGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(
        &self,
        stage: StageName,
        _input: &Value,
        schema: &OutputSchema,
    ) -> Result<Value, CapabilityError> {
        let value = match self.next_step(stage) {
            Step::Respond(value) => value,
            Step::Fail(err) => return Err(err),
            Step::Delayed(delay, value) => {
                tokio::time::sleep(delay).await;
                value
            }
            Step::Hang => std::future::pending::<Value>().await,
        };
        schema
            .validate(&value)
            .map_err(CapabilityError::MalformedResponse)?;
        Ok(value)
    }
}

/// A schema-valid response for `stage`.
pub fn valid_response(stage: StageName) -> Value {
    match stage {
        StageName::Extraction => json!({
            "company_name": "TechFlow AI",
            "sector": "Artificial Intelligence",
            "stage": "Series A",
            "summary": "AI-powered workflow automation for mid-market companies",
            "key_facts": ["Founded in 2021", "45 employees"],
            "financial_data": {"monthly_revenue": 250000.0, "burn_rate": 85000.0}
        }),
        StageName::Financial => json!({
            "score": 78.5,
            "confidence": 0.92,
            "insights": ["Revenue growth rate of 15% MoM shows strong traction"],
            "metrics": {"runway_months": 18.0},
            "recommendations": ["Diversify the customer base"],
            "flags": [{"severity": "high", "message": "Customer concentration exceeds 60%"}]
        }),
        StageName::Risk => json!({
            "risk_score": 35.5,
            "confidence": 0.88,
            "insights": ["Team risk: Low"],
            "mitigations": ["Multi-year contracts with key customers"],
            "flags": []
        }),
        StageName::Market => json!({
            "score": 82.0,
            "confidence": 0.82,
            "insights": ["Market growing at 23% CAGR"],
            "competitors": ["UiPath", "Zapier"],
            "flags": [{"severity": "medium", "message": "Crowded segment"}]
        }),
        StageName::Synthesis => json!({
            "executive_summary": "Strong growth with manageable risk.",
            "key_highlights": ["15% MoM growth", "78% gross margin", "Experienced team", "Low churn"],
            "critical_concerns": ["Customer concentration", "Crowded market", "Short runway"],
            "next_steps": ["Review top customer contracts"]
        }),
    }
}
