//! Output schemas declared for each stage.
//!
//! A schema lists the top-level fields a capability response must carry, their
//! JSON kinds and, for numbers, an accepted range. The gateway checks
//! responses against it before reporting success.

use crate::models::StageName;
use serde_json::Value;
use std::fmt;

/// JSON kind of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Object,
    /// Array whose elements are all of the given kind.
    Array(ItemKind),
}

/// Element kind of an array field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    String,
    Object,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::String => write!(f, "string"),
            FieldKind::Number => write!(f, "number"),
            FieldKind::Boolean => write!(f, "boolean"),
            FieldKind::Object => write!(f, "object"),
            FieldKind::Array(ItemKind::String) => write!(f, "array of strings"),
            FieldKind::Array(ItemKind::Object) => write!(f, "array of objects"),
        }
    }
}

/// One top-level field of a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub range: Option<(f64, f64)>,
    pub description: &'static str,
}

impl FieldSpec {
    fn required(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            range: None,
            description,
        }
    }

    fn optional(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    fn within(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        let kind_ok = match self.kind {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array(item) => value.as_array().is_some_and(|items| {
                items.iter().all(|v| match item {
                    ItemKind::String => v.is_string(),
                    ItemKind::Object => v.is_object(),
                })
            }),
        };
        if !kind_ok {
            return Err(format!("field `{}` must be {}", self.name, self.kind));
        }

        if let (Some((min, max)), Some(n)) = (self.range, value.as_f64()) {
            if !(min..=max).contains(&n) {
                return Err(format!(
                    "field `{}` = {} is outside [{}, {}]",
                    self.name, n, min, max
                ));
            }
        }

        Ok(())
    }
}

/// Expected shape of a stage's capability response.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub stage: StageName,
    pub fields: Vec<FieldSpec>,
}

impl OutputSchema {
    /// The schema every gateway call for `stage` is validated against.
    pub fn for_stage(stage: StageName) -> Self {
        use FieldKind::*;

        let flags = || {
            FieldSpec::optional(
                "flags",
                Array(ItemKind::Object),
                "red flags as {\"severity\": \"low|medium|high\", \"message\": string}",
            )
        };
        let confidence =
            || FieldSpec::required("confidence", Number, "confidence in this analysis").within(0.0, 1.0);

        let fields = match stage {
            StageName::Extraction => vec![
                FieldSpec::required("company_name", String, "legal or trading name"),
                FieldSpec::optional("sector", String, "industry sector"),
                FieldSpec::optional("stage", String, "funding stage, e.g. Seed or Series A"),
                FieldSpec::required("summary", String, "what the company does"),
                FieldSpec::optional("key_facts", Array(ItemKind::String), "notable facts"),
                FieldSpec::optional(
                    "financial_data",
                    Object,
                    "numeric figures keyed by name, e.g. monthly_revenue, burn_rate",
                ),
            ],
            StageName::Financial => vec![
                FieldSpec::required("score", Number, "financial health, higher is better")
                    .within(0.0, 100.0),
                confidence(),
                FieldSpec::optional("insights", Array(ItemKind::String), "financial insights"),
                FieldSpec::optional("metrics", Object, "numeric metrics keyed by name"),
                FieldSpec::optional("recommendations", Array(ItemKind::String), "actions"),
                flags(),
            ],
            StageName::Risk => vec![
                FieldSpec::required("risk_score", Number, "overall risk, lower is better")
                    .within(0.0, 100.0),
                confidence(),
                FieldSpec::optional("insights", Array(ItemKind::String), "risk findings by area"),
                FieldSpec::optional("mitigations", Array(ItemKind::String), "mitigation strategies"),
                flags(),
            ],
            StageName::Market => vec![
                FieldSpec::required("score", Number, "market attractiveness, higher is better")
                    .within(0.0, 100.0),
                confidence(),
                FieldSpec::optional("insights", Array(ItemKind::String), "market insights"),
                FieldSpec::optional("competitors", Array(ItemKind::String), "main competitors"),
                FieldSpec::optional("metrics", Object, "numeric metrics keyed by name"),
                FieldSpec::optional("recommendations", Array(ItemKind::String), "actions"),
                flags(),
            ],
            StageName::Synthesis => vec![
                FieldSpec::required("executive_summary", String, "one-paragraph verdict"),
                FieldSpec::optional("key_highlights", Array(ItemKind::String), "strengths"),
                FieldSpec::optional("critical_concerns", Array(ItemKind::String), "concerns"),
                FieldSpec::optional("next_steps", Array(ItemKind::String), "due diligence steps"),
            ],
        };

        Self { stage, fields }
    }

    /// Check a response against this schema.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        let object = value
            .as_object()
            .ok_or_else(|| "response is not a JSON object".to_string())?;

        for field in &self.fields {
            match object.get(field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(format!("missing required field `{}`", field.name));
                }
                None | Some(Value::Null) => {}
                Some(v) => field.check(v)?,
            }
        }

        Ok(())
    }

    /// Field listing suitable for inclusion in a prompt.
    pub fn describe(&self) -> String {
        self.fields
            .iter()
            .map(|f| {
                let range = f
                    .range
                    .map(|(min, max)| format!(", {} to {}", min, max))
                    .unwrap_or_default();
                let required = if f.required { "required" } else { "optional" };
                format!(
                    "- \"{}\" ({}, {}{}): {}",
                    f.name, f.kind, required, range, f.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
