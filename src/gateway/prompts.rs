//! Stage prompts sent to the reasoning capability.

use crate::gateway::schema::OutputSchema;
use crate::models::StageName;
use serde_json::Value;

/// System prompt for a stage.
pub fn system_prompt(stage: StageName) -> &'static str {
    match stage {
        StageName::Extraction => EXTRACTION_PROMPT,
        StageName::Financial => FINANCIAL_PROMPT,
        StageName::Risk => RISK_PROMPT,
        StageName::Market => MARKET_PROMPT,
        StageName::Synthesis => SYNTHESIS_PROMPT,
    }
}

/// User message carrying the stage input and the expected output fields.
pub fn user_prompt(input: &Value, schema: &OutputSchema) -> String {
    let rendered =
        serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());

    let mut prompt = String::new();
    prompt.push_str("=== INPUT ===\n\n");
    prompt.push_str(&rendered);
    prompt.push_str("\n\n=== END OF INPUT ===\n\n");
    prompt.push_str("Respond with a single JSON object containing these fields:\n");
    prompt.push_str(&schema.describe());
    prompt.push_str("\n\nOnly output valid JSON, no explanations or markdown.");
    prompt
}

const EXTRACTION_PROMPT: &str = r#"You are a document analyst at a venture capital firm.
Read the provided company documents and extract the structured facts an
investment team needs: company name, sector, funding stage, a short summary
of the business, notable facts, and every financial figure you can find.
Use the exact figures from the documents. Never invent numbers."#;

const FINANCIAL_PROMPT: &str = r#"You are a senior venture capital financial analyst.
Analyze the company's financial health from the extracted data: revenue and
growth, burn rate and runway, unit economics, margins and capital efficiency.
Score financial health from 0 to 100 where higher is better. Raise flags for
anything an investor must know, with severity low, medium or high."#;

const RISK_PROMPT: &str = r#"You are a venture capital risk assessment specialist.
Assess market, team, product, financial, competitive and regulatory risk for
the company. Produce an overall risk score from 0 to 100 where LOWER means
less risk, list concrete mitigation strategies, and raise flags with
severity low, medium or high."#;

const MARKET_PROMPT: &str = r#"You are a market research analyst covering early-stage companies.
Evaluate market size and growth, the competitive landscape, positioning and
go-to-market. Score market attractiveness from 0 to 100 where higher is
better, name the main competitors, and raise flags with severity low, medium
or high."#;

const SYNTHESIS_PROMPT: &str = r#"You are a managing partner preparing an investment memo.
Combine the available analysis sections into a verdict: a one-paragraph
executive summary, key highlights, critical concerns and concrete due
diligence next steps. Some sections may be missing; say so where it matters
and do not guess their content."#;
