//! Capability gateway.
//!
//! The single seam through which stages reach the external reasoning
//! capability. Gateways validate the response against the stage's
//! [`OutputSchema`] and never retry; retries belong to the stage runner.

pub mod ollama;
pub mod prompts;
pub mod schema;

#[cfg(test)]
pub mod scripted;

pub use ollama::{OllamaConfig, OllamaGateway};
pub use schema::OutputSchema;

use crate::error::CapabilityError;
use crate::models::StageName;
use async_trait::async_trait;
use serde_json::Value;

/// Uniform interface to the reasoning capability.
#[async_trait]
pub trait CapabilityGateway: Send + Sync {
    /// Short name used in logs and health output.
    fn name(&self) -> &str;

    /// Run one stage call and return a result that conforms to `schema`.
    async fn invoke(
        &self,
        stage: StageName,
        input: &Value,
        schema: &OutputSchema,
    ) -> Result<Value, CapabilityError>;

    /// Whether the capability is reachable.
    async fn health(&self) -> Result<(), CapabilityError> {
        Ok(())
    }
}
