//! PitchLens: orchestrates AI analysis of startup pitch materials.
//!
//! A submitted job runs document extraction, then financial, risk and
//! market analysis concurrently, then synthesis, and ends with an
//! aggregated investment report.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod documents;
pub mod error;
pub mod gateway;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod service;
pub mod store;
