//! Ingestion pipeline: mail → classifier → task store.
//!
//! - `sanitize`: body preparation for the prompt and for storage
//! - `classifier`: LLM task classification
//! - `ingest`: the periodic scheduler that ties them together

pub mod classifier;
pub mod ingest;
pub mod routes;
pub mod sanitize;

pub use classifier::{ClassificationResult, TaskClassifier, UrgencySignals};
pub use ingest::{IngestionScheduler, TickReport, spawn_ingestion_scheduler};
pub use routes::health_routes;
