#![deny(missing_docs)]

//! Core library for the document extraction server.

/// HTTP routing and handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Text extraction from staged documents.
pub mod extraction;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counters.
pub mod metrics;
/// Upload processing pipeline.
pub mod pipeline;
/// AI-backed structuring of extracted text.
pub mod structuring;
