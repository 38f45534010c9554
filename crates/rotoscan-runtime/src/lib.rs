//! `rotoscan-runtime` – process-level wiring.
//!
//! # Modules
//!
//! - [`pipeline`] – [`ScanPipeline`][pipeline::ScanPipeline]: drives the
//!   session state machine from start/stop commands and frames, runs the
//!   difference detector against the reference profile, and fans the
//!   results out to the event bus and the session log.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export
//!   to Jaeger, Grafana Tempo, or any OTLP-compatible collector.

pub mod pipeline;
pub mod telemetry;

pub use pipeline::{PipelineConfig, ScanPipeline};
pub use telemetry::{TracerProviderGuard, init_tracing};
