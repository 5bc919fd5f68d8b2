//! Observability setup for waypoint: tracing subscriber with plain or JSON
//! output and optional OpenTelemetry span export.

pub mod tracing_setup;
