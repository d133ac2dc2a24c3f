//! Distributed tracing support.
//!
//! # Responsibilities
//! - Build the OTLP exporter pipeline feeding `tracing-opentelemetry`
//! - Sample by trace id ratio, respecting the parent's decision
//!
//! # Design Decisions
//! - Optional: spans are only exported when an endpoint is configured
//! - Export runs on the Tokio runtime in batches

use std::time::Duration;

use opentelemetry::trace::TraceError;
use opentelemetry::{KeyValue, Value};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{BatchConfig, RandomIdGenerator, Sampler, Tracer};
use opentelemetry_sdk::{runtime, Resource};

/// Build an OTLP tracer exporting to `endpoint`.
pub fn init_tracer(endpoint: &str, sampling_rate: f64, service_name: &str) -> Result<Tracer, TraceError> {
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                    sampling_rate,
                ))))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    Value::from(service_name.to_string()),
                )])),
        )
        .with_batch_config(BatchConfig::default())
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_timeout(Duration::from_secs(3)),
        )
        .install_batch(runtime::Tokio)
}

/// Flush and stop span export.
pub fn shutdown_tracer() {
    opentelemetry::global::shutdown_tracer_provider();
}
