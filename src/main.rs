//! servicekit demo service.
//!
//! Runs a gRPC health service with metrics interceptors next to a
//! Prometheus scrape endpoint, both managed by one actor group.
//!
//! ```text
//!   ┌──────────────── Group ────────────────┐
//!   │  GRPC :50051   health service         │
//!   │                ← metrics, validator   │
//!   │  HTTP :8080    GET /metrics           │
//!   │  signals       SIGINT / SIGTERM       │
//!   └───────────────────────────────────────┘
//!   first to return → every actor interrupted
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tonic::Status;
use tonic_health::ServingStatus;

use servicekit::config::{load_config, ServiceConfig};
use servicekit::http::{HttpServer, HttpServerOptions};
use servicekit::interceptor::Next;
use servicekit::lifecycle::{register_signal_handler, Group};
use servicekit::observability::{
    init_logging, install_recorder, metrics_router, shutdown_tracer, ServerMetrics,
};
use servicekit::transport::rpc::{RpcCall, RpcInterceptor, RpcReply, RpcServer, RpcServerOptions};
use servicekit::ctx_error;

#[derive(Parser)]
#[command(name = "servicekit-demo")]
#[command(about = "gRPC health service with a Prometheus endpoint", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override rpc.port
    #[arg(long)]
    rpc_port: Option<u16>,

    /// Override http.port
    #[arg(long)]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(port) = cli.rpc_port {
        config.rpc.port = port;
    }
    if let Some(port) = cli.http_port {
        config.http.port = port;
    }

    init_logging(&config.observability)?;

    tracing::info!(
        rpc_port = config.rpc.port,
        http_port = config.http.port,
        metrics_enabled = config.observability.metrics_enabled,
        "servicekit-demo v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_service_status("", ServingStatus::Serving)
        .await;

    let metrics = ServerMetrics::new();
    let options = RpcServerOptions::from_config(&config.rpc)
        .with_stats_handler(Arc::new(metrics))
        .with_unary_interceptors(vec![metrics.unary_interceptor(), validator()])
        .with_stream_interceptors(vec![metrics.stream_interceptor(), validator()]);
    let rpc = RpcServer::new(
        move |registrar| {
            registrar.routes().add_service(health_service);
        },
        options,
    );

    let mut group = Group::new();
    group.register_server(Arc::new(rpc));

    if config.observability.metrics_enabled {
        let handle = install_recorder()?;
        let http = HttpServer::new(
            HttpServerOptions::from_config(&config.http).with_handler(metrics_router(handle)),
        );
        group.register_server(Arc::new(http));
    }

    register_signal_handler(&mut group);

    let result = group.run().await;
    if let Err(err) = result {
        ctx_error!(error = %err, "program interrupted");
        shutdown_tracer();
        std::process::exit(1);
    }

    shutdown_tracer();
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Reject calls that do not carry a gRPC content type.
fn validator() -> RpcInterceptor {
    Arc::new(|call: RpcCall, next: Next<RpcCall, RpcReply, Status>| async move {
        let grpc = call
            .metadata
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/grpc"));
        if !grpc {
            return Err(Status::invalid_argument("expected an application/grpc request"));
        }
        next.run(call).await
    })
}
