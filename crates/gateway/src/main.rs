//! ResearchForge API Gateway
//!
//! The HTTP entry point for the research service.
//! Handles:
//! - Request validation
//! - Rate limiting
//! - Request routing
//! - Observability (logging, metrics, request ids)

mod handlers;
mod middleware;

use axum::{
    http::HeaderName,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use researchforge_common::{
    cache::Cache,
    config::{AppConfig, ObservabilityConfig},
    llm::create_language_model,
    metrics, RetryPolicy,
};
use researchforge_context::{PipelineSettings, ResearchService};
use researchforge_search::{HttpPageFetcher, SerpApiNewsProvider, SerperSearchProvider};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub service: Arc<ResearchService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Arc::new(AppConfig::load()?);
    init_tracing(&config.observability);
    info!(
        service = %config.observability.service_name,
        "Starting ResearchForge API Gateway v{}",
        researchforge_common::VERSION
    );

    init_metrics(config.observability.metrics_port)?;

    // Shared collaborators
    let cache = Cache::from_config(&config.redis).await;
    info!(backend = cache.backend_name(), "Cache ready");

    let llm = create_language_model(&config.llm)?;
    let retry = RetryPolicy::from_config(&config.retry);
    let search = Arc::new(SerperSearchProvider::new(&config.search, retry.clone())?);
    let news = Arc::new(SerpApiNewsProvider::new(&config.news, retry, cache.clone())?);
    let fetcher = Arc::new(HttpPageFetcher::new(&config.fetcher)?);

    let service = ResearchService::new(
        llm,
        search,
        news,
        fetcher,
        cache,
        PipelineSettings::from_config(&config),
    );

    let state = AppState {
        config: config.clone(),
        service: Arc::new(service),
    };
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let drain = config.shutdown_timeout();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Bound the drain so a stuck research run cannot hold the process
            tokio::spawn(async move {
                tokio::time::sleep(drain).await;
                warn!(timeout_secs = drain.as_secs(), "Shutdown timeout elapsed, exiting");
                std::process::exit(0);
            });
        })
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_logging {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

/// Serve Prometheus metrics on `port`; 0 disables the exporter
fn init_metrics(port: u16) -> anyhow::Result<()> {
    if port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()?;
    metrics::register_metrics();
    info!(port, "Metrics exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let header = HeaderName::try_from(state.config.server.request_id_header.as_str())
        .unwrap_or_else(|_| HeaderName::from_static("x-request-id"));
    let request_id = SetRequestIdLayer::new(header.clone(), MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::new(header);

    let timeout = TimeoutLayer::new(state.config.request_timeout().max(Duration::from_secs(1)));
    let limiter = middleware::rate_limit::create_rate_limiter(&state.config.rate_limit);

    let api_routes = Router::new()
        .route("/research", post(handlers::research::research))
        .route("/search", post(handlers::search::search))
        .route("/news", post(handlers::search::news))
        .route("/scrape", post(handlers::scrape::scrape))
        .route("/chat", post(handlers::chat::chat))
        .layer(axum::middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ));

    Router::new()
        // Health endpoints are never rate limited
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .merge(api_routes)
        .layer(axum::middleware::from_fn(middleware::metrics::track_requests))
        .layer(timeout)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use researchforge_common::llm::MockLanguageModel;
    use researchforge_search::mock::{MockNewsProvider, MockPageFetcher, MockSearchProvider};

    /// Router over scripted providers and an in-memory cache
    pub fn router_with(config: AppConfig, search: Arc<MockSearchProvider>) -> Router {
        let service = ResearchService::new(
            Arc::new(MockLanguageModel::new().with_default("Mock answer [Source 1].")),
            search,
            Arc::new(MockNewsProvider::new()),
            Arc::new(MockPageFetcher::new()),
            Cache::in_memory(),
            PipelineSettings {
                retry: RetryPolicy::none(),
                ..PipelineSettings::from_config(&config)
            },
        );
        create_router(AppState {
            config: Arc::new(config),
            service: Arc::new(service),
        })
    }
}
