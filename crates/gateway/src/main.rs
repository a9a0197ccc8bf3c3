//! ProspectForge API Gateway
//!
//! The HTTP edge of the research pipeline.
//! Handles:
//! - Result callbacks from the research job runner and the enrichment service
//! - Research control (start, retry, stop, progress)
//! - Rate limiting
//! - Observability (logging, metrics, request ids)

mod autotrigger;
mod handlers;
mod middleware;

#[cfg(test)]
mod test_support;

use anyhow::Context;
use axum::{
    extract::{FromRef, Request},
    middleware::Next,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use prospectforge_common::{
    config::{AppConfig, AuthConfig, ObservabilityConfig},
    db::{DbPool, MemoryStore, Repository, ResearchStore},
    events::{spawn_pg_listener, EventBus},
    metrics::{self, LATENCY_BUCKETS, METRICS_PREFIX, WEBHOOK_BUCKETS},
    webhook::{ClayClient, EnrichmentSink, HttpWebhookClient, ResearchWebhook},
};
use prospectforge_orchestrator::{EnrichmentDispatcher, OrchestratorRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Database URL that selects the in-process store
const MEMORY_DATABASE_URL: &str = "memory://";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn ResearchStore>,
    pub webhook: Arc<dyn ResearchWebhook>,
    pub registry: Arc<OrchestratorRegistry>,
    pub enrichment: Arc<EnrichmentDispatcher>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn ResearchStore>,
        webhook: Arc<dyn ResearchWebhook>,
        sink: Option<Arc<dyn EnrichmentSink>>,
        bus: EventBus,
    ) -> Self {
        let registry = OrchestratorRegistry::new(
            store.clone(),
            webhook.clone(),
            bus,
            config.orchestrator.clone(),
        );
        let enrichment = EnrichmentDispatcher::new(store.clone(), sink);

        Self {
            config,
            store,
            webhook,
            registry: Arc::new(registry),
            enrichment: Arc::new(enrichment),
        }
    }
}

impl FromRef<AppState> for AuthConfig {
    fn from_ref(state: &AppState) -> Self {
        state.config.auth.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.observability);

    info!("Starting ProspectForge API Gateway v{}", prospectforge_common::VERSION);

    // Initialize metrics
    install_metrics_exporter(&config.observability)?;
    metrics::register_metrics();

    let config = Arc::new(config);
    let bus = EventBus::new(config.realtime.capacity);
    let store = connect_store(&config, &bus).await?;

    let webhook: Arc<dyn ResearchWebhook> = Arc::new(HttpWebhookClient::new(&config.webhooks)?);
    let sink = ClayClient::from_config(&config.enrichment)?
        .map(|client| Arc::new(client) as Arc<dyn EnrichmentSink>);
    if sink.is_none() {
        warn!("Enrichment webhook not configured, prospect enrichment disabled");
    }

    // Create app state
    let state = AppState::new(config.clone(), store, webhook, sink, bus);

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_metrics_exporter(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], config.metrics_port)))
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_request_duration_seconds", METRICS_PREFIX)),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_webhook_duration_seconds", METRICS_PREFIX)),
            WEBHOOK_BUCKETS,
        )?
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(port = config.metrics_port, "Metrics exporter listening");
    Ok(())
}

/// Postgres store with the realtime bridge, or the in-process store
async fn connect_store(config: &AppConfig, bus: &EventBus) -> anyhow::Result<Arc<dyn ResearchStore>> {
    if config.database.url == MEMORY_DATABASE_URL {
        warn!("Using the in-memory store; data is lost on restart");
        return Ok(Arc::new(MemoryStore::with_events(bus.clone())));
    }

    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    if config.database.run_migrations {
        db.migrate().await?;
    }

    let pg_pool = db.write().get_postgres_connection_pool().clone();
    let store: Arc<dyn ResearchStore> = Arc::new(Repository::new(db));

    if config.realtime.listen {
        spawn_pg_listener(pg_pool, store.clone(), bus.clone());
    } else {
        warn!("Realtime listener disabled; callbacks will not update running batches");
    }

    Ok(store)
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Callbacks from the job runner and the enrichment service
    let mut callback_routes = Router::new()
        .route(
            "/callbacks/company-research",
            post(handlers::callbacks::company_research),
        )
        .route(
            "/callbacks/prospect-research",
            post(handlers::callbacks::prospect_research),
        )
        .route("/callbacks/enrichment", post(handlers::enrichment::callback));

    if state.config.rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            state.config.rate_limit.requests_per_second,
            state.config.rate_limit.burst,
        );
        callback_routes = callback_routes.layer(axum::middleware::from_fn(
            move |req: Request, next: Next| {
                middleware::rate_limit::rate_limit_middleware(req, next, limiter.clone())
            },
        ));
    }

    // Presentation-facing research control
    let control_routes = Router::new()
        .route(
            "/campaigns/{id}/research",
            post(handlers::research::start_research),
        )
        .route("/companies/{id}/retry", post(handlers::research::retry))
        .route("/research/stop", post(handlers::research::stop))
        .route("/research/progress", get(handlers::research::progress))
        .route("/prospects/enrich", post(handlers::enrichment::enrich));

    let api_routes = callback_routes.merge(control_routes);

    // Compose the app
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(axum::middleware::from_fn(middleware::metrics::track_metrics))
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
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
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
