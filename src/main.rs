use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rategate::cache::CoalescingCache;
use rategate::config::Config;
use rategate::error::RategateError;
use rategate::metrics::{create_metrics, SharedMetrics};
use rategate::services::pricing::{PricingService, RateApi, RateQuery};
use rategate::store::{KvStore, RedisStore};
use rategate::utils::ascii::print_startup_banner;

/// rategate - caching proxy for the pricing oracle
#[derive(Parser, Debug)]
#[command(name = "rategate")]
#[command(author, version, about = "Read-through caching proxy for the pricing oracle", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long)]
    json_logs: bool,

    /// Server port (overrides PORT env var)
    #[arg(short, long)]
    port: Option<u16>,
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    pricing: Arc<PricingService>,
    metrics: SharedMetrics,
    store: Arc<dyn KvStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before parsing args, so env vars are available
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs)?;
    print_startup_banner();

    info!("Starting rategate v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let metrics = create_metrics();

    let store: Arc<dyn KvStore> = Arc::new(RedisStore::connect(&config.store.redis_url).await?);
    info!(url = %config.store.redis_url, "Store connected");

    let cache = Arc::new(CoalescingCache::new(
        store.clone(),
        config.cache.clone(),
        metrics.clone(),
    ));
    let api = RateApi::new(&config.upstream);
    let pricing = Arc::new(PricingService::new(api, cache));

    // Mirror slow-moving engine state into gauges
    {
        let pricing = pricing.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(5)).await;
                metrics.set_breaker_state(pricing.cache().breaker().state());
            }
        });
    }

    let state = AppState {
        pricing,
        metrics,
        store,
    };

    let app = Router::new()
        .route("/rate", get(rate_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(
        "Listening on http://{} (rates: /rate, metrics: /metrics, health: /health)",
        addr
    );

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for ctrl-c");
        info!("Shutdown signal received, draining in-flight requests...");
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("rategate shutdown complete");
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RateParams {
    period: Option<String>,
    hotel: Option<String>,
    room: Option<String>,
}

/// The single read endpoint: GET /rate?period=&hotel=&room=
async fn rate_handler(
    State(state): State<AppState>,
    Query(params): Query<RateParams>,
) -> Response {
    let query = match validate(params) {
        Ok(query) => query,
        Err(message) => {
            state.metrics.record_request(400);
            return error_response(StatusCode::BAD_REQUEST, &message);
        }
    };

    match state.pricing.rate(&query).await {
        Ok(rate) => {
            state.metrics.record_request(200);
            (StatusCode::OK, Json(json!({ "rate": rate }))).into_response()
        }
        Err(err) => {
            let status = status_for(&err);
            if status.is_server_error() {
                error!(
                    period = %query.period,
                    hotel = %query.hotel,
                    room = %query.room,
                    error = %err,
                    "Rate request failed"
                );
            } else {
                warn!(error = %err, "Rate request rejected");
            }
            state.metrics.record_request(status.as_u16());
            error_response(status, &err.to_string())
        }
    }
}

fn validate(params: RateParams) -> Result<RateQuery, String> {
    let field = |value: Option<String>, name: &str| -> Result<String, String> {
        match value {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(format!("missing or empty parameter: {name}")),
        }
    };
    Ok(RateQuery::new(
        field(params.period, "period")?,
        field(params.hotel, "hotel")?,
        field(params.room, "room")?,
    ))
}

fn status_for(err: &RategateError) -> StatusCode {
    match err {
        RategateError::Validation(_) => StatusCode::BAD_REQUEST,
        // Preserve the upstream status when it escapes the cache layer.
        RategateError::Api { code, .. } => {
            StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        RategateError::Unavailable
        | RategateError::BreakerOpen
        | RategateError::Lock(_)
        | RategateError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        RategateError::Store(_) | RategateError::Parsing(_) | RategateError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Health check endpoint
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let store_reachable = state.store.get("rategate:health-probe").await.is_ok();
    let breaker = state.pricing.cache().breaker().state();

    let status = if store_reachable { "healthy" } else { "degraded" };
    let body = json!({
        "status": status,
        "store_reachable": store_reachable,
        "breaker": breaker.to_string(),
        "version": env!("CARGO_PKG_VERSION"),
    });

    ([(header::CONTENT_TYPE, "application/json")], body.to_string())
}

fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);

    let filter = EnvFilter::new(format!("rategate={level},tower_http=info,hyper=warn"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }

    Ok(())
}
