//! Facade round-trips against a real HTTP oracle bound to a local port.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use rategate::cache::CoalescingCache;
use rategate::config::{CacheConfig, UpstreamConfig};
use rategate::error::RategateError;
use rategate::metrics::create_metrics;
use rategate::services::pricing::{PricingService, RateApi, RateQuery};
use rategate::store::{KvStore, MemoryStore};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
struct Oracle {
    hits: Arc<AtomicUsize>,
    fail_with: Option<u16>,
}

async fn rates_handler(
    State(oracle): State<Oracle>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    oracle.hits.fetch_add(1, Ordering::SeqCst);

    if headers.get("token").and_then(|v| v.to_str().ok()) != Some("secret") {
        return (StatusCode::UNAUTHORIZED, "bad token").into_response();
    }
    if let Some(code) = oracle.fail_with {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, "oracle failure").into_response();
    }

    let attribute = body["attributes"][0].clone();
    Json(json!({
        "rates": [{
            "period": attribute["period"],
            "hotel": attribute["hotel"],
            "room": attribute["room"],
            "rate": 25000,
        }]
    }))
    .into_response()
}

async fn spawn_oracle(oracle: Oracle) -> String {
    let app = Router::new()
        .route("/rates", post(rates_handler))
        .with_state(oracle);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/rates")
}

fn pricing_service(api_url: String) -> PricingService {
    let upstream = UpstreamConfig {
        api_url,
        api_token: "secret".into(),
        connect_timeout: Duration::from_secs(1),
        read_timeout: Duration::from_secs(5),
    };
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let cache = Arc::new(CoalescingCache::new(
        store,
        CacheConfig::default(),
        create_metrics(),
    ));
    PricingService::new(RateApi::new(&upstream), cache)
}

fn query() -> RateQuery {
    RateQuery::new(
        "Summer".into(),
        "FloatingPointResort".into(),
        "SingletonRoom".into(),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn round_trip_returns_the_rate_as_a_string() {
    let hits = Arc::new(AtomicUsize::new(0));
    let url = spawn_oracle(Oracle {
        hits: hits.clone(),
        fail_with: None,
    })
    .await;
    let service = pricing_service(url);

    let rate = service.rate(&query()).await.unwrap();
    assert_eq!(rate, "25000");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Second request inside the validity window is served from cache.
    let rate = service.rate(&query()).await.unwrap();
    assert_eq!(rate, "25000");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn distinct_tuples_do_not_share_entries() {
    let hits = Arc::new(AtomicUsize::new(0));
    let url = spawn_oracle(Oracle {
        hits: hits.clone(),
        fail_with: None,
    })
    .await;
    let service = pricing_service(url);

    service.rate(&query()).await.unwrap();
    let other = RateQuery::new(
        "Winter".into(),
        "FloatingPointResort".into(),
        "SingletonRoom".into(),
    );
    service.rate(&other).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn oracle_failure_with_an_empty_cache_is_unavailable() {
    let url = spawn_oracle(Oracle {
        hits: Arc::new(AtomicUsize::new(0)),
        fail_with: Some(500),
    })
    .await;
    let service = pricing_service(url);

    let err = service.rate(&query()).await.unwrap_err();
    assert!(matches!(err, RategateError::Unavailable));
}
