use crate::config::UpstreamConfig;
use crate::error::RategateError;
use crate::services::pricing::RateQuery;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Client for the upstream pricing oracle.
#[derive(Clone)]
pub struct RateApi {
    client: Client,
    api_url: String,
    api_token: String,
}

impl RateApi {
    pub fn new(config: &UpstreamConfig) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(config.connect_timeout)
                .timeout(config.read_timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_url: config.api_url.clone(),
            api_token: config.api_token.clone(),
        }
    }

    /// One POST to the oracle. 2xx yields the parsed body; anything else is
    /// an API error carrying the upstream status. No retries here: failure
    /// policy belongs to the breaker and the stale fallback.
    #[instrument(skip(self, query), fields(period = %query.period, hotel = %query.hotel, room = %query.room))]
    pub async fn fetch_rates(&self, query: &RateQuery) -> Result<Value, RategateError> {
        let body = json!({
            "attributes": [{
                "period": query.period,
                "hotel": query.hotel,
                "room": query.room,
            }]
        });

        let started = Instant::now();
        debug!(url = %self.api_url, "Requesting rates upstream");

        let resp = self
            .client
            .post(&self.api_url)
            .header("token", &self.api_token)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if status.is_success() {
            debug!(status = %status, elapsed_ms, "Upstream call succeeded");
            resp.json::<Value>()
                .await
                .map_err(|e| RategateError::Parsing(format!("upstream body: {e}")))
        } else {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, elapsed_ms, "Upstream returned an error");
            Err(RategateError::Api {
                code: status.as_u16(),
                body,
            })
        }
    }
}
