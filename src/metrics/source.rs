use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use crate::{
    assets::{PreparedImage, decode_avatar},
    foundation::error::{StatcastError, StatcastResult},
    metrics::document::{ChannelStats, StreamStats},
};

/// Where channel and live-stream statistics come from.
///
/// Implementations do not need to enforce timeouts themselves; the fetcher wraps every call.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn channel_stats(&self) -> StatcastResult<ChannelStats>;

    async fn stream_stats(&self) -> StatcastResult<StreamStats>;

    /// Download and decode an avatar to a circle of `diameter` pixels.
    async fn avatar(&self, url: &str, diameter: u32) -> StatcastResult<PreparedImage>;
}

/// Endpoints of the counter API, already resolved to concrete URLs.
#[derive(Clone, Debug)]
pub struct HttpEndpoints {
    pub channel_url: String,
    pub stream_url: String,
}

impl HttpEndpoints {
    /// Substitute `{id}` in each template.
    pub fn from_templates(
        channel_template: &str,
        channel_id: &str,
        stream_template: &str,
        stream_id: &str,
    ) -> Self {
        Self {
            channel_url: channel_template.replace("{id}", channel_id),
            stream_url: stream_template.replace("{id}", stream_id),
        }
    }
}

/// [`MetricsSource`] backed by plain HTTP GETs returning JSON.
pub struct HttpMetricsSource {
    client: reqwest::Client,
    endpoints: HttpEndpoints,
}

impl HttpMetricsSource {
    pub fn new(endpoints: HttpEndpoints, timeout: Duration) -> StatcastResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StatcastError::startup(format!("failed to build http client: {e}")))?;
        Ok(Self { client, endpoints })
    }

    async fn get(&self, url: &str) -> StatcastResult<reqwest::Response> {
        let res = self.client.get(url).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(StatcastError::fetch(format!("GET {url} returned {status}")));
        }
        Ok(res)
    }

    async fn get_json(&self, url: &str) -> StatcastResult<Value> {
        self.get(url)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| StatcastError::malformed(format!("invalid json from {url}: {e}")))
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    #[instrument(skip(self), fields(url = %self.endpoints.channel_url))]
    async fn channel_stats(&self) -> StatcastResult<ChannelStats> {
        let doc = self.get_json(&self.endpoints.channel_url).await?;
        ChannelStats::from_document(&doc)
    }

    #[instrument(skip(self), fields(url = %self.endpoints.stream_url))]
    async fn stream_stats(&self) -> StatcastResult<StreamStats> {
        let doc = self.get_json(&self.endpoints.stream_url).await?;
        StreamStats::from_document(&doc)
    }

    #[instrument(skip(self))]
    async fn avatar(&self, url: &str, diameter: u32) -> StatcastResult<PreparedImage> {
        let bytes = self.get(url).await?.bytes().await?;
        tracing::debug!(bytes = bytes.len(), "downloaded avatar");
        tokio::task::spawn_blocking(move || decode_avatar(&bytes, diameter))
            .await
            .map_err(|e| StatcastError::decode(format!("avatar decode task failed: {e}")))?
    }
}
