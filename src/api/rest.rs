use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use crate::error::TrackingError;
use crate::models::order::{OrderId, TrackingSnapshot};

/// Point-in-time read of an order's tracking state.
#[async_trait]
pub trait OrderFetcher: Send + Sync {
    async fn fetch(&self, order_id: &OrderId) -> Result<TrackingSnapshot, TrackingError>;
}

/// Fetches `GET {base}/orders/{id}/tracking`.
#[derive(Debug, Clone)]
pub struct RestOrderClient {
    http_client: Client,
    base_url: Url,
}

impl RestOrderClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TrackingError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(TrackingError::Config(format!(
                "tracking api url cannot be a base: {base_url}"
            )));
        }

        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    fn tracking_url(&self, order_id: &OrderId) -> Result<Url, TrackingError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TrackingError::Config("tracking api url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["orders", order_id.as_str(), "tracking"]);
        Ok(url)
    }
}

#[async_trait]
impl OrderFetcher for RestOrderClient {
    async fn fetch(&self, order_id: &OrderId) -> Result<TrackingSnapshot, TrackingError> {
        let url = self.tracking_url(order_id)?;
        debug!(order_id = %order_id, url = %url, "fetching tracking snapshot");

        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TrackingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<TrackingSnapshot>().await?)
    }
}
