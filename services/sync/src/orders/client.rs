use chrono::NaiveDate;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::orders::models::OrderPage;
use waybill_config::env::parse_var_or;

#[derive(Debug, Error)]
pub enum OrdersClientError {
    /// 429 from the platform. Surfaced untouched so the worker can
    /// re-enqueue the task instead of blocking a slot.
    #[error("orders platform rate limit hit")]
    RateLimited,
    #[error("orders API error ({status}): {body}")]
    HttpError { status: StatusCode, body: String },
    #[error("orders request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("orders request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

#[derive(Debug, Clone)]
pub struct OrdersClientConfig {
    pub base_url: String,
    pub api_token: String,
    pub page_size: u32,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl OrdersClientConfig {
    pub fn from_env() -> Option<Self> {
        let api_token = std::env::var("ORDERS_API_TOKEN").ok()?;
        let base_url = std::env::var("ORDERS_BASE_URL").ok()?;

        Some(Self {
            base_url,
            api_token,
            page_size: parse_var_or("ORDERS_PAGE_SIZE", 100),
            max_retries: parse_var_or("ORDERS_MAX_RETRIES", 3),
            timeout_secs: parse_var_or("ORDERS_TIMEOUT_SECS", 30),
        })
    }
}

#[derive(Clone)]
pub struct OrdersClient {
    client: reqwest::Client,
    config: OrdersClientConfig,
}

impl OrdersClient {
    pub fn new(config: OrdersClientConfig) -> Result<Self, OrdersClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }

    /// Orders updated inside a closed date range, token-paginated.
    /// Pass `None` for the first page.
    pub async fn fetch_page(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        page_token: Option<&str>,
    ) -> Result<OrderPage, OrdersClientError> {
        let url = format!("{}/orders", self.config.base_url);
        let mut params = vec![
            ("updatedAtStart", format!("{start_date}T00:00:00Z")),
            ("updatedAtEnd", format!("{end_date}T23:59:59Z")),
            ("pageSize", self.config.page_size.to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_owned()));
        }

        let mut last_error = String::new();
        for attempt in 1..=self.config.max_retries {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.config.api_token)
                .query(&params)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let page = resp.json::<OrderPage>().await?;
                        debug!(count = page.orders.len(), "fetched order page");
                        return Ok(page);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        return Err(OrdersClientError::RateLimited);
                    }
                    let body = resp.text().await.unwrap_or_default();
                    if status.is_server_error() {
                        last_error = format!("{status}: {body}");
                        warn!(attempt, %status, "orders API server error, retrying");
                    } else {
                        return Err(OrdersClientError::HttpError { status, body });
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_error = e.to_string();
                    warn!(attempt, error = %e, "orders request failed, retrying");
                }
                Err(e) => return Err(OrdersClientError::RequestError(e)),
            }

            if attempt < self.config.max_retries {
                let backoff = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }
        }

        Err(OrdersClientError::MaxRetriesExceeded {
            attempts: self.config.max_retries,
            last_error,
        })
    }
}
