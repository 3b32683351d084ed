//! Client for the product service, which owns the canonical stock counters.

use async_trait::async_trait;
use axum::http::StatusCode as HttpStatus;
use reqwest::{Client, StatusCode};
use shared::*;
use std::time::Duration;
use thiserror::Error;
use crate::error::{codes, ServiceError};

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-Id";
pub const INTERNAL_CALLER_HEADER: &str = "X-Internal-Caller";
pub const INTERNAL_CALLER: &str = "inventory-service";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockAuthorityError {
    #[error("product not found")]
    ProductNotFound,
    #[error("product service returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("product service unreachable: {0}")]
    Unreachable(String),
    #[error("malformed product response: {0}")]
    MalformedResponse(String),
    #[error("unknown product: {0}")]
    InvalidProduct(String),
    #[error("insufficient stock: {0}")]
    InsufficientStock(String),
    #[error("stock update failed ({status}): {body}")]
    UpdateFailed { status: u16, body: String },
}

impl From<StockAuthorityError> for ServiceError {
    fn from(err: StockAuthorityError) -> Self {
        match err {
            StockAuthorityError::ProductNotFound => {
                ServiceError::new(codes::INVALID_PRODUCT, "Product not found", HttpStatus::NOT_FOUND)
            }
            StockAuthorityError::Upstream { body, .. } => {
                ServiceError::new(codes::PRODUCT_SERVICE_ERROR, body, HttpStatus::BAD_GATEWAY)
            }
            StockAuthorityError::Unreachable(message) => {
                ServiceError::new(codes::PRODUCT_SERVICE_UNAVAILABLE, message, HttpStatus::BAD_GATEWAY)
            }
            StockAuthorityError::MalformedResponse(message) => {
                ServiceError::new(codes::BAD_PRODUCT_RESPONSE, message, HttpStatus::BAD_GATEWAY)
            }
            StockAuthorityError::InvalidProduct(body) => {
                ServiceError::new(codes::INVALID_PRODUCT, body, HttpStatus::NOT_FOUND)
            }
            StockAuthorityError::InsufficientStock(body) => ServiceError::conflict(codes::OUT_OF_STOCK, body),
            StockAuthorityError::UpdateFailed { body, .. } => {
                ServiceError::conflict(codes::PRODUCT_STOCK_UPDATE_FAILED, body)
            }
        }
    }
}

#[async_trait]
pub trait StockAuthority: Send + Sync {
    async fn get_stock(&self, product_id: &str, correlation_id: &str) -> Result<ProductView, StockAuthorityError>;

    async fn adjust_stock(
        &self,
        action: StockAction,
        product_id: &str,
        quantity: i32,
        correlation_id: &str,
    ) -> Result<(), StockAuthorityError>;
}

/// HTTP client for the product service. Every call is bounded by the
/// configured timeout and is never retried here.
#[derive(Clone)]
pub struct ProductServiceClient {
    client: Client,
    base_url: String,
}

impl ProductServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl StockAuthority for ProductServiceClient {
    async fn get_stock(&self, product_id: &str, correlation_id: &str) -> Result<ProductView, StockAuthorityError> {
        let response = self.client
            .get(format!("{}/products/{}", self.base_url, product_id))
            .header(CORRELATION_ID_HEADER, correlation_id)
            .send()
            .await
            .map_err(|e| StockAuthorityError::Unreachable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StockAuthorityError::ProductNotFound),
            status if status.is_client_error() || status.is_server_error() => {
                let body = response.text().await.unwrap_or_default();
                Err(StockAuthorityError::Upstream { status: status.as_u16(), body })
            }
            _ => {
                let mut product = response
                    .json::<ProductView>()
                    .await
                    .map_err(|e| {
                        // The timeout covers the body too.
                        if e.is_timeout() {
                            StockAuthorityError::Unreachable(e.to_string())
                        } else {
                            StockAuthorityError::MalformedResponse(e.to_string())
                        }
                    })?;
                if product.id.trim().is_empty() {
                    product.id = product_id.to_string();
                }
                Ok(product)
            }
        }
    }

    async fn adjust_stock(
        &self,
        action: StockAction,
        product_id: &str,
        quantity: i32,
        correlation_id: &str,
    ) -> Result<(), StockAuthorityError> {
        let response = self.client
            .post(format!("{}/products/{}/{}", self.base_url, product_id, action.path_segment()))
            .query(&[("quantity", quantity)])
            .header(INTERNAL_CALLER_HEADER, INTERNAL_CALLER)
            .header(CORRELATION_ID_HEADER, correlation_id)
            .send()
            .await
            .map_err(|e| StockAuthorityError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !(status.is_client_error() || status.is_server_error()) {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let body = match body.trim() {
            "" => "failed to adjust stock".to_string(),
            trimmed => trimmed.to_string(),
        };

        Err(match status {
            StatusCode::NOT_FOUND => StockAuthorityError::InvalidProduct(body),
            StatusCode::BAD_REQUEST => StockAuthorityError::InsufficientStock(body),
            _ => StockAuthorityError::UpdateFailed { status: status.as_u16(), body },
        })
    }
}
