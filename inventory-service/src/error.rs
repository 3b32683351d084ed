//! Error codes returned to callers and the `ServiceError` that carries them.

use axum::http::StatusCode;
use thiserror::Error;
use crate::ledger::LedgerError;

pub mod codes {
    pub const INVALID_JSON: &str = "INVALID_JSON";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const INVALID_PRODUCT: &str = "INVALID_PRODUCT";
    pub const MISSING_IDEMPOTENCY_KEY: &str = "MISSING_IDEMPOTENCY_KEY";

    pub const IDEMPOTENCY_CONFLICT: &str = "IDEMPOTENCY_CONFLICT";
    pub const IDEMPOTENCY_IN_PROGRESS: &str = "IDEMPOTENCY_IN_PROGRESS";
    pub const IDEMPOTENCY_REPLAY_FAILED: &str = "IDEMPOTENCY_REPLAY_FAILED";
    pub const ORDER_OPERATION_CONFLICT: &str = "ORDER_OPERATION_CONFLICT";

    pub const OUT_OF_STOCK: &str = "OUT_OF_STOCK";
    pub const NO_RESERVED_STOCK: &str = "NO_RESERVED_STOCK";
    pub const RESERVATION_MISMATCH: &str = "RESERVATION_MISMATCH";

    pub const PRODUCT_SERVICE_UNAVAILABLE: &str = "PRODUCT_SERVICE_UNAVAILABLE";
    pub const PRODUCT_SERVICE_ERROR: &str = "PRODUCT_SERVICE_ERROR";
    pub const BAD_PRODUCT_RESPONSE: &str = "BAD_PRODUCT_RESPONSE";
    pub const PRODUCT_STOCK_UPDATE_FAILED: &str = "PRODUCT_STOCK_UPDATE_FAILED";

    pub const CHAOS_FAILURE: &str = "CHAOS_FAILURE";
    pub const DB_ERROR: &str = "DB_ERROR";
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}] {message}")]
pub struct ServiceError {
    pub code: String,
    pub message: String,
    pub status: StatusCode,
}

impl ServiceError {
    pub fn new(code: &str, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            status,
        }
    }

    pub fn bad_request(code: &str, message: impl Into<String>) -> Self {
        Self::new(code, message, StatusCode::BAD_REQUEST)
    }

    pub fn conflict(code: &str, message: impl Into<String>) -> Self {
        Self::new(code, message, StatusCode::CONFLICT)
    }

    pub fn storage(err: &LedgerError) -> Self {
        Self::new(codes::DB_ERROR, err.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Rebuilds the error recorded on a `FAILED` ledger row. Blank fields fall
    /// back to a generic replay failure.
    pub fn replayed(code: &str, message: &str) -> Self {
        let code = match code.trim() {
            "" => codes::IDEMPOTENCY_REPLAY_FAILED,
            code => code,
        };
        let message = match message.trim() {
            "" => "Previous request with this idempotency key failed",
            message => message,
        };
        Self::new(code, message, status_for_code(code))
    }
}

/// Status class for a stored error code. Must agree with the status the
/// error had when it was first returned, so a replay is indistinguishable.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        codes::INVALID_JSON
        | codes::INVALID_REQUEST
        | codes::MISSING_IDEMPOTENCY_KEY => StatusCode::BAD_REQUEST,
        codes::INVALID_PRODUCT => StatusCode::NOT_FOUND,
        codes::PRODUCT_SERVICE_UNAVAILABLE
        | codes::PRODUCT_SERVICE_ERROR
        | codes::BAD_PRODUCT_RESPONSE => StatusCode::BAD_GATEWAY,
        codes::CHAOS_FAILURE | codes::DB_ERROR => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::CONFLICT,
    }
}
