use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Reserve,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    InProgress,
    Success,
    Failed,
}

/// Status reported to callers once an operation has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Reserved,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockAction {
    Increase,
    Decrease,
}

/// One row of the operation ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: Uuid,
    pub idempotency_key: String,
    pub operation_type: OperationType,
    pub order_id: String,
    pub product_id: String,
    pub quantity: i32,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
}

/// Body of both `POST /inventory/reserve` and `POST /inventory/release`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StockRequest {
    pub order_id: String,
    pub product_id: String,
    pub quantity: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

pub type ReserveRequest = StockRequest;
pub type ReleaseRequest = StockRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub status: ServiceStatus,
    pub operation_id: Uuid,
    pub idempotent_replay: bool,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_stock_hint: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory_operation: Option<Operation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryView {
    pub product_id: String,
    pub available_stock: i32,
    pub source: String,
}

/// Product as returned by the product service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductView {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: f64,
    pub stock: i32,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Reserve => "RESERVE",
            OperationType::Release => "RELEASE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RESERVE" => Some(OperationType::Reserve),
            "RELEASE" => Some(OperationType::Release),
            _ => None,
        }
    }

    pub fn service_status(&self) -> ServiceStatus {
        match self {
            OperationType::Reserve => ServiceStatus::Reserved,
            OperationType::Release => ServiceStatus::Released,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::InProgress => "IN_PROGRESS",
            OperationStatus::Success => "SUCCESS",
            OperationStatus::Failed => "FAILED",
        }
    }

    /// Anything that is not a recognised live or successful status is read back as failed.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "IN_PROGRESS" => OperationStatus::InProgress,
            "SUCCESS" => OperationStatus::Success,
            _ => OperationStatus::Failed,
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StockAction {
    pub fn path_segment(&self) -> &'static str {
        match self {
            StockAction::Increase => "increase-stock",
            StockAction::Decrease => "decrease-stock",
        }
    }
}

impl Operation {
    /// A fresh `IN_PROGRESS` row, ready to be claimed.
    pub fn claim(
        idempotency_key: &str,
        operation_type: OperationType,
        order_id: &str,
        product_id: &str,
        quantity: i32,
        correlation_id: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            idempotency_key: idempotency_key.to_string(),
            operation_type,
            order_id: order_id.to_string(),
            product_id: product_id.to_string(),
            quantity,
            status: OperationStatus::InProgress,
            error_code: String::new(),
            error_message: String::new(),
            correlation_id: correlation_id.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn matches(
        &self,
        operation_type: OperationType,
        order_id: &str,
        product_id: &str,
        quantity: i32,
    ) -> bool {
        self.operation_type == operation_type
            && self.order_id == order_id
            && self.product_id == product_id
            && self.quantity == quantity
    }
}

impl StockRequest {
    pub fn new(order_id: &str, product_id: &str, quantity: i32) -> Self {
        Self {
            order_id: order_id.to_string(),
            product_id: product_id.to_string(),
            quantity,
            idempotency_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_serializes_camel_case_and_hides_empty_errors() {
        let op = Operation::claim("key-1", OperationType::Reserve, "o-1", "p-1", 2, "corr");
        let json = serde_json::to_value(&op).unwrap();

        assert_eq!(json["idempotencyKey"], "key-1");
        assert_eq!(json["operationType"], "RESERVE");
        assert_eq!(json["status"], "IN_PROGRESS");
        assert!(json.get("errorCode").is_none());
    }

    #[test]
    fn missing_request_fields_decode_as_blank() {
        let request: StockRequest = serde_json::from_str(r#"{"orderId":"o-1"}"#).unwrap();
        assert_eq!(request.order_id, "o-1");
        assert_eq!(request.product_id, "");
        assert_eq!(request.quantity, 0);
        assert!(request.idempotency_key.is_none());
    }

    #[test]
    fn unknown_status_reads_back_as_failed() {
        assert_eq!(OperationStatus::parse_lenient("success"), OperationStatus::Success);
        assert_eq!(OperationStatus::parse_lenient("weird"), OperationStatus::Failed);
    }

    #[test]
    fn matches_compares_full_payload() {
        let op = Operation::claim("key-1", OperationType::Release, "o-1", "p-1", 2, "corr");
        assert!(op.matches(OperationType::Release, "o-1", "p-1", 2));
        assert!(!op.matches(OperationType::Reserve, "o-1", "p-1", 2));
        assert!(!op.matches(OperationType::Release, "o-1", "p-1", 3));
    }

    #[test]
    fn product_view_tolerates_missing_id() {
        let product: ProductView = serde_json::from_str(r#"{"name":"Lamp","stock":4}"#).unwrap();
        assert_eq!(product.id, "");
        assert_eq!(product.stock, 4);
    }
}
