use diesel::prelude::*;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use shared::*;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::inventory_operations)]
pub struct DbOperation {
    pub id: Uuid,
    pub idempotency_key: String,
    pub operation_type: String,
    pub order_id: Option<String>,
    pub product_id: String,
    pub quantity: i32,
    pub status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = crate::schema::inventory_operations, treat_none_as_null = true)]
pub struct OperationOutcome {
    pub status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub correlation_id: Option<String>,
}

pub(crate) fn null_if_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl From<&Operation> for DbOperation {
    fn from(op: &Operation) -> Self {
        Self {
            id: op.id,
            idempotency_key: op.idempotency_key.clone(),
            operation_type: op.operation_type.as_str().to_string(),
            order_id: null_if_empty(&op.order_id),
            product_id: op.product_id.clone(),
            quantity: op.quantity,
            status: op.status.as_str().to_string(),
            error_code: null_if_empty(&op.error_code),
            error_message: null_if_empty(&op.error_message),
            correlation_id: null_if_empty(&op.correlation_id),
            created_at: op.created_at,
        }
    }
}

impl TryFrom<DbOperation> for Operation {
    type Error = anyhow::Error;

    fn try_from(row: DbOperation) -> Result<Self, Self::Error> {
        let operation_type = OperationType::parse(&row.operation_type)
            .ok_or_else(|| anyhow::anyhow!("unknown operation type {:?}", row.operation_type))?;

        Ok(Self {
            id: row.id,
            idempotency_key: row.idempotency_key,
            operation_type,
            order_id: row.order_id.unwrap_or_default(),
            product_id: row.product_id,
            quantity: row.quantity,
            status: OperationStatus::parse_lenient(&row.status),
            error_code: row.error_code.unwrap_or_default(),
            error_message: row.error_message.unwrap_or_default(),
            correlation_id: row.correlation_id.unwrap_or_default(),
            created_at: row.created_at,
        })
    }
}

impl OperationOutcome {
    pub fn new(status: OperationStatus, error_code: &str, error_message: &str, correlation_id: &str) -> Self {
        Self {
            status: status.as_str().to_string(),
            error_code: null_if_empty(error_code),
            error_message: null_if_empty(error_message),
            correlation_id: null_if_empty(correlation_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_order_id_is_stored_as_null() {
        let op = Operation::claim("k", OperationType::Reserve, "", "p-1", 1, "");
        let row = DbOperation::from(&op);
        assert!(row.order_id.is_none());
        assert!(row.correlation_id.is_none());
        assert_eq!(row.status, "IN_PROGRESS");
    }

    #[test]
    fn row_round_trips_back_to_operation() {
        let op = Operation::claim("k", OperationType::Release, "o-1", "p-1", 3, "c-1");
        let restored = Operation::try_from(DbOperation::from(&op)).unwrap();
        assert_eq!(restored, op);
    }

    #[test]
    fn unknown_operation_type_is_rejected() {
        let mut row = DbOperation::from(&Operation::claim("k", OperationType::Reserve, "o", "p", 1, ""));
        row.operation_type = "TRANSFER".to_string();
        assert!(Operation::try_from(row).is_err());
    }
}
