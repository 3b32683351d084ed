//! Operation ledger: one row per attempted stock operation.
//!
//! The ledger is the only synchronisation point between concurrent requests.
//! `claim` is a single insert-if-absent against both uniqueness constraints
//! (idempotency key, and `(order_id, operation_type)` for order-scoped rows),
//! so exactly one of several racing callers observes `true`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection, RunQueryDsl};
use shared::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait OperationLedger: Send + Sync {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Operation>, LedgerError>;

    /// Always `None` for a blank order id; such rows are not order-scoped.
    async fn find_by_order_and_type(
        &self,
        order_id: &str,
        operation_type: OperationType,
    ) -> Result<Option<Operation>, LedgerError>;

    /// Inserts `op` unless a row with the same key, or the same non-empty
    /// order and type, already exists. Returns whether the row was inserted.
    async fn claim(&self, op: &Operation) -> Result<bool, LedgerError>;

    /// Moves the `IN_PROGRESS` row for `key` to its terminal state. Touching
    /// zero rows is not an error.
    async fn finalize(
        &self,
        key: &str,
        status: OperationStatus,
        error_code: &str,
        error_message: &str,
        correlation_id: &str,
    ) -> Result<(), LedgerError>;

    /// Oldest first.
    async fn find_stale_in_progress(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Operation>, LedgerError>;
}

pub struct PgOperationLedger {
    pool: DbPool,
}

impl PgOperationLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn to_operation(row: DbOperation) -> Result<Operation, LedgerError> {
    Operation::try_from(row).map_err(|e| LedgerError::Corrupt(e.to_string()))
}

#[async_trait]
impl OperationLedger for PgOperationLedger {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Operation>, LedgerError> {
        let mut conn = self.pool.get().await.map_err(|e| LedgerError::Pool(e.to_string()))?;

        let row = inventory_operations::table
            .filter(inventory_operations::idempotency_key.eq(key))
            .first::<DbOperation>(&mut conn)
            .await
            .optional()?;

        row.map(to_operation).transpose()
    }

    async fn find_by_order_and_type(
        &self,
        order_id: &str,
        operation_type: OperationType,
    ) -> Result<Option<Operation>, LedgerError> {
        if order_id.is_empty() {
            return Ok(None);
        }

        let mut conn = self.pool.get().await.map_err(|e| LedgerError::Pool(e.to_string()))?;

        let row = inventory_operations::table
            .filter(inventory_operations::order_id.eq(order_id))
            .filter(inventory_operations::operation_type.eq(operation_type.as_str()))
            .first::<DbOperation>(&mut conn)
            .await
            .optional()?;

        row.map(to_operation).transpose()
    }

    async fn claim(&self, op: &Operation) -> Result<bool, LedgerError> {
        let mut conn = self.pool.get().await.map_err(|e| LedgerError::Pool(e.to_string()))?;

        // ON CONFLICT without a target covers the primary key, the key
        // constraint and the partial (order_id, operation_type) index.
        let inserted = diesel::insert_into(inventory_operations::table)
            .values(&DbOperation::from(op))
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;

        Ok(inserted == 1)
    }

    async fn finalize(
        &self,
        key: &str,
        status: OperationStatus,
        error_code: &str,
        error_message: &str,
        correlation_id: &str,
    ) -> Result<(), LedgerError> {
        let mut conn = self.pool.get().await.map_err(|e| LedgerError::Pool(e.to_string()))?;

        diesel::update(
            inventory_operations::table
                .filter(inventory_operations::idempotency_key.eq(key))
                .filter(inventory_operations::status.eq(OperationStatus::InProgress.as_str())),
        )
        .set(&OperationOutcome::new(status, error_code, error_message, correlation_id))
        .execute(&mut conn)
        .await?;

        Ok(())
    }

    async fn find_stale_in_progress(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Operation>, LedgerError> {
        let mut conn = self.pool.get().await.map_err(|e| LedgerError::Pool(e.to_string()))?;

        let rows = inventory_operations::table
            .filter(inventory_operations::status.eq(OperationStatus::InProgress.as_str()))
            .filter(inventory_operations::created_at.lt(older_than))
            .order(inventory_operations::created_at.asc())
            .limit(limit)
            .load::<DbOperation>(&mut conn)
            .await?;

        rows.into_iter().map(to_operation).collect()
    }
}

/// Ledger kept in process memory. Every call runs inside one critical
/// section, which gives `claim` the same insert-if-absent guarantee as the
/// database constraints within a single process.
#[derive(Default)]
pub struct InMemoryOperationLedger {
    rows: Mutex<HashMap<String, Operation>>,
    fail_finalize: AtomicBool,
}

impl InMemoryOperationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `finalize` fail with a storage error.
    pub fn fail_finalize(&self, fail: bool) {
        self.fail_finalize.store(fail, Ordering::SeqCst);
    }

    pub fn insert(&self, op: Operation) {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(op.idempotency_key.clone(), op);
    }

    pub fn snapshot(&self) -> Vec<Operation> {
        let mut rows: Vec<Operation> = self
            .rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        rows.sort_by_key(|op| op.created_at);
        rows
    }
}

#[async_trait]
impl OperationLedger for InMemoryOperationLedger {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Operation>, LedgerError> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows.get(key).cloned())
    }

    async fn find_by_order_and_type(
        &self,
        order_id: &str,
        operation_type: OperationType,
    ) -> Result<Option<Operation>, LedgerError> {
        if order_id.is_empty() {
            return Ok(None);
        }
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows
            .values()
            .find(|op| op.order_id == order_id && op.operation_type == operation_type)
            .cloned())
    }

    async fn claim(&self, op: &Operation) -> Result<bool, LedgerError> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());

        let order_taken = !op.order_id.is_empty()
            && rows
                .values()
                .any(|row| row.order_id == op.order_id && row.operation_type == op.operation_type);
        if rows.contains_key(&op.idempotency_key) || order_taken {
            return Ok(false);
        }

        rows.insert(op.idempotency_key.clone(), op.clone());
        Ok(true)
    }

    async fn finalize(
        &self,
        key: &str,
        status: OperationStatus,
        error_code: &str,
        error_message: &str,
        correlation_id: &str,
    ) -> Result<(), LedgerError> {
        // Called through the type: `RunQueryDsl::load` is in scope here.
        if AtomicBool::load(&self.fail_finalize, Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("finalize rejected".to_string()));
        }

        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(row) = rows.get_mut(key) {
            if row.status == OperationStatus::InProgress {
                row.status = status;
                row.error_code = error_code.to_string();
                row.error_message = error_message.to_string();
                row.correlation_id = correlation_id.to_string();
            }
        }
        Ok(())
    }

    async fn find_stale_in_progress(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Operation>, LedgerError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|op| op.status == OperationStatus::InProgress && op.created_at < older_than)
            .take(limit)
            .collect())
    }
}
