//! Idempotent reserve/release coordination.
//!
//! Each logical operation moves through validate, deduplicate, claim,
//! execute and finalize. Deduplication always looks at the idempotency key
//! before the order: the same key with the same payload replays, the same
//! key with a different payload is a conflict, never an overwrite.

use std::sync::Arc;
use tracing::{error, info, warn};
use shared::*;
use crate::chaos::FaultInjector;
use crate::error::{codes, ServiceError};
use crate::ledger::OperationLedger;
use crate::product_client::StockAuthority;

const AVAILABILITY_SOURCE: &str = "product-service";

/// The payload of one reserve or release call, after validation.
#[derive(Debug, Clone)]
struct Intent<'a> {
    operation_type: OperationType,
    order_id: &'a str,
    product_id: &'a str,
    quantity: i32,
    idempotency_key: &'a str,
    correlation_id: &'a str,
}

enum Claim {
    Owned(Operation),
    Resolved(OperationResponse),
}

pub struct ReservationCoordinator {
    ledger: Arc<dyn OperationLedger>,
    stock: Arc<dyn StockAuthority>,
    faults: FaultInjector,
}

impl<'a> Intent<'a> {
    fn validate(
        operation_type: OperationType,
        request: &'a StockRequest,
        idempotency_key: &'a str,
        correlation_id: &'a str,
    ) -> Result<Self, ServiceError> {
        if request.order_id.trim().is_empty() {
            return Err(ServiceError::bad_request(codes::INVALID_REQUEST, "orderId is required"));
        }
        if request.product_id.trim().is_empty() {
            return Err(ServiceError::bad_request(codes::INVALID_REQUEST, "productId is required"));
        }
        if request.quantity <= 0 {
            return Err(ServiceError::bad_request(codes::INVALID_REQUEST, "quantity must be greater than 0"));
        }

        let idempotency_key = idempotency_key.trim();
        if idempotency_key.is_empty() {
            return Err(ServiceError::bad_request(
                codes::MISSING_IDEMPOTENCY_KEY,
                "Idempotency-Key is required",
            ));
        }

        Ok(Self {
            operation_type,
            order_id: &request.order_id,
            product_id: &request.product_id,
            quantity: request.quantity,
            idempotency_key,
            correlation_id,
        })
    }

    fn to_operation(&self) -> Operation {
        Operation::claim(
            self.idempotency_key,
            self.operation_type,
            self.order_id,
            self.product_id,
            self.quantity,
            self.correlation_id,
        )
    }

    fn stage(&self) -> &'static str {
        match self.operation_type {
            OperationType::Reserve => "reserve",
            OperationType::Release => "release",
        }
    }
}

impl ReservationCoordinator {
    pub fn new(
        ledger: Arc<dyn OperationLedger>,
        stock: Arc<dyn StockAuthority>,
        faults: FaultInjector,
    ) -> Self {
        Self { ledger, stock, faults }
    }

    pub async fn reserve(
        &self,
        request: &ReserveRequest,
        idempotency_key: &str,
        correlation_id: &str,
    ) -> Result<OperationResponse, ServiceError> {
        let intent = Intent::validate(OperationType::Reserve, request, idempotency_key, correlation_id)?;

        let op = match self.claim(&intent).await? {
            Claim::Owned(op) => op,
            Claim::Resolved(response) => return Ok(response),
        };

        let stock = match self.execute_reserve(&intent).await {
            Ok(stock) => stock,
            Err(err) => return Err(self.mark_failed(&intent, err).await),
        };

        self.mark_success(&intent).await?;

        info!(
            order_id = intent.order_id,
            product_id = intent.product_id,
            quantity = intent.quantity,
            correlation_id = intent.correlation_id,
            "inventory.reserve.success"
        );

        Ok(OperationResponse {
            status: ServiceStatus::Reserved,
            operation_id: op.id,
            idempotent_replay: false,
            correlation_id: correlation_id.to_string(),
            available_stock_hint: Some(stock - intent.quantity),
            inventory_operation: None,
        })
    }

    pub async fn release(
        &self,
        request: &ReleaseRequest,
        idempotency_key: &str,
        correlation_id: &str,
    ) -> Result<OperationResponse, ServiceError> {
        let intent = Intent::validate(OperationType::Release, request, idempotency_key, correlation_id)?;

        let op = match self.claim(&intent).await? {
            Claim::Owned(op) => op,
            Claim::Resolved(response) => return Ok(response),
        };

        if let Err(err) = self.execute_release(&intent).await {
            return Err(self.mark_failed(&intent, err).await);
        }

        self.mark_success(&intent).await?;

        info!(
            order_id = intent.order_id,
            product_id = intent.product_id,
            quantity = intent.quantity,
            correlation_id = intent.correlation_id,
            "inventory.release.success"
        );

        Ok(OperationResponse {
            status: ServiceStatus::Released,
            operation_id: op.id,
            idempotent_replay: false,
            correlation_id: correlation_id.to_string(),
            available_stock_hint: None,
            inventory_operation: None,
        })
    }

    /// Current stock straight from the product service; the ledger is not consulted.
    pub async fn check_available(&self, product_id: &str, correlation_id: &str) -> Result<InventoryView, ServiceError> {
        if product_id.trim().is_empty() {
            return Err(ServiceError::bad_request(codes::INVALID_PRODUCT, "productId is required"));
        }

        let product = self.stock.get_stock(product_id, correlation_id).await?;

        Ok(InventoryView {
            product_id: product.id,
            available_stock: product.stock,
            source: AVAILABILITY_SOURCE.to_string(),
        })
    }

    async fn execute_reserve(&self, intent: &Intent<'_>) -> Result<i32, ServiceError> {
        if let Some(fault) = self.faults.maybe_fail(intent.stage(), intent.correlation_id).await {
            return Err(fault.into());
        }

        let product = self.stock.get_stock(intent.product_id, intent.correlation_id).await?;
        if product.stock < intent.quantity {
            return Err(ServiceError::conflict(
                codes::OUT_OF_STOCK,
                "Not enough stock for requested product",
            ));
        }

        self.stock
            .adjust_stock(StockAction::Decrease, intent.product_id, intent.quantity, intent.correlation_id)
            .await?;

        Ok(product.stock)
    }

    async fn execute_release(&self, intent: &Intent<'_>) -> Result<(), ServiceError> {
        let reserved = self.ledger
            .find_by_order_and_type(intent.order_id, OperationType::Reserve)
            .await
            .map_err(|e| ServiceError::storage(&e))?;

        let reserved = match reserved {
            Some(op) if op.status == OperationStatus::Success => op,
            _ => {
                return Err(ServiceError::conflict(
                    codes::NO_RESERVED_STOCK,
                    "No successful reserve operation found for this order",
                ))
            }
        };
        if reserved.product_id != intent.product_id || reserved.quantity != intent.quantity {
            return Err(ServiceError::conflict(
                codes::RESERVATION_MISMATCH,
                "Release payload does not match successful reservation",
            ));
        }

        if let Some(fault) = self.faults.maybe_fail(intent.stage(), intent.correlation_id).await {
            return Err(fault.into());
        }

        self.stock
            .adjust_stock(StockAction::Increase, intent.product_id, intent.quantity, intent.correlation_id)
            .await?;

        Ok(())
    }

    /// Deduplicates by key, then tries to take ownership of the operation.
    async fn claim(&self, intent: &Intent<'_>) -> Result<Claim, ServiceError> {
        let existing = self.ledger
            .find_by_idempotency_key(intent.idempotency_key)
            .await
            .map_err(|e| ServiceError::storage(&e))?;
        if let Some(existing) = existing {
            return Self::handle_existing(&existing, intent).map(Claim::Resolved);
        }

        let op = intent.to_operation();
        let claimed = self.ledger.claim(&op).await.map_err(|e| ServiceError::storage(&e))?;
        if claimed {
            return Ok(Claim::Owned(op));
        }

        self.resolve_claim_conflict(intent).await.map(Claim::Resolved)
    }

    /// Someone else inserted first. Work out who, and what they left behind.
    async fn resolve_claim_conflict(&self, intent: &Intent<'_>) -> Result<OperationResponse, ServiceError> {
        let by_key = self.ledger
            .find_by_idempotency_key(intent.idempotency_key)
            .await
            .map_err(|e| ServiceError::storage(&e))?;
        if let Some(existing) = by_key {
            return Self::handle_existing(&existing, intent);
        }

        let by_order = self.ledger
            .find_by_order_and_type(intent.order_id, intent.operation_type)
            .await
            .map_err(|e| ServiceError::storage(&e))?;

        match by_order {
            Some(existing) if existing.idempotency_key == intent.idempotency_key => {
                Self::handle_existing(&existing, intent)
            }
            Some(existing) => {
                warn!(
                    order_id = intent.order_id,
                    operation_type = %intent.operation_type,
                    owner_key = %existing.idempotency_key,
                    correlation_id = intent.correlation_id,
                    "inventory.order_operation_conflict"
                );
                Err(ServiceError::conflict(
                    codes::ORDER_OPERATION_CONFLICT,
                    "Order already has an operation with a different idempotency key",
                ))
            }
            None => Err(ServiceError::conflict(
                codes::IDEMPOTENCY_CONFLICT,
                "Conflicting request detected for this operation",
            )),
        }
    }

    fn handle_existing(existing: &Operation, intent: &Intent<'_>) -> Result<OperationResponse, ServiceError> {
        if !existing.matches(intent.operation_type, intent.order_id, intent.product_id, intent.quantity) {
            return Err(ServiceError::conflict(
                codes::IDEMPOTENCY_CONFLICT,
                "Idempotency key already used with different payload",
            ));
        }

        match existing.status {
            OperationStatus::Success => Ok(OperationResponse {
                status: intent.operation_type.service_status(),
                operation_id: existing.id,
                idempotent_replay: true,
                correlation_id: intent.correlation_id.to_string(),
                available_stock_hint: None,
                inventory_operation: Some(existing.clone()),
            }),
            OperationStatus::InProgress => Err(ServiceError::conflict(
                codes::IDEMPOTENCY_IN_PROGRESS,
                "Operation is still in progress for this idempotency key",
            )),
            OperationStatus::Failed => Err(ServiceError::replayed(&existing.error_code, &existing.error_message)),
        }
    }

    /// Records the failure on the ledger row and hands back the original
    /// error, unless the write itself fails.
    async fn mark_failed(&self, intent: &Intent<'_>, original: ServiceError) -> ServiceError {
        let result = self.ledger
            .finalize(
                intent.idempotency_key,
                OperationStatus::Failed,
                &original.code,
                &original.message,
                intent.correlation_id,
            )
            .await;

        match result {
            Ok(()) => original,
            Err(e) => {
                error!(
                    idempotency_key = intent.idempotency_key,
                    intended_code = %original.code,
                    correlation_id = intent.correlation_id,
                    error = %e,
                    "inventory.finalize_failed: operation left IN_PROGRESS"
                );
                ServiceError::storage(&e)
            }
        }
    }

    async fn mark_success(&self, intent: &Intent<'_>) -> Result<(), ServiceError> {
        self.ledger
            .finalize(intent.idempotency_key, OperationStatus::Success, "", "", intent.correlation_id)
            .await
            .map_err(|e| {
                error!(
                    idempotency_key = intent.idempotency_key,
                    correlation_id = intent.correlation_id,
                    error = %e,
                    "inventory.finalize_failed: stock applied but operation left IN_PROGRESS"
                );
                ServiceError::storage(&e)
            })
    }
}
