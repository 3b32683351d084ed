#![allow(dead_code)]

use async_trait::async_trait;
use inventory_service::chaos::{ChaosConfig, FaultInjector};
use inventory_service::coordinator::ReservationCoordinator;
use inventory_service::ledger::InMemoryOperationLedger;
use inventory_service::product_client::{StockAuthority, StockAuthorityError};
use shared::{ProductView, StockAction, StockRequest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Stock authority double that keeps counters in memory and records calls.
#[derive(Default)]
pub struct FakeStockAuthority {
    stock: Mutex<HashMap<String, i32>>,
    get_failure: Mutex<Option<StockAuthorityError>>,
    adjust_failure: Mutex<Option<StockAuthorityError>>,
    reported_stock: Mutex<Option<i32>>,
    delay: Duration,
    pub get_calls: AtomicUsize,
    pub decrease_calls: AtomicUsize,
    pub increase_calls: AtomicUsize,
}

impl FakeStockAuthority {
    pub fn with_stock(items: &[(&str, i32)]) -> Self {
        let stock = items.iter().map(|(id, n)| (id.to_string(), *n)).collect();
        Self { stock: Mutex::new(stock), ..Self::default() }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_get_with(&self, err: StockAuthorityError) {
        *self.get_failure.lock().unwrap() = Some(err);
    }

    /// Makes every stock adjustment fail with `err` after it is counted.
    pub fn fail_adjust_with(&self, err: StockAuthorityError) {
        *self.adjust_failure.lock().unwrap() = Some(err);
    }

    /// Makes reads report `stock` regardless of the real counter.
    pub fn report_stock(&self, stock: i32) {
        *self.reported_stock.lock().unwrap() = Some(stock);
    }

    pub fn stock_of(&self, product_id: &str) -> i32 {
        self.stock.lock().unwrap().get(product_id).copied().unwrap_or_default()
    }

    pub fn gets(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn decreases(&self) -> usize {
        self.decrease_calls.load(Ordering::SeqCst)
    }

    pub fn increases(&self) -> usize {
        self.increase_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StockAuthority for FakeStockAuthority {
    async fn get_stock(&self, product_id: &str, _correlation_id: &str) -> Result<ProductView, StockAuthorityError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = self.get_failure.lock().unwrap().clone() {
            return Err(err);
        }

        let reported = *self.reported_stock.lock().unwrap();
        let stock = self.stock.lock().unwrap().get(product_id).copied().map(|n| reported.unwrap_or(n));
        match stock {
            Some(stock) => Ok(ProductView {
                id: product_id.to_string(),
                name: "Widget".to_string(),
                price: 9.5,
                stock,
            }),
            None => Err(StockAuthorityError::ProductNotFound),
        }
    }

    async fn adjust_stock(
        &self,
        action: StockAction,
        product_id: &str,
        quantity: i32,
        _correlation_id: &str,
    ) -> Result<(), StockAuthorityError> {
        match action {
            StockAction::Decrease => self.decrease_calls.fetch_add(1, Ordering::SeqCst),
            StockAction::Increase => self.increase_calls.fetch_add(1, Ordering::SeqCst),
        };
        if let Some(err) = self.adjust_failure.lock().unwrap().clone() {
            return Err(err);
        }

        let mut stock = self.stock.lock().unwrap();
        let current = stock
            .get_mut(product_id)
            .ok_or_else(|| StockAuthorityError::InvalidProduct(product_id.to_string()))?;

        match action {
            StockAction::Decrease => {
                if *current < quantity {
                    return Err(StockAuthorityError::InsufficientStock("not enough stock".to_string()));
                }
                *current -= quantity;
            }
            StockAction::Increase => *current += quantity,
        }
        Ok(())
    }
}

pub struct Harness {
    pub ledger: Arc<InMemoryOperationLedger>,
    pub stock: Arc<FakeStockAuthority>,
    pub coordinator: Arc<ReservationCoordinator>,
}

impl Harness {
    pub fn new(stock: FakeStockAuthority) -> Self {
        Self::with_faults(stock, FaultInjector::disabled())
    }

    pub fn with_faults(stock: FakeStockAuthority, faults: FaultInjector) -> Self {
        let ledger = Arc::new(InMemoryOperationLedger::new());
        let stock = Arc::new(stock);
        let coordinator = Arc::new(ReservationCoordinator::new(ledger.clone(), stock.clone(), faults));
        Self { ledger, stock, coordinator }
    }

    /// A second coordinator over the same ledger and authority.
    pub fn with_new_faults(&self, faults: FaultInjector) -> Self {
        let coordinator = Arc::new(ReservationCoordinator::new(self.ledger.clone(), self.stock.clone(), faults));
        Self { ledger: self.ledger.clone(), stock: self.stock.clone(), coordinator }
    }
}

pub fn always_failing_chaos() -> FaultInjector {
    FaultInjector::with_seed(
        ChaosConfig {
            enabled: true,
            latency_probability: 0.0,
            error_probability: 1.0,
            delay: Duration::ZERO,
        },
        11,
    )
}

pub fn request(order_id: &str, product_id: &str, quantity: i32) -> StockRequest {
    StockRequest::new(order_id, product_id, quantity)
}
