use chrono::Utc;
use shared::Operation;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn};
use crate::ledger::{LedgerError, OperationLedger};

const SCAN_LIMIT: i64 = 100;

/// Surfaces operations whose finalize write never landed. Rows are only
/// reported, never rewritten; recovering them is an operator decision.
pub struct StuckOperationMonitor {
    ledger: Arc<dyn OperationLedger>,
    stuck_after: Duration,
    interval: Duration,
}

impl StuckOperationMonitor {
    pub fn new(ledger: Arc<dyn OperationLedger>, stuck_after: Duration, interval: Duration) -> Self {
        Self { ledger, stuck_after, interval }
    }

    pub fn stuck_after(&self) -> Duration {
        self.stuck_after
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.sweep().await {
                error!("Error scanning for stuck operations: {}", e);
            }
        }
    }

    /// `IN_PROGRESS` rows created more than `older_than` ago, oldest first.
    pub async fn scan(&self, older_than: Duration) -> Result<Vec<Operation>, LedgerError> {
        let age = chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = Utc::now().checked_sub_signed(age).unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        self.ledger.find_stale_in_progress(cutoff, SCAN_LIMIT).await
    }

    async fn sweep(&self) -> Result<usize, LedgerError> {
        let stuck = self.scan(self.stuck_after).await?;
        let now = Utc::now();

        for op in &stuck {
            warn!(
                idempotency_key = %op.idempotency_key,
                operation_id = %op.id,
                operation_type = %op.operation_type,
                order_id = %op.order_id,
                age_secs = (now - op.created_at).num_seconds(),
                "inventory.operation.stuck"
            );
        }

        if !stuck.is_empty() {
            info!("Stuck operation sweep found {} operations", stuck.len());
        }

        Ok(stuck.len())
    }
}
