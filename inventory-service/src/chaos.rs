//! Probabilistic fault injection for resilience testing.

use axum::http::StatusCode;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;
use crate::error::{codes, ServiceError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChaosConfig {
    pub enabled: bool,
    pub latency_probability: f64,
    pub error_probability: f64,
    pub delay: Duration,
}

/// A synthetic failure produced by [`FaultInjector::maybe_fail`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultOutcome {
    pub stage: String,
}

impl From<FaultOutcome> for ServiceError {
    fn from(_: FaultOutcome) -> Self {
        ServiceError::new(
            codes::CHAOS_FAILURE,
            "Injected chaos failure",
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    }
}

/// Stateless between calls: each invocation is an independent pair of
/// Bernoulli trials, one for latency and one for failure.
pub struct FaultInjector {
    config: ChaosConfig,
    rng: Mutex<StdRng>,
}

impl FaultInjector {
    pub fn new(config: ChaosConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_seed(config: ChaosConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(config: ChaosConfig, rng: StdRng) -> Self {
        let config = ChaosConfig {
            latency_probability: config.latency_probability.clamp(0.0, 1.0),
            error_probability: config.error_probability.clamp(0.0, 1.0),
            ..config
        };
        Self { config, rng: Mutex::new(rng) }
    }

    pub fn disabled() -> Self {
        Self::new(ChaosConfig::default())
    }

    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    pub async fn maybe_fail(&self, stage: &str, correlation_id: &str) -> Option<FaultOutcome> {
        if !self.config.enabled {
            return None;
        }

        let (delay, fail) = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            let delay = self.config.latency_probability > 0.0
                && rng.gen::<f64>() < self.config.latency_probability;
            let fail = self.config.error_probability > 0.0
                && rng.gen::<f64>() < self.config.error_probability;
            (delay, fail)
        };

        if delay && !self.config.delay.is_zero() {
            tokio::time::sleep(self.config.delay).await;
        }

        if fail {
            warn!(stage, correlation_id, "inventory.chaos.injected_error");
            return Some(FaultOutcome { stage: stage.to_string() });
        }

        None
    }
}
