//! Concurrent RPC fan-out.

use crate::client::NodeRpc;
use crate::error::{Result, RpcError};
use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, instrument, warn};
use warnet_core::TankId;

/// Gateway tuning.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum calls in flight across all fan-outs.
    pub max_in_flight: usize,
    /// First retry delay for not-ready errors.
    pub initial_backoff: Duration,
    /// Upper bound on the retry delay.
    pub max_backoff: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 16,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// One resolved call target.
#[derive(Clone)]
pub struct RpcTarget {
    /// Tank the result is keyed by.
    pub tank: TankId,
    /// Client for that tank.
    pub client: Arc<dyn NodeRpc>,
}

impl RpcTarget {
    /// Creates a target.
    pub fn new(tank: TankId, client: Arc<dyn NodeRpc>) -> Self {
        Self { tank, client }
    }
}

/// Per-tank results of a fan-out, keyed by tank rather than arrival order.
pub type FanOutResult = BTreeMap<TankId, Result<Value>>;

/// Issues calls to many tanks with bounded concurrency.
///
/// Not-ready failures are retried with exponential backoff until the
/// caller's deadline; every other failure is returned on first sight.
#[derive(Clone)]
pub struct RpcGateway {
    config: GatewayConfig,
    permits: Arc<Semaphore>,
}

impl RpcGateway {
    /// Creates a gateway.
    pub fn new(config: GatewayConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self { config, permits }
    }

    /// Gateway configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Calls `method` on every target concurrently.
    #[instrument(skip(self, targets, params), fields(targets = targets.len()))]
    pub async fn call(
        &self,
        targets: Vec<RpcTarget>,
        method: &str,
        params: &Value,
        deadline: Duration,
    ) -> FanOutResult {
        let calls = targets.into_iter().map(|target| async move {
            let result = self.call_one(&target, method, params, deadline).await;
            (target.tank, result)
        });
        join_all(calls).await.into_iter().collect()
    }

    /// Calls `method` on a single target, retrying while it is not ready.
    pub async fn call_one(
        &self,
        target: &RpcTarget,
        method: &str,
        params: &Value,
        deadline: Duration,
    ) -> Result<Value> {
        let give_up = deadline_from_now(deadline);
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let outcome = timeout_at(give_up, async {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| RpcError::not_ready("gateway closed"))?;
                target.client.call(method, params).await
            })
            .await;

            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if err.is_retryable() => err,
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    return Err(RpcError::timeout(format!(
                        "{method} on {} did not complete within {deadline:?}",
                        target.tank
                    )))
                }
            };

            let now = Instant::now();
            if now >= give_up {
                warn!(tank = %target.tank, method, attempt, "giving up on not-ready node");
                return Err(RpcError::timeout(format!(
                    "{} not ready after {deadline:?} ({attempt} attempts): {}",
                    target.tank, err.message
                )));
            }
            debug!(
                tank = %target.tank,
                method,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "node not ready, backing off"
            );
            sleep(backoff.min(give_up - now)).await;
            backoff = (backoff * 2).min(self.config.max_backoff);
        }
    }
}

impl Default for RpcGateway {
    fn default() -> Self {
        Self::new(GatewayConfig::default())
    }
}

/// Upper bound on a call deadline, roughly thirty years.
const MAX_DEADLINE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_from_now(deadline: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(deadline)
        .or_else(|| now.checked_add(MAX_DEADLINE))
        .unwrap_or(now)
}
