use crate::domain::fare::Fare;
use crate::domain::ports::{PaymentGatewayRef, PaymentRequest};
use crate::error::{DispatchError, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_CONCURRENCY: usize = 100;
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Charges riders through the external gateway.
///
/// Calls are capped process-wide by a semaphore. A failed attempt is retried
/// immediately with the same idempotency key, so the gateway sees every try
/// as the same logical payment.
pub struct PaymentSettlement {
    gateway: PaymentGatewayRef,
    permits: Arc<Semaphore>,
    max_retries: u32,
}

impl PaymentSettlement {
    pub fn new(gateway: PaymentGatewayRef, max_concurrency: usize, max_retries: u32) -> Self {
        Self {
            gateway,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            max_retries,
        }
    }

    /// Pays `amount` with `token`. Makes at most `1 + max_retries` attempts;
    /// when all of them fail the error is `UpstreamFailure`.
    pub async fn settle(&self, base_url: &str, token: &str, amount: Fare) -> Result<()> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| DispatchError::internal("payment semaphore closed"))?;

        let request = PaymentRequest {
            amount,
            token: token.to_string(),
            idempotency_key: Uuid::now_v7().to_string(),
        };

        let mut retry = 0;
        loop {
            match self.gateway.post_payment(base_url, &request).await {
                Ok(()) => {
                    debug!(idempotency_key = %request.idempotency_key, %amount, retry, "payment accepted");
                    return Ok(());
                }
                Err(err) if retry < self.max_retries => {
                    retry += 1;
                    warn!(idempotency_key = %request.idempotency_key, retry, error = %err, "payment attempt failed, retrying");
                }
                Err(err) => {
                    error!(idempotency_key = %request.idempotency_key, retry, error = %err, "payment gateway retries exhausted");
                    return Err(DispatchError::UpstreamFailure(format!(
                        "payment gateway failed after {} attempts: {}",
                        retry + 1,
                        err
                    )));
                }
            }
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}
