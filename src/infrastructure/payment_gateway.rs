use crate::domain::ports::{PaymentGateway, PaymentRequest};
use crate::error::{DispatchError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct PostPaymentBody {
    amount: i64,
}

/// HTTP client for the payment gateway's `POST /payments` endpoint.
///
/// Only `204 No Content` counts as an accepted payment.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
}

impl HttpPaymentGateway {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn post_payment(&self, base_url: &str, request: &PaymentRequest) -> Result<()> {
        let url = format!("{}/payments", base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&request.token)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&PostPaymentBody {
                amount: request.amount.value(),
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(()),
            status => Err(DispatchError::UpstreamFailure(format!(
                "payment gateway answered {} instead of 204",
                status
            ))),
        }
    }
}
