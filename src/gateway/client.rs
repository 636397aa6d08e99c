use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config as CircuitConfig, Error as FailsafeError, StateMachine};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::intent::ChargeIntent;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(300);

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gateway declined request: {0}")]
    Declined(String),
    #[error("invalid response from gateway: {0}")]
    InvalidResponse(String),
    #[error("gateway circuit breaker open")]
    CircuitOpen,
}

impl GatewayError {
    fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Request(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Standard response envelope used by the processor's API.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InitializedCharge {
    pub authorization_url: String,
    pub reference: String,
}

#[derive(Debug, Deserialize)]
pub struct ChargeVerification {
    pub status: String,
    /// Charged amount in minor units.
    pub amount: i64,
    pub channel: Option<String>,
    pub id: Option<i64>,
    #[serde(default)]
    pub metadata: Option<ChargeIntent>,
}

impl ChargeVerification {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    pub fn external_id(&self) -> Option<String> {
        self.id.map(|id| id.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct RecipientData {
    recipient_code: String,
}

#[derive(Debug, Deserialize)]
struct TransferData {
    id: Option<i64>,
    transfer_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Bank {
    pub name: String,
    pub code: String,
}

/// HTTP client for the external payment processor. Calls are bounded by a
/// request timeout, retried a fixed number of times on transport failure
/// (always with the same reference, so replays are idempotent upstream), and
/// guarded by a circuit breaker.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
    secret_key: String,
    callback_url: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl GatewayClient {
    pub fn new(base_url: String, secret_key: String, callback_url: String) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(Duration::from_secs(60), Duration::from_secs(120));
        let policy = failure_policy::consecutive_failures(3, backoff);
        let circuit_breaker = CircuitConfig::new().failure_policy(policy).build();

        GatewayClient {
            client,
            base_url,
            secret_key,
            callback_url,
            circuit_breaker,
        }
    }

    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }

    /// Initialize a charge. The intent rides along as metadata and comes back
    /// on verification and in webhooks; no local row needs to exist yet.
    pub async fn initialize_charge(
        &self,
        email: &str,
        amount_minor: i64,
        reference: &str,
        currency: &str,
        intent: &ChargeIntent,
    ) -> Result<InitializedCharge, GatewayError> {
        let url = format!("{}/transaction/initialize", self.base());
        let body = serde_json::json!({
            "email": email,
            "amount": amount_minor,
            "currency": currency,
            "reference": reference,
            "callback_url": self.callback_url,
            "metadata": intent,
        });
        self.request_json(Method::POST, url, Some(body)).await
    }

    pub async fn verify_charge(&self, reference: &str) -> Result<ChargeVerification, GatewayError> {
        let url = format!("{}/transaction/verify/{}", self.base(), reference);
        self.request_json(Method::GET, url, None).await
    }

    /// Resolve an existing payout recipient for the destination account, or
    /// create one.
    pub async fn find_or_create_recipient(
        &self,
        name: &str,
        account_number: &str,
        bank_code: &str,
        currency: &str,
    ) -> Result<String, GatewayError> {
        let lookup_url = format!(
            "{}/transferrecipient?account_number={}&bank_code={}",
            self.base(),
            account_number,
            bank_code
        );
        match self
            .request_json::<Vec<RecipientData>>(Method::GET, lookup_url, None)
            .await
        {
            Ok(existing) if !existing.is_empty() => {
                return Ok(existing[0].recipient_code.clone());
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("recipient lookup failed, creating a new one: {e}");
            }
        }

        let url = format!("{}/transferrecipient", self.base());
        let body = serde_json::json!({
            "type": "nuban",
            "name": name,
            "account_number": account_number,
            "bank_code": bank_code,
            "currency": currency,
        });
        let created: RecipientData = self.request_json(Method::POST, url, Some(body)).await?;
        Ok(created.recipient_code)
    }

    /// Start a payout transfer. `reference` is the withdrawal's reference so
    /// that a retried call cannot double-pay.
    pub async fn initiate_transfer(
        &self,
        recipient_code: &str,
        amount_minor: i64,
        reference: &str,
        reason: &str,
    ) -> Result<String, GatewayError> {
        let url = format!("{}/transfer", self.base());
        let body = serde_json::json!({
            "source": "balance",
            "amount": amount_minor,
            "recipient": recipient_code,
            "reason": reason,
            "reference": reference,
        });
        let transfer: TransferData = self.request_json(Method::POST, url, Some(body)).await?;
        transfer
            .transfer_code
            .or_else(|| transfer.id.map(|id| id.to_string()))
            .ok_or_else(|| GatewayError::InvalidResponse("transfer response carried no id".into()))
    }

    pub async fn list_banks(&self, country: &str, currency: &str) -> Result<Vec<Bank>, GatewayError> {
        let url = format!("{}/bank?currency={}&country={}", self.base(), currency, country);
        self.request_json(Method::GET, url, None).await
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: String,
        body: Option<serde_json::Value>,
    ) -> Result<T, GatewayError> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let client = self.client.clone();
            let method = method.clone();
            let url = url.clone();
            let body = body.clone();
            let secret = self.secret_key.clone();

            let result = self
                .circuit_breaker
                .call(async move {
                    let mut request = client.request(method, &url).bearer_auth(&secret);
                    if let Some(body) = &body {
                        request = request.json(body);
                    }
                    let response = request.send().await?;
                    let http_status = response.status();
                    let text = response.text().await?;

                    let envelope: Envelope<T> = serde_json::from_str(&text).map_err(|_| {
                        GatewayError::InvalidResponse(format!(
                            "unexpected body (HTTP {http_status})"
                        ))
                    })?;

                    if !envelope.status {
                        return Err(GatewayError::Declined(
                            envelope.message.unwrap_or_else(|| http_status.to_string()),
                        ));
                    }
                    envelope.data.ok_or_else(|| {
                        GatewayError::InvalidResponse("envelope carried no data".into())
                    })
                })
                .await;

            match result {
                Ok(value) => return Ok(value),
                Err(FailsafeError::Rejected) => return Err(GatewayError::CircuitOpen),
                Err(FailsafeError::Inner(e)) => {
                    if attempt < MAX_ATTEMPTS && e.is_retryable() {
                        tracing::warn!("gateway call attempt {attempt} failed, retrying: {e}");
                        tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use uuid::Uuid;

    fn client_for(server: &mockito::ServerGuard) -> GatewayClient {
        GatewayClient::new(
            server.url(),
            "sk_test_secret".to_string(),
            "https://app.example/callback".to_string(),
        )
    }

    #[tokio::test]
    async fn test_initialize_charge() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/transaction/initialize")
            .match_header("authorization", "Bearer sk_test_secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":true,"message":"Authorization URL created","data":{
                    "authorization_url":"https://pay.example/abc123",
                    "access_code":"abc123",
                    "reference":"fund_x1"
                }}"#,
            )
            .create_async()
            .await;

        let intent = ChargeIntent::Funding {
            account_id: Uuid::new_v4(),
            amount: BigDecimal::from(500),
        };
        let charge = client_for(&server)
            .initialize_charge("buyer@example.com", 50_000, "fund_x1", "NGN", &intent)
            .await
            .unwrap();

        assert_eq!(charge.authorization_url, "https://pay.example/abc123");
        assert_eq!(charge.reference, "fund_x1");
    }

    #[tokio::test]
    async fn test_verify_charge_returns_intent_metadata() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/transaction/verify/fund_x1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":true,"message":"Verification successful","data":{
                    "status":"success",
                    "amount":50000,
                    "channel":"card",
                    "id":987654,
                    "metadata":{"kind":"funding","account_id":"7f4df01e-92c5-4f67-9a3e-111111111111","amount":"500"}
                }}"#,
            )
            .create_async()
            .await;

        let verification = client_for(&server).verify_charge("fund_x1").await.unwrap();
        assert!(verification.is_success());
        assert_eq!(verification.amount, 50_000);
        assert_eq!(verification.external_id().as_deref(), Some("987654"));
        assert!(matches!(
            verification.metadata,
            Some(ChargeIntent::Funding { .. })
        ));
    }

    #[tokio::test]
    async fn test_declined_envelope_surfaces_message() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/transaction/verify/missing")
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":false,"message":"Transaction reference not found"}"#)
            .create_async()
            .await;

        let err = client_for(&server).verify_charge("missing").await.unwrap_err();
        match err {
            GatewayError::Declined(message) => {
                assert!(message.contains("not found"));
            }
            other => panic!("expected Declined, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_banks() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/bank?currency=NGN&country=nigeria")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":true,"message":"Banks retrieved","data":[
                    {"name":"First Bank","code":"011"},
                    {"name":"GTBank","code":"058"}
                ]}"#,
            )
            .create_async()
            .await;

        let banks = client_for(&server).list_banks("nigeria", "NGN").await.unwrap();
        assert_eq!(banks.len(), 2);
        assert_eq!(banks[1].code, "058");
    }

    #[tokio::test]
    async fn test_transfer_prefers_transfer_code() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/transfer")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":true,"message":"Transfer queued","data":{"id":42,"transfer_code":"TRF_abc"}}"#,
            )
            .create_async()
            .await;

        let transfer_id = client_for(&server)
            .initiate_transfer("RCP_1", 50_000, "wd_x1", "payout")
            .await
            .unwrap();
        assert_eq!(transfer_id, "TRF_abc");
    }

    #[test]
    fn test_circuit_starts_closed() {
        let client = GatewayClient::new(
            "https://api.gateway.example".to_string(),
            "sk".to_string(),
            "https://cb.example".to_string(),
        );
        assert_eq!(client.circuit_state(), "closed");
    }
}
