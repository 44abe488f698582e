use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smartpark_shared::{Currency, Masked};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment gateway unreachable: {0}")]
    Transport(String),
    #[error("Payment gateway returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("Payment gateway response failed hash verification")]
    ResponseSignature,
    #[error("Payment gateway is not configured for {0}")]
    NotConfigured(Currency),
}

/// Outbound mobile-money payment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub reference: String,
    pub amount: f64,
    pub currency: Currency,
    pub payment_method: String,
    pub phone: Masked<String>,
    pub email: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayInitiation {
    Accepted { poll_url: String, instructions: String },
    Rejected { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollStatus {
    pub paid: bool,
    pub status: String,
}

impl PollStatus {
    pub fn from_status(status: impl Into<String>) -> Self {
        let status = status.into();
        let paid = classify_status(&status) == GatewayOutcome::Paid;
        Self { paid, status }
    }
}

/// What a gateway status means for an intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    Paid,
    Pending,
    Failed(String),
}

pub fn classify_status(status: &str) -> GatewayOutcome {
    match status.trim().to_ascii_lowercase().as_str() {
        "paid" | "awaiting delivery" | "delivered" => GatewayOutcome::Paid,
        s @ ("cancelled" | "failed" | "disputed" | "refunded") => GatewayOutcome::Failed(s.to_string()),
        _ => GatewayOutcome::Pending,
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Start a mobile-money collection
    async fn initiate(&self, request: &GatewayRequest) -> Result<GatewayInitiation, GatewayError>;

    /// Ask the gateway for the current status behind `poll_url`
    async fn poll(&self, poll_url: &str) -> Result<PollStatus, GatewayError>;
}

/// Scripted in-process gateway used by the `mock` payment mode and by tests.
pub struct MockPaymentGateway {
    script: Mutex<MockScript>,
}

struct MockScript {
    reject_with: Option<String>,
    fail_transport: bool,
    poll_status: String,
    requests: Vec<GatewayRequest>,
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self {
            script: Mutex::new(MockScript {
                reject_with: None,
                fail_transport: false,
                poll_status: "Sent".to_string(),
                requests: Vec::new(),
            }),
        }
    }
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_with(&self, message: impl Into<String>) {
        self.with_script(|s| s.reject_with = Some(message.into()));
    }

    pub fn fail_transport(&self, fail: bool) {
        self.with_script(|s| s.fail_transport = fail);
    }

    pub fn set_poll_status(&self, status: impl Into<String>) {
        self.with_script(|s| s.poll_status = status.into());
    }

    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.with_script(|s| s.requests.clone())
    }

    fn with_script<R>(&self, f: impl FnOnce(&mut MockScript) -> R) -> R {
        let mut guard = match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn initiate(&self, request: &GatewayRequest) -> Result<GatewayInitiation, GatewayError> {
        self.with_script(|s| {
            s.requests.push(request.clone());
            if s.fail_transport {
                return Err(GatewayError::Transport("simulated outage".to_string()));
            }
            Ok(match &s.reject_with {
                Some(message) => GatewayInitiation::Rejected { message: message.clone() },
                None => GatewayInitiation::Accepted {
                    poll_url: format!("mock://poll/{}", request.reference),
                    instructions: format!("Dial *151# to approve {:.2} {}", request.amount, request.currency),
                },
            })
        })
    }

    async fn poll(&self, _poll_url: &str) -> Result<PollStatus, GatewayError> {
        self.with_script(|s| {
            if s.fail_transport {
                return Err(GatewayError::Transport("simulated outage".to_string()));
            }
            Ok(PollStatus::from_status(s.poll_status.clone()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_gateway_statuses() {
        assert_eq!(classify_status("Paid"), GatewayOutcome::Paid);
        assert_eq!(classify_status("Awaiting Delivery"), GatewayOutcome::Paid);
        assert_eq!(classify_status("Cancelled"), GatewayOutcome::Failed("cancelled".into()));
        assert_eq!(classify_status("Refunded"), GatewayOutcome::Failed("refunded".into()));
        assert_eq!(classify_status("Sent"), GatewayOutcome::Pending);
        assert_eq!(classify_status("Created"), GatewayOutcome::Pending);
        assert_eq!(classify_status("something new"), GatewayOutcome::Pending);
    }

    #[tokio::test]
    async fn test_mock_gateway_script() {
        let gateway = MockPaymentGateway::new();
        let request = GatewayRequest {
            reference: "SP-u1-lot-P1-2-1".into(),
            amount: 4.0,
            currency: Currency::Usd,
            payment_method: "ecocash".into(),
            phone: "0771234567".to_string().into(),
            email: "u1@example.com".into(),
            description: "Parking".into(),
        };

        let accepted = gateway.initiate(&request).await.unwrap();
        assert!(matches!(accepted, GatewayInitiation::Accepted { .. }));

        gateway.reject_with("Insufficient balance");
        let rejected = gateway.initiate(&request).await.unwrap();
        assert_eq!(rejected, GatewayInitiation::Rejected { message: "Insufficient balance".into() });

        gateway.set_poll_status("Paid");
        assert!(gateway.poll("mock://poll/x").await.unwrap().paid);
        assert_eq!(gateway.requests().len(), 2);
    }
}
