use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use smartpark_core::{GatewayError, GatewayInitiation, GatewayRequest, PaymentGateway, PollStatus, SignedPayload};
use smartpark_shared::Currency;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::app_config::PaynowConfig;

/// Paynow mobile-money client (remote transaction + poll URL protocol).
pub struct PaynowGateway {
    http: reqwest::Client,
    config: PaynowConfig,
}

impl PaynowGateway {
    pub fn new(config: PaynowConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn mobile_url(&self) -> String {
        let base = self.config.initiate_url.trim_end_matches('/');
        if base.ends_with("/mobile") {
            base.to_string()
        } else {
            format!("{}/mobile", base)
        }
    }

    async fn post_form(&self, url: &str, body: String) -> Result<SignedPayload, GatewayError> {
        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !status.is_success() {
            error!(status = %status, response_body = %text, "paynow request failed");
            return Err(GatewayError::Transport(format!("HTTP {}", status)));
        }

        Ok(SignedPayload::parse(text.as_bytes()))
    }

    /// Responses carrying a hash must verify against one of our integration keys
    fn verify_response(&self, payload: &SignedPayload, currency: Option<Currency>) -> Result<(), GatewayError> {
        if payload.get("hash").is_none() {
            return Ok(());
        }
        let keys: Vec<&str> = match currency {
            Some(c) => vec![self.config.credentials(c).integration_key.as_str()],
            None => vec![
                self.config.usd.integration_key.as_str(),
                self.config.zwl.integration_key.as_str(),
            ],
        };
        if keys.into_iter().filter(|k| !k.is_empty()).any(|k| payload.verify(k)) {
            Ok(())
        } else {
            Err(GatewayError::ResponseSignature)
        }
    }
}

#[async_trait]
impl PaymentGateway for PaynowGateway {
    async fn initiate(&self, request: &GatewayRequest) -> Result<GatewayInitiation, GatewayError> {
        let credentials = self.config.credentials(request.currency);
        if credentials.integration_id.is_empty() || credentials.integration_key.is_empty() {
            return Err(GatewayError::NotConfigured(request.currency));
        }

        let form = SignedPayload::from_pairs([
            ("id", credentials.integration_id.clone()),
            ("reference", request.reference.clone()),
            ("amount", format!("{:.2}", request.amount)),
            ("additionalinfo", request.description.clone()),
            ("returnurl", self.config.return_url.clone()),
            ("resulturl", self.config.result_url.clone()),
            ("authemail", request.email.clone()),
            ("phone", request.phone.expose().clone()),
            ("method", request.payment_method.clone()),
            ("status", "Message".to_string()),
        ])
        .sign(&credentials.integration_key);

        debug!(reference = %request.reference, currency = %request.currency, "Initiating paynow mobile payment");
        let response = self.post_form(&self.mobile_url(), form.encode()).await?;

        match response.get("status").map(|s| s.to_ascii_lowercase()) {
            Some(s) if s == "ok" => {
                self.verify_response(&response, Some(request.currency))?;
                let poll_url = response
                    .get("pollurl")
                    .ok_or_else(|| GatewayError::InvalidResponse("missing pollurl".to_string()))?
                    .to_string();
                let instructions = response.get("instructions").unwrap_or_default().to_string();
                Ok(GatewayInitiation::Accepted { poll_url, instructions })
            }
            Some(s) if s == "error" => {
                let message = response
                    .get("error")
                    .unwrap_or("Failed to initiate payment with Paynow.")
                    .to_string();
                warn!(reference = %request.reference, %message, "paynow rejected payment");
                Ok(GatewayInitiation::Rejected { message })
            }
            other => Err(GatewayError::InvalidResponse(format!("unexpected status {:?}", other))),
        }
    }

    async fn poll(&self, poll_url: &str) -> Result<PollStatus, GatewayError> {
        if !poll_url.starts_with("https://") {
            return Err(GatewayError::InvalidResponse(format!("refusing to poll {}", poll_url)));
        }

        let response = self.post_form(poll_url, String::new()).await?;
        self.verify_response(&response, None)?;

        let status = response
            .get("status")
            .ok_or_else(|| GatewayError::InvalidResponse("missing status".to_string()))?;
        Ok(PollStatus::from_status(status))
    }
}
