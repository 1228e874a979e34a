//! MTN MoMo disbursement API client
//!
//! Pays out cash-outs through the MoMo Disbursement product. A transfer is
//! identified by the `X-Reference-Id` we choose, derived from the cash-out
//! record id so that re-sending the same cash-out can never create a second
//! transfer.
//!
//! API Documentation: https://momodeveloper.mtn.com/api-documentation

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use super::http::{check_response, map_request_error, TokenCache};
use crate::config::MtnMomoSettings;
use crate::domain::provider::code_from_reason;
use crate::domain::result::{Error, Result};
use crate::domain::{
    CashOutRecord, Provider, ProviderError, ProviderResult, ProviderStatus, ProviderStatusReport,
};
use crate::ports::ProviderAdapter;

const PROVIDER_NAME: &str = "MTN MoMo";

/// Namespace for deriving transfer reference ids from cash-out references
const TRANSFER_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_8b3d_4f90_9c21_7de5_0a3b_c814);

// =============================================================================
// API Models
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequest<'a> {
    amount: String,
    currency: &'a str,
    external_id: &'a str,
    payee: Party<'a>,
    payer_message: String,
    payee_note: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Party<'a> {
    party_id_type: &'static str,
    party_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferStatus {
    status: String,
    /// Either a bare string or `{ "code": ..., "message": ... }`
    #[serde(default)]
    reason: Option<JsonValue>,
}

impl TransferStatus {
    fn reason_text(&self) -> Option<String> {
        match self.reason.as_ref()? {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Object(map) => map
                .get("code")
                .or_else(|| map.get("message"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            _ => None,
        }
    }
}

/// Map a MoMo transfer status to the provider status
fn map_transfer_status(status: &str) -> ProviderStatus {
    match status.to_uppercase().as_str() {
        "SUCCESSFUL" => ProviderStatus::Completed,
        "FAILED" | "REJECTED" | "TIMEOUT" => ProviderStatus::Failed,
        "PENDING" => ProviderStatus::Processing,
        _ => ProviderStatus::Pending,
    }
}

/// Transfer reference id for the cash-out with `cash_out_id`
pub fn transfer_reference_id(cash_out_id: Uuid) -> Uuid {
    Uuid::new_v5(&TRANSFER_NAMESPACE, cash_out_id.as_bytes())
}

// =============================================================================
// MtnMomoProvider
// =============================================================================

/// MTN MoMo disbursement adapter
pub struct MtnMomoProvider {
    client: Client,
    base_url: String,
    api_user: String,
    api_key: String,
    subscription_key: String,
    target_environment: String,
    token: TokenCache,
}

impl MtnMomoProvider {
    pub fn new(settings: &MtnMomoSettings) -> Result<Self> {
        if !settings.is_configured() {
            return Err(Error::config(
                "MTN MoMo requires apiUser, apiKey and subscriptionKey",
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_user: settings.api_user.clone().unwrap_or_default(),
            api_key: settings.api_key.clone().unwrap_or_default(),
            subscription_key: settings.subscription_key.clone().unwrap_or_default(),
            target_environment: settings.target_environment.clone(),
            token: TokenCache::new(),
        })
    }

    async fn access_token(&self) -> std::result::Result<String, ProviderError> {
        self.token
            .get_or_fetch(move || async move {
                let url = format!("{}/disbursement/token/", self.base_url);
                let credentials = BASE64.encode(format!("{}:{}", self.api_user, self.api_key));
                let response = self
                    .client
                    .post(&url)
                    .header("Authorization", format!("Basic {}", credentials))
                    .header("Ocp-Apim-Subscription-Key", &self.subscription_key)
                    .send()
                    .await
                    .map_err(|e| map_request_error(PROVIDER_NAME, e))?;
                let response = check_response(PROVIDER_NAME, response, false).await?;
                let token: TokenResponse = response
                    .json()
                    .await
                    .map_err(|e| map_request_error(PROVIDER_NAME, e))?;
                Ok((token.access_token, token.expires_in))
            })
            .await
    }

    async fn invalidate_on_auth_failure(&self, error: &ProviderError) {
        if error.message.contains("authentication failed") {
            self.token.invalidate().await;
        }
    }
}

#[async_trait]
impl ProviderAdapter for MtnMomoProvider {
    fn provider(&self) -> Provider {
        Provider::MtnMomo
    }

    async fn initiate(&self, record: &CashOutRecord) -> std::result::Result<ProviderResult, ProviderError> {
        let token = self.access_token().await?;
        let reference_id = transfer_reference_id(record.id).to_string();
        let url = format!("{}/disbursement/v1_0/transfer", self.base_url);

        let body = TransferRequest {
            amount: record.amount.normalize().to_string(),
            currency: &record.currency,
            external_id: &record.reference,
            payee: Party {
                party_id_type: "MSISDN",
                party_id: &record.provider_account_id,
            },
            payer_message: format!("Cash-out {}", record.reference),
            payee_note: format!("Cash-out {}", record.reference),
        };

        debug!(reference = %record.reference, reference_id = %reference_id, "Initiating MoMo transfer");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .header("X-Reference-Id", &reference_id)
            .header("X-Target-Environment", &self.target_environment)
            .header("Ocp-Apim-Subscription-Key", &self.subscription_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_request_error(PROVIDER_NAME, e))?;

        let http_status = response.status();
        // 409: a transfer with this reference id already exists, i.e. we sent it before
        if http_status == StatusCode::CONFLICT {
            return Ok(ProviderResult {
                provider_transaction_id: reference_id.clone(),
                status: ProviderStatus::Processing,
                provider_response: serde_json::json!({
                    "referenceId": reference_id,
                    "httpStatus": http_status.as_u16(),
                    "duplicate": true,
                }),
            });
        }

        if let Err(error) = check_response(PROVIDER_NAME, response, false).await {
            self.invalidate_on_auth_failure(&error).await;
            return Err(error);
        }

        Ok(ProviderResult {
            provider_transaction_id: reference_id.clone(),
            status: ProviderStatus::Processing,
            provider_response: serde_json::json!({
                "referenceId": reference_id,
                "httpStatus": http_status.as_u16(),
            }),
        })
    }

    async fn check_status(
        &self,
        provider_transaction_id: &str,
    ) -> std::result::Result<ProviderStatusReport, ProviderError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/disbursement/v1_0/transfer/{}",
            self.base_url, provider_transaction_id
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .header("X-Target-Environment", &self.target_environment)
            .header("Ocp-Apim-Subscription-Key", &self.subscription_key)
            .send()
            .await
            .map_err(|e| map_request_error(PROVIDER_NAME, e))?;

        let response = match check_response(PROVIDER_NAME, response, true).await {
            Ok(response) => response,
            Err(error) => {
                self.invalidate_on_auth_failure(&error).await;
                return Err(error);
            }
        };

        let raw: JsonValue = response
            .json()
            .await
            .map_err(|e| map_request_error(PROVIDER_NAME, e))?;
        parse_status_report(raw)
    }
}

fn parse_status_report(raw: JsonValue) -> std::result::Result<ProviderStatusReport, ProviderError> {
    let parsed: TransferStatus = serde_json::from_value(raw.clone()).map_err(|e| {
        ProviderError::unknown(format!("Unexpected {} status payload: {}", PROVIDER_NAME, e))
    })?;
    let status = map_transfer_status(&parsed.status);
    let failure_reason = if status == ProviderStatus::Failed {
        Some(
            parsed
                .reason_text()
                .map(|reason| match code_from_reason(&reason) {
                    Some(code) => format!("{}: {}", code, reason),
                    None => reason,
                })
                .unwrap_or_else(|| "Transfer failed".to_string()),
        )
    } else {
        None
    };

    Ok(ProviderStatusReport {
        status,
        provider_response: raw,
        failure_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MtnMomoSettings {
        MtnMomoSettings {
            base_url: "http://localhost:8080/".to_string(),
            api_user: Some("user".to_string()),
            api_key: Some("key".to_string()),
            subscription_key: Some("sub".to_string()),
            ..MtnMomoSettings::default()
        }
    }

    #[test]
    fn test_requires_credentials() {
        let result = MtnMomoProvider::new(&MtnMomoSettings::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let provider = MtnMomoProvider::new(&settings()).unwrap();
        assert_eq!(provider.base_url, "http://localhost:8080");
        assert_eq!(provider.provider(), Provider::MtnMomo);
    }

    #[test]
    fn test_transfer_reference_id_is_stable() {
        let id = Uuid::new_v4();
        let a = transfer_reference_id(id);
        let b = transfer_reference_id(id);
        let c = transfer_reference_id(Uuid::new_v4());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, id);
        assert_eq!(a.get_version_num(), 5);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_transfer_status("SUCCESSFUL"), ProviderStatus::Completed);
        assert_eq!(map_transfer_status("FAILED"), ProviderStatus::Failed);
        assert_eq!(map_transfer_status("PENDING"), ProviderStatus::Processing);
        assert_eq!(map_transfer_status("CREATED"), ProviderStatus::Pending);
    }

    #[test]
    fn test_failed_status_report_carries_reason() {
        let report = parse_status_report(serde_json::json!({
            "status": "FAILED",
            "reason": { "code": "NOT_ENOUGH_FUNDS", "message": "Not enough funds" }
        }))
        .unwrap();
        assert_eq!(report.status, ProviderStatus::Failed);
        assert_eq!(
            report.failure_reason.as_deref(),
            Some("INSUFFICIENT_FUNDS: NOT_ENOUGH_FUNDS")
        );

        let report = parse_status_report(serde_json::json!({"status": "FAILED"})).unwrap();
        assert_eq!(report.failure_reason.as_deref(), Some("Transfer failed"));
    }

    #[test]
    fn test_successful_status_report() {
        let report = parse_status_report(serde_json::json!({
            "status": "SUCCESSFUL",
            "financialTransactionId": "363440463"
        }))
        .unwrap();
        assert_eq!(report.status, ProviderStatus::Completed);
        assert!(report.failure_reason.is_none());
        assert_eq!(report.provider_response["financialTransactionId"], "363440463");
    }

    #[test]
    fn test_malformed_status_payload() {
        let err = parse_status_report(serde_json::json!({"unexpected": true})).unwrap_err();
        assert_eq!(err.code, crate::domain::ProviderErrorCode::Unknown);
    }
}
