//! Airtel Money disbursement API client
//!
//! Disbursements are keyed by the transaction id we send, which is the
//! cash-out reference. Airtel rejects a repeated id, so a resent cash-out
//! cannot be paid twice.
//!
//! API Documentation: https://developers.airtel.africa/documentation

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use super::http::{check_response, map_request_error, TokenCache};
use crate::config::AirtelMoneySettings;
use crate::domain::provider::code_from_reason;
use crate::domain::result::{Error, Result};
use crate::domain::{
    CashOutRecord, Provider, ProviderError, ProviderErrorCode, ProviderResult, ProviderStatus,
    ProviderStatusReport,
};
use crate::ports::ProviderAdapter;

const PROVIDER_NAME: &str = "Airtel Money";

// =============================================================================
// API Models
// =============================================================================

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default, deserialize_with = "deserialize_seconds")]
    expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
struct DisbursementRequest<'a> {
    payee: Payee<'a>,
    reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pin: Option<&'a str>,
    transaction: DisbursementTransaction<'a>,
}

#[derive(Debug, Serialize)]
struct Payee<'a> {
    msisdn: &'a str,
}

#[derive(Debug, Serialize)]
struct DisbursementTransaction<'a> {
    amount: String,
    id: &'a str,
}

/// Envelope shared by every Airtel response
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<EnvelopeData>,
    #[serde(default)]
    status: Option<EnvelopeStatus>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    #[serde(default)]
    transaction: Option<AirtelTransaction>,
}

#[derive(Debug, Deserialize)]
struct AirtelTransaction {
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeStatus {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Deserialize a lifetime that Airtel sends as a number or a string
fn deserialize_seconds<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<JsonValue> = Option::deserialize(deserializer)?;
    match value {
        Some(JsonValue::Number(n)) => Ok(n.as_u64()),
        Some(JsonValue::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| D::Error::custom(format!("invalid expires_in: {}", e))),
        Some(JsonValue::Null) | None => Ok(None),
        _ => Err(D::Error::custom("expected number or string for expires_in")),
    }
}

/// Deserialize optional ID that can be number or string
fn deserialize_optional_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<JsonValue> = Option::deserialize(deserializer)?;
    match value {
        Some(JsonValue::Number(n)) => Ok(Some(n.to_string())),
        Some(JsonValue::String(s)) => Ok(Some(s)),
        Some(JsonValue::Null) | None => Ok(None),
        _ => Err(D::Error::custom("expected number or string for id")),
    }
}

/// Map an Airtel transaction status code to the provider status
fn map_transaction_status(code: &str) -> ProviderStatus {
    match code.to_uppercase().as_str() {
        "TS" => ProviderStatus::Completed,
        "TF" => ProviderStatus::Failed,
        "TIP" => ProviderStatus::Processing,
        // TA (ambiguous) and anything unrecognised: keep asking
        _ => ProviderStatus::Pending,
    }
}

/// Provider error for an envelope that reports `success: false`
fn rejection_error(status: &EnvelopeStatus) -> ProviderError {
    let message = status
        .message
        .clone()
        .unwrap_or_else(|| "Disbursement rejected".to_string());
    let code = code_from_reason(&message).unwrap_or(ProviderErrorCode::Unknown);
    match &status.code {
        Some(c) => ProviderError::new(code, format!("{} ({})", message, c)),
        None => ProviderError::new(code, message),
    }
}

// =============================================================================
// AirtelMoneyProvider
// =============================================================================

/// Airtel Money disbursement adapter
pub struct AirtelMoneyProvider {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    country: String,
    currency: String,
    pin: Option<String>,
    token: TokenCache,
}

impl AirtelMoneyProvider {
    pub fn new(settings: &AirtelMoneySettings) -> Result<Self> {
        if !settings.is_configured() {
            return Err(Error::config("Airtel Money requires clientId and clientSecret"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            client_id: settings.client_id.clone().unwrap_or_default(),
            client_secret: settings.client_secret.clone().unwrap_or_default(),
            country: settings.country.clone(),
            currency: settings.currency.clone(),
            pin: settings.pin.clone(),
            token: TokenCache::new(),
        })
    }

    async fn access_token(&self) -> std::result::Result<String, ProviderError> {
        self.token
            .get_or_fetch(move || async move {
                let url = format!("{}/auth/oauth2/token", self.base_url);
                let response = self
                    .client
                    .post(&url)
                    .json(&TokenRequest {
                        client_id: &self.client_id,
                        client_secret: &self.client_secret,
                        grant_type: "client_credentials",
                    })
                    .send()
                    .await
                    .map_err(|e| map_request_error(PROVIDER_NAME, e))?;
                let response = check_response(PROVIDER_NAME, response, false).await?;
                let token: TokenResponse = response
                    .json()
                    .await
                    .map_err(|e| map_request_error(PROVIDER_NAME, e))?;
                Ok((token.access_token, token.expires_in.unwrap_or(180)))
            })
            .await
    }

    fn request(&self, builder: reqwest::RequestBuilder, token: &str, currency: &str) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(token)
            .header("X-Country", &self.country)
            .header("X-Currency", currency)
            .header("Accept", "*/*")
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        status_check: bool,
    ) -> std::result::Result<JsonValue, ProviderError> {
        let response = builder
            .send()
            .await
            .map_err(|e| map_request_error(PROVIDER_NAME, e))?;
        let response = match check_response(PROVIDER_NAME, response, status_check).await {
            Ok(response) => response,
            Err(error) => {
                if error.message.contains("authentication failed") {
                    self.token.invalidate().await;
                }
                return Err(error);
            }
        };
        response
            .json()
            .await
            .map_err(|e| map_request_error(PROVIDER_NAME, e))
    }
}

#[async_trait]
impl ProviderAdapter for AirtelMoneyProvider {
    fn provider(&self) -> Provider {
        Provider::AirtelMoney
    }

    async fn initiate(&self, record: &CashOutRecord) -> std::result::Result<ProviderResult, ProviderError> {
        let token = self.access_token().await?;
        let url = format!("{}/standard/v1/disbursements/", self.base_url);

        let body = DisbursementRequest {
            payee: Payee {
                msisdn: &record.provider_account_id,
            },
            reference: &record.reference,
            pin: self.pin.as_deref(),
            transaction: DisbursementTransaction {
                amount: record.amount.normalize().to_string(),
                id: &record.reference,
            },
        };

        debug!(reference = %record.reference, "Initiating Airtel disbursement");

        let builder = self.request(self.client.post(&url), &token, &record.currency).json(&body);
        let raw = self.send(builder, false).await?;
        parse_disbursement(raw, &record.reference)
    }

    async fn check_status(
        &self,
        provider_transaction_id: &str,
    ) -> std::result::Result<ProviderStatusReport, ProviderError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/standard/v1/disbursements/{}",
            self.base_url, provider_transaction_id
        );
        let builder = self.request(self.client.get(&url), &token, &self.currency);
        let raw = self.send(builder, true).await?;
        parse_status_report(raw)
    }
}

fn parse_envelope(raw: &JsonValue) -> std::result::Result<Envelope, ProviderError> {
    serde_json::from_value(raw.clone()).map_err(|e| {
        ProviderError::unknown(format!("Unexpected {} payload: {}", PROVIDER_NAME, e))
    })
}

fn parse_disbursement(raw: JsonValue, reference: &str) -> std::result::Result<ProviderResult, ProviderError> {
    let envelope = parse_envelope(&raw)?;
    if let Some(status) = envelope.status.as_ref() {
        if status.success == Some(false) {
            return Err(rejection_error(status));
        }
    }

    let transaction = envelope.data.and_then(|d| d.transaction);
    // Status enquiries are made with our own transaction id
    let provider_transaction_id = transaction
        .as_ref()
        .and_then(|t| t.id.clone())
        .unwrap_or_else(|| reference.to_string());
    let status = transaction
        .as_ref()
        .and_then(|t| t.status.as_deref())
        .map(map_transaction_status)
        .unwrap_or(ProviderStatus::Processing);

    Ok(ProviderResult {
        provider_transaction_id,
        status,
        provider_response: raw,
    })
}

fn parse_status_report(raw: JsonValue) -> std::result::Result<ProviderStatusReport, ProviderError> {
    let envelope = parse_envelope(&raw)?;
    let transaction = envelope.data.and_then(|d| d.transaction).ok_or_else(|| {
        ProviderError::unknown(format!("{} status response has no transaction", PROVIDER_NAME))
    })?;

    let status = transaction
        .status
        .as_deref()
        .map(map_transaction_status)
        .unwrap_or(ProviderStatus::Pending);
    let failure_reason = if status == ProviderStatus::Failed {
        Some(transaction.message.unwrap_or_else(|| "TF".to_string()))
    } else {
        None
    };

    Ok(ProviderStatusReport {
        status,
        provider_response: raw,
        failure_reason,
    })
}
