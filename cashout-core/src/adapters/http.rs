//! HTTP plumbing shared by the provider clients
//!
//! Maps transport failures and HTTP status codes onto the provider error
//! taxonomy, and caches OAuth-style access tokens.

use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tokio::sync::Mutex;

use crate::domain::provider::code_from_reason;
use crate::domain::{ProviderError, ProviderErrorCode};

/// Tokens are refreshed this long before the provider says they expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Map a reqwest transport error to a provider error
pub fn map_request_error(provider: &str, error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::timeout(format!("{} request timed out", provider))
    } else if error.is_connect() {
        ProviderError::network(format!("Unable to connect to {}: {}", provider, error))
    } else if error.is_decode() {
        ProviderError::unknown(format!("{} returned an unreadable response: {}", provider, error))
    } else {
        ProviderError::network(format!("{} request failed: {}", provider, error))
    }
}

/// Map a non-success HTTP status to a provider error.
///
/// `status_check` distinguishes a 404 on a status lookup (the provider does
/// not know the transaction) from a 404 elsewhere.
pub fn map_status_error(provider: &str, status: StatusCode, body: &str, status_check: bool) -> ProviderError {
    let detail = if body.trim().is_empty() {
        format!("{} returned HTTP {}", provider, status.as_u16())
    } else {
        format!("{} returned HTTP {}: {}", provider, status.as_u16(), body.trim())
    };

    let code = match status.as_u16() {
        429 => ProviderErrorCode::RateLimited,
        503 => ProviderErrorCode::ServiceUnavailable,
        502 | 504 => ProviderErrorCode::ProviderUnavailable,
        500..=599 => ProviderErrorCode::TemporaryFailure,
        400 | 422 => code_from_reason(body).unwrap_or(ProviderErrorCode::ValidationFailed),
        404 if status_check => {
            return ProviderError::unknown(format!("{}: transaction not known to the provider", detail));
        }
        401 | 403 => {
            return ProviderError::unknown(format!("{} authentication failed: {}", provider, detail));
        }
        _ => ProviderErrorCode::Unknown,
    };
    ProviderError::new(code, detail)
}

/// Drain the response body, mapping failure to success-or-provider-error
pub async fn check_response(
    provider: &str,
    response: reqwest::Response,
    status_check: bool,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(map_status_error(provider, status, &body, status_check))
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Single cached bearer token, refreshed on demand
#[derive(Default)]
pub struct TokenCache {
    inner: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached token, or fetch and cache a new one.
    ///
    /// `fetch` yields the token and its lifetime in seconds.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<String, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(String, u64), ProviderError>>,
    {
        let mut guard = self.inner.lock().await;
        if let Some(token) = guard.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let (value, expires_in) = fetch().await?;
        let lifetime = Duration::from_secs(expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *guard = Some(CachedToken {
            value: value.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    /// Drop the cached token (after the provider rejects it)
    pub async fn invalidate(&self) {
        *self.inner.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(status: u16, body: &str, status_check: bool) -> ProviderErrorCode {
        map_status_error("Test", StatusCode::from_u16(status).unwrap(), body, status_check).code
    }

    #[test]
    fn test_transient_status_mapping() {
        assert_eq!(code(429, "", false), ProviderErrorCode::RateLimited);
        assert_eq!(code(503, "", false), ProviderErrorCode::ServiceUnavailable);
        assert_eq!(code(502, "", false), ProviderErrorCode::ProviderUnavailable);
        assert_eq!(code(504, "", false), ProviderErrorCode::ProviderUnavailable);
        assert_eq!(code(500, "", false), ProviderErrorCode::TemporaryFailure);
    }

    #[test]
    fn test_client_error_mapping() {
        assert_eq!(code(400, "{}", false), ProviderErrorCode::ValidationFailed);
        assert_eq!(
            code(400, r#"{"code":"NOT_ENOUGH_FUNDS"}"#, false),
            ProviderErrorCode::InsufficientFunds
        );
        assert_eq!(
            code(422, "PAYEE_NOT_FOUND", false),
            ProviderErrorCode::AccountNotFound
        );
        assert_eq!(code(404, "", true), ProviderErrorCode::Unknown);
        assert_eq!(code(401, "", false), ProviderErrorCode::Unknown);
    }

    #[test]
    fn test_auth_failure_message() {
        let err = map_status_error("MTN MoMo", StatusCode::UNAUTHORIZED, "", false);
        assert!(err.message.contains("authentication failed"));
    }

    #[tokio::test]
    async fn test_token_cache_reuses_token() {
        let cache = TokenCache::new();
        let first = cache
            .get_or_fetch(|| async { Ok(("abc".to_string(), 3600)) })
            .await
            .unwrap();
        let second = cache
            .get_or_fetch(|| async { Err(ProviderError::network("should not be called")) })
            .await
            .unwrap();
        assert_eq!(first, "abc");
        assert_eq!(second, "abc");

        cache.invalidate().await;
        let third = cache
            .get_or_fetch(|| async { Ok(("def".to_string(), 3600)) })
            .await
            .unwrap();
        assert_eq!(third, "def");
    }

    #[tokio::test]
    async fn test_short_lived_token_is_refetched() {
        let cache = TokenCache::new();
        cache
            .get_or_fetch(|| async { Ok(("old".to_string(), 30)) })
            .await
            .unwrap();
        let next = cache
            .get_or_fetch(|| async { Ok(("new".to_string(), 3600)) })
            .await
            .unwrap();
        assert_eq!(next, "new");
    }
}
