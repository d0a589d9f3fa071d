//! HTTP client for token issuance and renewal against the coordinator.

use async_trait::async_trait;
use std::time::Duration;

use crate::constants::{DEFAULT_HTTP_TIMEOUT, ISSUE_TOKEN_PATH, RENEW_TOKEN_PATH};
use crate::error::{Error, Result};
use crate::types::{IssueTokenRequest, TokenResponse};

/// Failures while obtaining a token from the coordinator.
///
/// `Clone` so that one in-flight renewal outcome can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenewalError {
    /// Connection-level failure (DNS, TCP, TLS).
    #[error("renewal transport error: {0}")]
    Transport(String),

    /// The call exceeded the client timeout.
    #[error("renewal request timed out")]
    Timeout,

    /// The coordinator answered with a non-success status.
    #[error("renewal rejected with HTTP {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The response body was not a token response.
    #[error("malformed renewal response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for RenewalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// A freshly obtained token and its validity window.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    /// Signed bearer token.
    pub token: String,
    /// Time until the token expires, measured from receipt.
    pub expires_in: Duration,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl From<TokenResponse> for TokenGrant {
    fn from(resp: TokenResponse) -> Self {
        Self {
            expires_in: resp.expires_in(),
            token: resp.token,
        }
    }
}

/// Exchanges a still-valid token for a new one.
///
/// Implemented over HTTP by [`HttpTokenClient`]; tests substitute their own.
#[async_trait]
pub trait TokenRenewer: Send + Sync {
    /// Renews using `current_token` as the bearer credential.
    async fn renew(&self, current_token: &str) -> std::result::Result<TokenGrant, RenewalError>;
}

/// `reqwest`-backed client for the coordinator's token routes.
///
/// # Examples
///
/// ```rust,no_run
/// use mission_control::auth::HttpTokenClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpTokenClient::new("http://commander-service:8080")?;
/// let grant = client.issue("soldier-1").await?;
/// println!("token valid for {:?}", grant.expires_in);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpTokenClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTokenClient {
    /// Creates a client for the coordinator at `base_url` with a 5 second timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_HTTP_TIMEOUT)
    }

    /// Creates a client with an explicit per-request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Coordinator base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Acquires an initial token for `identity`.
    pub async fn issue(&self, identity: &str) -> std::result::Result<TokenGrant, RenewalError> {
        let url = format!("{}{}", self.base_url, ISSUE_TOKEN_PATH);
        tracing::debug!("Requesting initial token for {} from {}", identity, url);

        let response = self
            .client
            .post(&url)
            .json(&IssueTokenRequest {
                identity: identity.to_string(),
            })
            .send()
            .await?;

        read_grant(response).await
    }
}

#[async_trait]
impl TokenRenewer for HttpTokenClient {
    async fn renew(&self, current_token: &str) -> std::result::Result<TokenGrant, RenewalError> {
        let url = format!("{}{}", self.base_url, RENEW_TOKEN_PATH);
        let response = self
            .client
            .post(&url)
            .bearer_auth(current_token)
            .send()
            .await?;

        read_grant(response).await
    }
}

async fn read_grant(response: reqwest::Response) -> std::result::Result<TokenGrant, RenewalError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(RenewalError::Rejected {
            status: status.as_u16(),
            body: body.trim().to_string(),
        });
    }

    let parsed: TokenResponse =
        serde_json::from_str(&body).map_err(|e| RenewalError::Malformed(e.to_string()))?;
    if parsed.token.is_empty() {
        return Err(RenewalError::Malformed("empty token".to_string()));
    }
    Ok(parsed.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = HttpTokenClient::new("http://commander:8080/").unwrap();
        assert_eq!(client.base_url(), "http://commander:8080");
    }

    #[test]
    fn grant_from_response() {
        let grant = TokenGrant::from(TokenResponse {
            token: "abc".to_string(),
            expires_in: 30,
        });
        assert_eq!(grant.token, "abc");
        assert_eq!(grant.expires_in, Duration::from_secs(30));
        assert!(!format!("{grant:?}").contains("abc"));
    }

    #[test]
    fn rejected_display_includes_status() {
        let err = RenewalError::Rejected {
            status: 401,
            body: "Invalid token".to_string(),
        };
        assert_eq!(err.to_string(), "renewal rejected with HTTP 401: Invalid token");
    }
}
