//! Client for the remote identifier service.
//!
//! The service blind-signs payloads it cannot read and tracks a per-account
//! request quota. Credentials come from an injected [`AuthContext`].

use crate::blind_sigs::{BlindSignature, BlindedMessage};
use crate::error::{Error, Result};
use alloy_primitives::Address;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const SIGN_PATH: &str = "/pnp/sign";
pub const QUOTA_PATH: &str = "/pnp/quota";

/// Transient failures are retried once.
const MAX_RETRIES: usize = 1;

/// How the service should check the request's `Authorization` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthMethod {
    WalletKey,
    EncryptionKey,
}

/// Produces the `Authorization` header for an exact request body.
pub trait RequestAuthorizer: Send + Sync {
    fn authorize(&self, body: &[u8]) -> Result<String>;
}

/// Sends the same pre-issued credential with every request.
pub struct StaticAuthorizer(SecretString);

impl StaticAuthorizer {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }
}

impl RequestAuthorizer for StaticAuthorizer {
    fn authorize(&self, _body: &[u8]) -> Result<String> {
        Ok(self.0.expose_secret().to_string())
    }
}

/// Caller-owned credentials for service and quota requests.
#[derive(Clone)]
pub struct AuthContext {
    account: Address,
    method: AuthMethod,
    authorizer: Arc<dyn RequestAuthorizer>,
    session_id: Option<String>,
}

impl AuthContext {
    pub fn new(
        account: Address,
        method: AuthMethod,
        authorizer: Arc<dyn RequestAuthorizer>,
    ) -> Self {
        Self {
            account,
            method,
            authorizer,
            session_id: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn method(&self) -> AuthMethod {
        self.method
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub(crate) fn authorize(&self, body: &[u8]) -> Result<String> {
        self.authorizer.authorize(body)
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("account", &self.account)
            .field("method", &self.method)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// Remaining request quota as reported by the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaStatus {
    pub remaining_quota: u64,
    pub performed_query_count: u64,
    pub total_quota: u64,
    pub block_number: Option<u64>,
}

impl QuotaStatus {
    pub fn from_counts(
        performed_query_count: u64,
        total_quota: u64,
        block_number: Option<u64>,
    ) -> Self {
        Self {
            remaining_quota: total_quota.saturating_sub(performed_query_count),
            performed_query_count,
            total_quota,
            block_number,
        }
    }

    pub fn is_sufficient(&self) -> bool {
        self.remaining_quota >= 1
    }
}

/// The remote identifier service.
#[async_trait]
pub trait SignatureService: Send + Sync {
    /// Sends the blinded payload and returns the blind signature.
    async fn request_signature(
        &self,
        blinded: &BlindedMessage,
        auth: &AuthContext,
    ) -> Result<BlindSignature>;

    async fn quota_status(&self, auth: &AuthContext) -> Result<QuotaStatus>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequestBody<'a> {
    account: String,
    blinded_query_phone_number: String,
    authentication_method: AuthMethod,
    #[serde(rename = "sessionID", skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuotaRequestBody<'a> {
    account: String,
    authentication_method: AuthMethod,
    #[serde(rename = "sessionID", skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignResponseBody {
    success: bool,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    signatures: Option<Vec<SignatureShareBody>>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SignatureShareBody {
    index: usize,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotaResponseBody {
    success: bool,
    #[serde(default)]
    performed_query_count: u64,
    #[serde(default)]
    total_quota: u64,
    #[serde(default)]
    block_number: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

fn decode_signature(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| Error::ServiceRejected(format!("signature is not valid base64: {}", e)))
}

fn log_warnings(warnings: &[String]) {
    for warning in warnings {
        warn!(%warning, "identifier service warning");
    }
}

/// [`SignatureService`] over the service's JSON HTTP API.
pub struct HttpSignatureService {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpSignatureService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B, auth: &AuthContext) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.url(path);
        let body = serde_json::to_vec(body)
            .map_err(|e| Error::InvalidInput(format!("cannot encode request body: {}", e)))?;
        let authorization = auth.authorize(&body)?;

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(MAX_RETRIES);

        let (url_ref, body_ref, authorization_ref) =
            (url.as_str(), body.as_slice(), authorization.as_str());
        let (status, text) =
            (|| async move { self.send(url_ref, body_ref, authorization_ref).await })
                .retry(backoff)
                .when(|err: &Error| matches!(err, Error::Network { .. }))
                .notify(|err: &Error, delay: Duration| {
                    warn!(%url, ?delay, error = %err, "retrying identifier service request");
                })
                .await?;

        if !status.is_success() {
            return Err(Error::ServiceRejected(format!(
                "status {}: {}",
                status,
                text.chars().take(80).collect::<String>()
            )));
        }

        serde_json::from_str(&text).map_err(|e| {
            Error::ServiceRejected(format!(
                "malformed response from {} with status {}: {}",
                url, status, e
            ))
        })
    }

    /// Sends one attempt and reads its body, so a stalled body counts as a
    /// network failure of that attempt.
    async fn send(
        &self,
        url: &str,
        body: &[u8],
        authorization: &str,
    ) -> Result<(StatusCode, String)> {
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, authorization)
            .header(
                header::USER_AGENT,
                format!("blindid/{}", env!("CARGO_PKG_VERSION")),
            )
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    Error::Config(format!("cannot build request for {}: {}", url, e))
                } else {
                    Error::Network {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        debug!(%url, status = status.as_u16(), "identifier service responded");
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Authentication {
                status: status.as_u16(),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(Error::RateLimited),
            s if s.is_server_error() => Err(Error::Network {
                url: url.to_string(),
                reason: format!("server error status {}", s),
            }),
            _ => {
                let text = response.text().await.map_err(|e| Error::Network {
                    url: url.to_string(),
                    reason: format!("failed to read response body: {}", e),
                })?;
                Ok((status, text))
            }
        }
    }
}

#[async_trait]
impl SignatureService for HttpSignatureService {
    async fn request_signature(
        &self,
        blinded: &BlindedMessage,
        auth: &AuthContext,
    ) -> Result<BlindSignature> {
        let body = SignRequestBody {
            account: auth.account().to_checksum(None),
            blinded_query_phone_number: blinded.to_base64(),
            authentication_method: auth.method(),
            session_id: auth.session_id(),
            version: env!("CARGO_PKG_VERSION"),
        };

        debug!(account = %auth.account(), "requesting blind signature");
        let response: SignResponseBody = self.post_json(SIGN_PATH, &body, auth).await?;
        log_warnings(&response.warnings);

        if !response.success {
            return Err(Error::ServiceRejected(
                response.error.unwrap_or_else(|| "sign request failed".to_string()),
            ));
        }

        match (response.signature, response.signatures) {
            (Some(signature), _) => Ok(BlindSignature::Combined(decode_signature(&signature)?)),
            (None, Some(shares)) => {
                let shares = shares
                    .into_iter()
                    .map(|share| Ok((share.index, decode_signature(&share.signature)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(BlindSignature::Shares(shares))
            }
            (None, None) => Err(Error::ServiceRejected(
                "response carried no signature".to_string(),
            )),
        }
    }

    async fn quota_status(&self, auth: &AuthContext) -> Result<QuotaStatus> {
        let body = QuotaRequestBody {
            account: auth.account().to_checksum(None),
            authentication_method: auth.method(),
            session_id: auth.session_id(),
            version: env!("CARGO_PKG_VERSION"),
        };

        let response: QuotaResponseBody = self.post_json(QUOTA_PATH, &body, auth).await?;
        log_warnings(&response.warnings);

        if !response.success {
            return Err(Error::ServiceRejected(
                response.error.unwrap_or_else(|| "quota request failed".to_string()),
            ));
        }

        Ok(QuotaStatus::from_counts(
            response.performed_query_count,
            response.total_quota,
            response.block_number,
        ))
    }
}
