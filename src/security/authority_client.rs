use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::security::credential::Credential;
use crate::security::rejection::{success_flag, AuthorizationDecision};

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("authority request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("authority responded with status {0}")]
    Status(u16),
    #[error("authority response could not be decoded: {0}")]
    Decode(String),
}

impl AuthorityError {
    /// A 4xx answer is the service saying no; anything else means the
    /// dependency itself is at fault.
    pub fn is_unreachable(&self) -> bool {
        match self {
            AuthorityError::Status(code) => !(400..500).contains(code),
            AuthorityError::Transport(_) | AuthorityError::Decode(_) => true,
        }
    }
}

/// Which authorization route the authority service exposes to this gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorityEndpoint {
    #[default]
    Standard,
    /// Route used by internal callers.
    Ignore,
}

impl AuthorityEndpoint {
    pub fn path(self) -> &'static str {
        match self {
            AuthorityEndpoint::Standard => "api/v1/authority/authentication",
            AuthorityEndpoint::Ignore => "api/v1/ignore/authority/authentication",
        }
    }
}

/// Token introspection and fine-grained authorization, owned by an external service.
#[async_trait]
pub trait AuthorityService: Send + Sync {
    async fn introspect(
        &self,
        credential: &Credential,
        headers: &HeaderMap,
    ) -> Result<AuthorizationDecision, AuthorityError>;

    async fn authorize(
        &self,
        credential: &Credential,
        request_path: &str,
        headers: &HeaderMap,
    ) -> Result<AuthorizationDecision, AuthorityError>;
}

#[derive(Debug, Clone)]
pub struct HttpAuthorityClient {
    check_token_url: String,
    authority_url: String,
    http_client: Client,
}

impl HttpAuthorityClient {
    pub fn new(
        check_token_url: &str,
        authority_base_url: &str,
        endpoint: AuthorityEndpoint,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("creating authority HTTP client")?;

        let authority_url = format!(
            "{}/{}",
            authority_base_url.trim_end_matches('/'),
            endpoint.path()
        );
        debug!(
            check_token_url = %check_token_url,
            authority_url = %authority_url,
            "authority client initialized"
        );

        Ok(Self {
            check_token_url: check_token_url.to_string(),
            authority_url,
            http_client,
        })
    }

    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &HeaderMap,
    ) -> Result<Value, AuthorityError> {
        let response = self
            .http_client
            .get(url)
            .headers(forwardable(headers))
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthorityError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| AuthorityError::Decode(e.to_string()))
    }
}

#[async_trait]
impl AuthorityService for HttpAuthorityClient {
    async fn introspect(
        &self,
        credential: &Credential,
        headers: &HeaderMap,
    ) -> Result<AuthorizationDecision, AuthorityError> {
        let body = self
            .get_json(&self.check_token_url, &[("token", credential.as_str())], headers)
            .await?;
        debug!(token = %credential.masked(), body = %body, "token introspection result");
        introspection_decision(&body)
    }

    async fn authorize(
        &self,
        credential: &Credential,
        request_path: &str,
        headers: &HeaderMap,
    ) -> Result<AuthorizationDecision, AuthorityError> {
        let body = self
            .get_json(
                &self.authority_url,
                &[("token", credential.as_str()), ("requestUrl", request_path)],
                headers,
            )
            .await?;
        serde_json::from_value(body).map_err(|e| AuthorityError::Decode(e.to_string()))
    }
}

/// Introspection bodies vary; only `success` matters, and its absence counts as success.
fn introspection_decision(body: &Value) -> Result<AuthorizationDecision, AuthorityError> {
    let obj = body
        .as_object()
        .ok_or_else(|| AuthorityError::Decode("introspection body is not an object".into()))?;
    let success = match obj.get("success") {
        Some(flag) => success_flag(flag).map_err(AuthorityError::Decode)?,
        None => true,
    };

    Ok(AuthorizationDecision {
        success,
        status: obj
            .get("status")
            .and_then(Value::as_i64)
            .and_then(|s| i32::try_from(s).ok()),
        message: obj.get("message").and_then(Value::as_str).map(str::to_string),
        ..AuthorizationDecision::default()
    })
}

/// Copy of `headers` without hop-by-hop fields, `host` and `content-length`.
pub fn forwardable(headers: &HeaderMap) -> HeaderMap {
    const SKIP: [header::HeaderName; 6] = [
        header::HOST,
        header::CONTENT_LENGTH,
        header::CONNECTION,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
        header::TE,
    ];
    headers
        .iter()
        .filter(|(name, _)| !SKIP.contains(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
