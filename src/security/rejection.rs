use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::error;

pub const JSON_UTF8: &str = "application/json; charset=UTF-8";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Status codes carried in the body of a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    SignInvalid,
    SignTimeOut,
    Params,
    Unauthorized,
    Authority,
    AuthorityUnavailable,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::SignInvalid => 4001,
            ErrorCode::SignTimeOut => 4002,
            ErrorCode::Params => 4003,
            ErrorCode::Unauthorized => 401,
            ErrorCode::Authority => 403,
            ErrorCode::AuthorityUnavailable => 503,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::SignInvalid => "illegal request: invalid signature",
            ErrorCode::SignTimeOut => "illegal request: request expired",
            ErrorCode::Params => "illegal request: malformed request path",
            ErrorCode::Unauthorized => "invalid token",
            ErrorCode::Authority => "access denied",
            ErrorCode::AuthorityUnavailable => "authority service unavailable",
        }
    }
}

/// Uniform result envelope, shared with the authority service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    #[serde(default)]
    pub status: Option<i32>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub extend: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default = "default_success", deserialize_with = "lenient_success")]
    pub success: bool,
    #[serde(default)]
    pub total: Option<i64>,
}

fn default_success() -> bool {
    true
}

fn lenient_success<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    success_flag(&value).map_err(serde::de::Error::custom)
}

/// Reads a `success` flag sent as a boolean, number or string.
/// `null` and empty strings count as absent, hence success.
pub fn success_flag(value: &Value) -> Result<bool, String> {
    match value {
        Value::Null => Ok(true),
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" | "null" | "true" | "1" | "t" | "y" => Ok(true),
            "false" | "0" | "f" | "n" => Ok(false),
            _ => Err(format!("unrecognised success flag {value}")),
        },
        Value::Array(_) | Value::Object(_) => Err(format!("unrecognised success flag {value}")),
    }
}

impl Default for AuthorizationDecision {
    fn default() -> Self {
        Self {
            status: None,
            message: None,
            data: None,
            extend: None,
            timestamp: None,
            success: true,
            total: None,
        }
    }
}

impl AuthorizationDecision {
    pub fn failure(status: i32, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: Some(message.into()),
            timestamp: Some(current_timestamp()),
            success: false,
            ..Self::default()
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::failure(code.code(), code.message())
    }
}

pub fn current_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Why a request was turned away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("missing signature")]
    MissingSignature,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature secret mismatch")]
    SecretMismatch,
    #[error("signature expired")]
    SignatureExpired,
    #[error("parameter `{0}` tampered")]
    ParameterTampered(String),
    #[error("malformed request path")]
    MalformedPath,
    #[error("missing or invalid token")]
    MissingOrInvalidToken,
    #[error("authority service unreachable")]
    IntrospectionUnreachable,
    #[error("unauthorized")]
    Unauthorized {
        status: Option<i32>,
        message: Option<String>,
    },
}

impl Rejection {
    pub fn decision(&self) -> AuthorizationDecision {
        match self {
            Rejection::MissingSignature => AuthorizationDecision::failure(
                ErrorCode::SignInvalid.code(),
                "illegal request: missing signature",
            ),
            Rejection::MalformedSignature | Rejection::SecretMismatch => {
                AuthorizationDecision::from_code(ErrorCode::SignInvalid)
            }
            Rejection::SignatureExpired => AuthorizationDecision::from_code(ErrorCode::SignTimeOut),
            Rejection::ParameterTampered(_) => AuthorizationDecision::failure(
                ErrorCode::SignInvalid.code(),
                "illegal request: parameters tampered",
            ),
            Rejection::MalformedPath => AuthorizationDecision::from_code(ErrorCode::Params),
            Rejection::MissingOrInvalidToken => {
                AuthorizationDecision::from_code(ErrorCode::Unauthorized)
            }
            Rejection::IntrospectionUnreachable => {
                AuthorizationDecision::from_code(ErrorCode::AuthorityUnavailable)
            }
            Rejection::Unauthorized { status, message } => AuthorizationDecision::failure(
                status.unwrap_or(ErrorCode::Authority.code()),
                message
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| ErrorCode::Authority.message().to_string()),
            ),
        }
    }
}

/// Terminal response for a rejected request.
///
/// Transport status is always 200; the real verdict lives in the body.
pub struct RejectionResponder;

impl RejectionResponder {
    pub fn reject(status: i32, message: impl Into<String>) -> Response {
        Self::respond(AuthorizationDecision::failure(status, message))
    }

    pub fn respond(mut decision: AuthorizationDecision) -> Response {
        decision.success = false;
        decision.timestamp = Some(current_timestamp());

        match serde_json::to_vec(&decision) {
            Ok(body) => {
                let mut response = (StatusCode::OK, body).into_response();
                response
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_UTF8));
                response
            }
            Err(e) => {
                error!("failed to serialize rejection body: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        RejectionResponder::respond(self.decision())
    }
}
