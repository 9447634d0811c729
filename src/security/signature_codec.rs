use base64::{engine::general_purpose, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// sign = base64(nonce || AES-256-GCM(envelope json, SHA-256(secret)))

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("sign header is not valid base64")]
    Encoding(#[from] base64::DecodeError),
    #[error("sign header is too short")]
    Truncated,
    #[error("cipher operation failed")]
    Cipher,
    #[error("signature payload is malformed: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Envelope keys that can never name a signed parameter.
pub const RESERVED_KEYS: [&str; 4] = ["secret", "signTime", "parameter", "validateParameter"];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_KEYS.contains(&name)
}

/// Decoded content of the `sign` header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    pub secret: String,
    #[serde(rename = "signTime")]
    pub sign_time: i64,
    #[serde(rename = "parameter", alias = "validateParameter")]
    pub validate_parameter: bool,
    /// Every other key: signed request parameters.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl SignatureEnvelope {
    pub fn new(secret: impl Into<String>, sign_time: i64, validate_parameter: bool) -> Self {
        Self {
            secret: secret.into(),
            sign_time,
            validate_parameter,
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// String form used when comparing a signed value with a query parameter.
/// Returns `None` for values no query string can carry.
pub fn param_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn cipher_key(shared_secret: &str) -> Result<LessSafeKey, CodecError> {
    let hashed = digest::digest(&digest::SHA256, shared_secret.trim().as_bytes());
    let unbound = UnboundKey::new(&AES_256_GCM, hashed.as_ref()).map_err(|_| CodecError::Cipher)?;
    Ok(LessSafeKey::new(unbound))
}

pub fn encrypt(envelope: &SignatureEnvelope, shared_secret: &str) -> Result<String, CodecError> {
    let key = cipher_key(shared_secret)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| CodecError::Cipher)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = serde_json::to_vec(envelope)?;
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| CodecError::Cipher)?;

    let mut sealed = nonce_bytes.to_vec();
    sealed.extend_from_slice(&in_out);
    Ok(general_purpose::STANDARD.encode(sealed))
}

pub fn decrypt(sign_header: &str, shared_secret: &str) -> Result<SignatureEnvelope, CodecError> {
    let key = cipher_key(shared_secret)?;
    let raw = general_purpose::STANDARD.decode(sign_header.trim())?;
    if raw.len() < NONCE_LEN + AES_256_GCM.tag_len() {
        return Err(CodecError::Truncated);
    }

    let (nonce_bytes, sealed) = raw.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CodecError::Cipher)?;
    let mut buf = sealed.to_vec();
    let plain = key
        .open_in_place(nonce, Aad::empty(), &mut buf)
        .map_err(|_| CodecError::Cipher)?;

    Ok(serde_json::from_slice(plain)?)
}
