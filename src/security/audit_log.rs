use tracing::{error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn signature_missing(&self, request_id: &str, path: &str) {
        warn!(target: "audit", event = "signature_missing", request_id, path);
    }

    pub fn signature_invalid(&self, request_id: &str, path: &str, reason: &str) {
        warn!(target: "audit", event = "signature_invalid", request_id, path, reason);
    }

    pub fn signature_expired(&self, request_id: &str, path: &str, age_ms: i64) {
        warn!(target: "audit", event = "signature_expired", request_id, path, age_ms);
    }

    pub fn parameter_tampered(&self, request_id: &str, path: &str, param: &str) {
        warn!(target: "audit", event = "parameter_tampered", request_id, path, param);
    }

    pub fn path_malformed(&self, request_id: &str, path: &str) {
        warn!(target: "audit", event = "path_malformed", request_id, path);
    }

    pub fn token_rejected(&self, request_id: &str, path: &str, token: &str, reason: &str) {
        warn!(target: "audit", event = "token_rejected", request_id, path, token, reason);
    }

    pub fn authority_unreachable(&self, request_id: &str, path: &str, error_msg: &str) {
        error!(
            target: "audit",
            event = "authority_unreachable",
            request_id,
            path,
            error = error_msg
        );
    }

    pub fn request_passed(&self, request_id: &str, method: &str, path: &str) {
        info!(target: "audit", event = "request_passed", request_id, method, path);
    }
}
