use async_trait::async_trait;
use axum::http::Method;
use chrono::Utc;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::gateway::pipeline::{RequestContext, Stage, StageOutcome};
use crate::security::audit_log::AuditLogger;
use crate::security::path_rules::PathRuleSet;
use crate::security::rejection::Rejection;
use crate::security::signature_codec::{self, param_text};

pub const SIGN_HEADER: &str = "sign";
const MILLIS_PER_UNIT: i64 = 60_000;

/// First stage: decrypts the `sign` header and checks secret, freshness and,
/// for GET requests that ask for it, the signed query parameters.
#[derive(Debug, Clone)]
pub struct SignatureVerificationStage {
    rules: PathRuleSet,
    secret: String,
    window_ms: i64,
    audit: AuditLogger,
}

impl SignatureVerificationStage {
    pub fn new(rules: PathRuleSet, secret: &str, expire_time_units: u32) -> Self {
        Self {
            rules,
            secret: secret.trim().to_string(),
            window_ms: i64::from(expire_time_units) * MILLIS_PER_UNIT,
            audit: AuditLogger::new(),
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Evaluate against an explicit clock reading (epoch millis).
    pub fn evaluate_at(&self, ctx: &RequestContext, now_ms: i64) -> StageOutcome {
        if ctx.method == Method::OPTIONS {
            return StageOutcome::NoContent;
        }

        if !self.rules.matches_prefix_any(&ctx.path) {
            debug!(
                request_id = %ctx.request_id,
                path = %ctx.path,
                "path exempt from signature check"
            );
            return StageOutcome::Continue;
        }

        info!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            "verifying request signature"
        );
        match self.verify(ctx, now_ms) {
            Ok(()) => {
                debug!(request_id = %ctx.request_id, "signature verified");
                StageOutcome::Continue
            }
            Err(rejection) => {
                self.record(ctx, &rejection);
                StageOutcome::Reject(rejection)
            }
        }
    }

    fn verify(&self, ctx: &RequestContext, now_ms: i64) -> Result<(), Rejection> {
        let sign = ctx
            .header(SIGN_HEADER)
            .filter(|s| !s.trim().is_empty())
            .ok_or(Rejection::MissingSignature)?;

        let envelope = signature_codec::decrypt(sign, &self.secret).map_err(|e| {
            debug!(request_id = %ctx.request_id, error = %e, "sign header did not decode");
            Rejection::MalformedSignature
        })?;

        if envelope.secret.as_bytes().ct_eq(self.secret.as_bytes()).unwrap_u8() != 1 {
            return Err(Rejection::SecretMismatch);
        }

        let age_ms = now_ms.saturating_sub(envelope.sign_time);
        if age_ms > self.window_ms {
            self.audit.signature_expired(&ctx.request_id, &ctx.path, age_ms);
            return Err(Rejection::SignatureExpired);
        }

        // only GET carries its signed parameters in the query string
        if envelope.validate_parameter && ctx.method == Method::GET {
            for (name, signed) in &envelope.params {
                let expected = param_text(signed);
                if expected.is_none() || expected.as_deref() != ctx.query_param(name) {
                    return Err(Rejection::ParameterTampered(name.clone()));
                }
            }
        }

        Ok(())
    }

    fn record(&self, ctx: &RequestContext, rejection: &Rejection) {
        let (id, path) = (ctx.request_id.as_str(), ctx.path.as_str());
        match rejection {
            Rejection::MissingSignature => self.audit.signature_missing(id, path),
            // audited in verify, where the age is known
            Rejection::SignatureExpired => {}
            Rejection::ParameterTampered(param) => self.audit.parameter_tampered(id, path, param),
            other => self.audit.signature_invalid(id, path, &other.to_string()),
        }
    }
}

#[async_trait]
impl Stage for SignatureVerificationStage {
    fn name(&self) -> &'static str {
        "signature"
    }

    async fn evaluate(&self, ctx: &RequestContext) -> StageOutcome {
        self.evaluate_at(ctx, Utc::now().timestamp_millis())
    }
}
