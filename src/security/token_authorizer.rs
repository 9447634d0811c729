use async_trait::async_trait;
use axum::http::Method;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::gateway::pipeline::{RequestContext, Stage, StageOutcome};
use crate::security::audit_log::AuditLogger;
use crate::security::authority_client::{AuthorityError, AuthorityService};
use crate::security::credential::{self, Credential};
use crate::security::path_rules::PathRuleSet;
use crate::security::rejection::Rejection;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("path `{path}` does not contain API root `{root}`")]
pub struct PathError {
    pub path: String,
    pub root: String,
}

/// Slice of `path` starting at `api_root`, which must sit on a segment boundary.
pub fn normalize_path<'a>(path: &'a str, api_root: &str) -> Result<&'a str, PathError> {
    let root = api_root.trim_end_matches('/');
    path.match_indices(root)
        .map(|(idx, _)| idx)
        .find(|&idx| {
            let rest = &path[idx + root.len()..];
            rest.is_empty() || rest.starts_with('/')
        })
        .map(|idx| &path[idx..])
        .ok_or_else(|| PathError {
            path: path.to_string(),
            root: api_root.to_string(),
        })
}

#[derive(Debug, Clone)]
pub struct TokenAuthorizationSettings {
    pub ignore: PathRuleSet,
    pub internal_prefix: String,
    pub api_root: String,
    pub authority_enabled: bool,
}

/// Second stage: token introspection, then the per-path authority decision.
#[derive(Clone)]
pub struct TokenAuthorizationStage {
    settings: TokenAuthorizationSettings,
    authority: Arc<dyn AuthorityService>,
    audit: AuditLogger,
}

impl TokenAuthorizationStage {
    pub fn new(settings: TokenAuthorizationSettings, authority: Arc<dyn AuthorityService>) -> Self {
        Self {
            settings,
            authority,
            audit: AuditLogger::new(),
        }
    }

    async fn authorize(
        &self,
        ctx: &RequestContext,
        path: &str,
        credential: &Credential,
    ) -> Result<(), Rejection> {
        let introspection = self
            .authority
            .introspect(credential, &ctx.headers)
            .await
            .map_err(|e| self.fault(ctx, e, Rejection::MissingOrInvalidToken))?;

        if !introspection.success || !self.settings.authority_enabled {
            return Err(Rejection::MissingOrInvalidToken);
        }

        let decision = self
            .authority
            .authorize(credential, path, &ctx.headers)
            .await
            .map_err(|e| {
                self.fault(
                    ctx,
                    e,
                    Rejection::Unauthorized {
                        status: None,
                        message: None,
                    },
                )
            })?;

        if decision.success {
            Ok(())
        } else {
            Err(Rejection::Unauthorized {
                status: decision.status,
                message: decision.message,
            })
        }
    }

    fn fault(&self, ctx: &RequestContext, err: AuthorityError, refused: Rejection) -> Rejection {
        if err.is_unreachable() {
            self.audit
                .authority_unreachable(&ctx.request_id, &ctx.path, &err.to_string());
            Rejection::IntrospectionUnreachable
        } else {
            debug!(request_id = %ctx.request_id, error = %err, "authority refused request");
            refused
        }
    }
}

#[async_trait]
impl Stage for TokenAuthorizationStage {
    fn name(&self) -> &'static str {
        "authorization"
    }

    async fn evaluate(&self, ctx: &RequestContext) -> StageOutcome {
        if ctx.method == Method::OPTIONS {
            return StageOutcome::NoContent;
        }
        if ctx.path.starts_with(&self.settings.internal_prefix) {
            return StageOutcome::Continue;
        }

        let path = match normalize_path(&ctx.path, &self.settings.api_root) {
            Ok(p) => p,
            Err(e) => {
                debug!(request_id = %ctx.request_id, error = %e, "cannot normalize path");
                self.audit.path_malformed(&ctx.request_id, &ctx.path);
                return StageOutcome::Reject(Rejection::MalformedPath);
            }
        };

        let credential = credential::extract(&ctx.headers, &ctx.query);
        if self.settings.ignore.matches_any(path) {
            debug!(request_id = %ctx.request_id, path, "path excluded from authorization");
            return StageOutcome::Continue;
        }

        match self.authorize(ctx, path, &credential).await {
            Ok(()) => {
                info!(
                    request_id = %ctx.request_id,
                    path,
                    token = %credential.masked(),
                    "request authorized"
                );
                self.audit
                    .request_passed(&ctx.request_id, ctx.method.as_str(), path);
                StageOutcome::Continue
            }
            Err(rejection) => {
                if rejection != Rejection::IntrospectionUnreachable {
                    self.audit.token_rejected(
                        &ctx.request_id,
                        path,
                        &credential.masked(),
                        &rejection.to_string(),
                    );
                }
                StageOutcome::Reject(rejection)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::rejection::AuthorizationDecision;
    use axum::http::{HeaderMap, HeaderValue};
    use std::sync::Mutex;

    /// In-memory authority with scripted answers and a call log.
    struct FakeAuthority {
        introspection: Result<AuthorizationDecision, u16>,
        authority: Result<AuthorizationDecision, u16>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeAuthority {
        fn new(
            introspection: Result<AuthorizationDecision, u16>,
            authority: Result<AuthorizationDecision, u16>,
        ) -> Arc<Self> {
            Arc::new(Self {
                introspection,
                authority,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn ok(success: bool) -> Result<AuthorizationDecision, u16> {
        Ok(AuthorizationDecision {
            success,
            ..AuthorizationDecision::default()
        })
    }

    #[async_trait]
    impl AuthorityService for FakeAuthority {
        async fn introspect(
            &self,
            credential: &Credential,
            _headers: &HeaderMap,
        ) -> Result<AuthorizationDecision, AuthorityError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("introspect:{}", credential.as_str()));
            self.introspection.clone().map_err(AuthorityError::Status)
        }

        async fn authorize(
            &self,
            credential: &Credential,
            request_path: &str,
            _headers: &HeaderMap,
        ) -> Result<AuthorizationDecision, AuthorityError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("authorize:{}:{}", credential.as_str(), request_path));
            self.authority.clone().map_err(AuthorityError::Status)
        }
    }

    fn settings(authority_enabled: bool) -> TokenAuthorizationSettings {
        TokenAuthorizationSettings {
            ignore: PathRuleSet::new(["/api/login", "/api/public/**"]),
            internal_prefix: "/centre".into(),
            api_root: "/api".into(),
            authority_enabled,
        }
    }

    fn stage_with(
        introspection: Result<AuthorizationDecision, u16>,
        authority: Result<AuthorizationDecision, u16>,
    ) -> TokenAuthorizationStage {
        TokenAuthorizationStage::new(settings(true), FakeAuthority::new(introspection, authority))
    }

    fn request(method: Method, uri: &str, auth: Option<&str>) -> RequestContext {
        let mut headers = HeaderMap::new();
        if let Some(a) = auth {
            headers.insert("Authorization", HeaderValue::from_str(a).unwrap());
        }
        RequestContext::new(method, &uri.parse().unwrap(), headers)
    }

    #[test]
    fn normalize_keeps_api_root() {
        assert_eq!(normalize_path("/order-service/api/order/1", "/api"), Ok("/api/order/1"));
        assert_eq!(normalize_path("/api", "/api/"), Ok("/api"));
        assert_eq!(normalize_path("/apix/api/v1", "/api"), Ok("/api/v1"));
        assert!(normalize_path("/apix/orders", "/api").is_err());
        assert!(normalize_path("/", "/api").is_err());
    }

    #[tokio::test]
    async fn internal_prefix_and_exclusions_skip_authority() {
        let fake = FakeAuthority::new(Err(500), Err(500));
        let stage = TokenAuthorizationStage::new(settings(true), fake.clone());

        for uri in ["/centre/admin/users", "/svc/api/login", "/svc/api/public/news/3"] {
            let outcome = stage.evaluate(&request(Method::GET, uri, None)).await;
            assert_eq!(outcome, StageOutcome::Continue, "{uri}");
        }
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_path_is_rejected() {
        let stage = stage_with(ok(true), ok(true));
        let outcome = stage.evaluate(&request(Method::GET, "/orders/1", None)).await;
        assert_eq!(outcome, StageOutcome::Reject(Rejection::MalformedPath));
    }

    #[tokio::test]
    async fn failed_introspection_is_unauthorized() {
        let fake = FakeAuthority::new(ok(false), ok(true));
        let stage = TokenAuthorizationStage::new(settings(true), fake.clone());
        let outcome = stage.evaluate(&request(Method::GET, "/svc/api/order", None)).await;
        assert_eq!(outcome, StageOutcome::Reject(Rejection::MissingOrInvalidToken));
        assert_eq!(fake.calls(), vec!["introspect:".to_string()]);
    }

    #[tokio::test]
    async fn valid_token_and_grant_passes() {
        let fake = FakeAuthority::new(ok(true), ok(true));
        let stage = TokenAuthorizationStage::new(settings(true), fake.clone());
        let outcome = stage
            .evaluate(&request(Method::GET, "/svc/api/order/7", Some("bearer tok-1")))
            .await;
        assert_eq!(outcome, StageOutcome::Continue);
        assert_eq!(
            fake.calls(),
            vec!["introspect:tok-1".to_string(), "authorize:tok-1:/api/order/7".to_string()]
        );
    }

    #[tokio::test]
    async fn denial_carries_service_status_and_message() {
        let denial = AuthorizationDecision {
            success: false,
            status: Some(4031),
            message: Some("no access to order".into()),
            ..AuthorizationDecision::default()
        };
        let stage = stage_with(ok(true), Ok(denial));
        let outcome = stage
            .evaluate(&request(Method::GET, "/api/order?access_token=t", None))
            .await;
        assert_eq!(
            outcome,
            StageOutcome::Reject(Rejection::Unauthorized {
                status: Some(4031),
                message: Some("no access to order".into()),
            })
        );
    }

    #[tokio::test]
    async fn deep_checks_disabled_rejects_as_invalid_token() {
        let fake = FakeAuthority::new(ok(true), ok(true));
        let stage = TokenAuthorizationStage::new(settings(false), fake.clone());
        let outcome = stage
            .evaluate(&request(Method::GET, "/api/order?access_token=t", None))
            .await;
        assert_eq!(outcome, StageOutcome::Reject(Rejection::MissingOrInvalidToken));
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_authority_is_distinct() {
        let stage = stage_with(Err(503), ok(true));
        let outcome = stage.evaluate(&request(Method::GET, "/api/order", None)).await;
        assert_eq!(outcome, StageOutcome::Reject(Rejection::IntrospectionUnreachable));

        let stage = stage_with(ok(true), Err(500));
        let outcome = stage.evaluate(&request(Method::GET, "/api/order", None)).await;
        assert_eq!(outcome, StageOutcome::Reject(Rejection::IntrospectionUnreachable));
    }

    #[tokio::test]
    async fn client_error_from_introspection_is_invalid_token() {
        let stage = stage_with(Err(400), ok(true));
        let outcome = stage.evaluate(&request(Method::GET, "/api/order", None)).await;
        assert_eq!(outcome, StageOutcome::Reject(Rejection::MissingOrInvalidToken));
    }

    #[tokio::test]
    async fn options_short_circuits() {
        let stage = stage_with(ok(true), ok(true));
        let outcome = stage.evaluate(&request(Method::OPTIONS, "/api/order", None)).await;
        assert_eq!(outcome, StageOutcome::NoContent);
    }
}
