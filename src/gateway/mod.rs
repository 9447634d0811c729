pub mod config;
pub mod pipeline;

use anyhow::Result;
use std::sync::Arc;

use crate::security::authority_client::{AuthorityService, HttpAuthorityClient};
use crate::security::sign_verifier::SignatureVerificationStage;
use crate::security::token_authorizer::{TokenAuthorizationSettings, TokenAuthorizationStage};
use config::GatewayConfig;
use pipeline::{Pipeline, Stage};

/// Signature first, authorization second. The order is fixed.
pub fn build_pipeline(config: &GatewayConfig, authority: Arc<dyn AuthorityService>) -> Pipeline {
    let signature = SignatureVerificationStage::new(
        config.sign_rules(),
        &config.sign.secret_key,
        config.sign.expire_time,
    );
    let authorization = TokenAuthorizationStage::new(
        TokenAuthorizationSettings {
            ignore: config.ignore_rules(),
            internal_prefix: config.security.internal_prefix.clone(),
            api_root: config.security.api_root.clone(),
            authority_enabled: config.security.authorization_enabled,
        },
        authority,
    );

    let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(signature), Arc::new(authorization)];
    Pipeline::new(stages)
}

pub fn http_authority(config: &GatewayConfig) -> Result<Arc<dyn AuthorityService>> {
    let client = HttpAuthorityClient::new(
        &config.security.check_token_uri,
        &config.security.user_authorization_uri,
        config.security.authority_endpoint,
        config.authority_timeout(),
    )?;
    Ok(Arc::new(client))
}
