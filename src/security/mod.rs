pub mod audit_log;
pub mod authority_client;
pub mod credential;
pub mod path_rules;
pub mod rejection;
pub mod sign_verifier;
pub mod signature_codec;
pub mod token_authorizer;
