use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use url::Url;

use crate::security::authority_client::AuthorityEndpoint;
use crate::security::path_rules::PathRuleSet;

pub const ENV_SIGN_SECRET: &str = "GATEWAY_SIGN_SECRET";
pub const ENV_SIGN_EXPIRE_TIME: &str = "GATEWAY_SIGN_EXPIRE_TIME";
pub const ENV_SIGN_ANT_MATCHERS: &str = "GATEWAY_SIGN_ANT_MATCHERS";
pub const ENV_IGNORE_ANT_MATCHERS: &str = "GATEWAY_IGNORE_ANT_MATCHERS";
pub const ENV_UPSTREAM_URL: &str = "GATEWAY_UPSTREAM_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SignConfig {
    #[serde(default)]
    pub secret_key: String,
    /// Freshness window in minutes.
    #[serde(default = "default_expire_time")]
    pub expire_time: u32,
    /// Paths subject to signature checks.
    #[serde(default)]
    pub ant_matchers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SecurityConfig {
    /// Paths excluded from token checks.
    #[serde(default)]
    pub ignore_ant_matchers: Vec<String>,
    #[serde(default = "default_internal_prefix")]
    pub internal_prefix: String,
    #[serde(default = "default_api_root")]
    pub api_root: String,
    pub user_authorization_uri: String,
    pub check_token_uri: String,
    #[serde(default = "default_true")]
    pub authorization_enabled: bool,
    #[serde(default)]
    pub authority_endpoint: AuthorityEndpoint,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GatewayConfig {
    pub sign: SignConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub upstream_url: Option<String>,
}

fn default_expire_time() -> u32 {
    10
}
fn default_internal_prefix() -> String {
    "/centre".to_string()
}
fn default_api_root() -> String {
    "/api".to_string()
}
fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    5
}

impl GatewayConfig {
    /// Read, apply environment overrides, validate.
    pub fn load(path: &str) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        serde_json::from_str(&raw).context("parsing gateway config JSON")
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(secret) = std::env::var(ENV_SIGN_SECRET) {
            self.sign.secret_key = secret;
        }
        if let Ok(raw) = std::env::var(ENV_SIGN_EXPIRE_TIME) {
            self.sign.expire_time = raw
                .trim()
                .parse()
                .with_context(|| {
                    format!("{ENV_SIGN_EXPIRE_TIME} must be a whole number of minutes")
                })?;
        }
        if let Ok(raw) = std::env::var(ENV_SIGN_ANT_MATCHERS) {
            self.sign.ant_matchers = PathRuleSet::from_csv(&raw).patterns().to_vec();
        }
        if let Ok(raw) = std::env::var(ENV_IGNORE_ANT_MATCHERS) {
            self.security.ignore_ant_matchers = PathRuleSet::from_csv(&raw).patterns().to_vec();
        }
        if let Ok(upstream) = std::env::var(ENV_UPSTREAM_URL) {
            self.upstream_url = Some(upstream).filter(|u| !u.trim().is_empty());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sign.secret_key.trim().is_empty() {
            bail!("sign.secret-key must not be empty");
        }
        if self.sign.expire_time == 0 {
            bail!("sign.expire-time must be at least 1 minute");
        }
        let root = self.security.api_root.trim_end_matches('/');
        if !root.starts_with('/') || root.len() < 2 {
            bail!("security.api-root must be an absolute path such as /api");
        }
        Url::parse(&self.security.check_token_uri).context("security.check-token-uri")?;
        Url::parse(&self.security.user_authorization_uri)
            .context("security.user-authorization-uri")?;
        if let Some(upstream) = &self.upstream_url {
            Url::parse(upstream).context("upstream-url")?;
        }
        if self.security.timeout_secs == 0 {
            bail!("security.timeout-secs must be positive");
        }
        Ok(())
    }

    pub fn sign_rules(&self) -> PathRuleSet {
        PathRuleSet::new(&self.sign.ant_matchers)
    }

    pub fn ignore_rules(&self) -> PathRuleSet {
        PathRuleSet::new(&self.security.ignore_ant_matchers)
    }

    pub fn authority_timeout(&self) -> Duration {
        Duration::from_secs(self.security.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Mutex, OnceLock};
    use tempfile::NamedTempFile;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    fn clear_env() {
        for key in [
            ENV_SIGN_SECRET,
            ENV_SIGN_EXPIRE_TIME,
            ENV_SIGN_ANT_MATCHERS,
            ENV_IGNORE_ANT_MATCHERS,
            ENV_UPSTREAM_URL,
        ] {
            std::env::remove_var(key);
        }
    }

    fn write_config(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{body}").unwrap();
        file
    }

    const FULL: &str = r#"{
        "sign": {
            "secret-key": " s3cr3t ",
            "expire-time": 15,
            "ant-matchers": ["/api/order/**", "/api/pay/*"]
        },
        "security": {
            "ignore-ant-matchers": ["/api/login"],
            "user-authorization-uri": "http://authority.local/",
            "check-token-uri": "http://authority.local/oauth/check_token",
            "authority-endpoint": "ignore"
        },
        "upstream-url": "http://backend.local:8081"
    }"#;

    #[test]
    fn parses_full_config_with_defaults() {
        let _g = lock_env();
        clear_env();
        let file = write_config(FULL);
        let cfg = GatewayConfig::load(file.path().to_str().unwrap()).unwrap();

        assert_eq!(cfg.sign.expire_time, 15);
        assert_eq!(cfg.sign_rules().patterns().len(), 2);
        assert_eq!(cfg.security.internal_prefix, "/centre");
        assert_eq!(cfg.security.api_root, "/api");
        assert!(cfg.security.authorization_enabled);
        assert_eq!(cfg.security.authority_endpoint, AuthorityEndpoint::Ignore);
        assert_eq!(cfg.authority_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.upstream_url.as_deref(), Some("http://backend.local:8081"));
    }

    #[test]
    fn env_overrides_file_values() {
        let _g = lock_env();
        clear_env();
        std::env::set_var(ENV_SIGN_SECRET, "from-env");
        std::env::set_var(ENV_SIGN_EXPIRE_TIME, "3");
        std::env::set_var(ENV_IGNORE_ANT_MATCHERS, "/api/a/**, /api/b");

        let file = write_config(FULL);
        let cfg = GatewayConfig::load(file.path().to_str().unwrap()).unwrap();
        clear_env();

        assert_eq!(cfg.sign.secret_key, "from-env");
        assert_eq!(cfg.sign.expire_time, 3);
        assert_eq!(cfg.security.ignore_ant_matchers, vec!["/api/a/**", "/api/b"]);
    }

    #[test]
    fn bad_env_number_is_an_error() {
        let _g = lock_env();
        clear_env();
        std::env::set_var(ENV_SIGN_EXPIRE_TIME, "ten");
        let file = write_config(FULL);
        let result = GatewayConfig::load(file.path().to_str().unwrap());
        clear_env();
        assert!(result.is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let _g = lock_env();
        clear_env();
        let file = write_config(FULL);
        let base = GatewayConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert!(base.validate().is_ok());

        let mut cfg = base.clone();
        cfg.sign.secret_key = "   ".into();
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.sign.expire_time = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.security.api_root = "/".into();
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.security.check_token_uri = "not a url".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_file_and_invalid_json() {
        assert!(GatewayConfig::from_file("/nonexistent/gateway.json").is_err());
        let file = write_config("{invalid json");
        assert!(GatewayConfig::from_file(file.path().to_str().unwrap()).is_err());
    }
}
