//! Service configuration

use std::time::Duration;

use proxauth_clock::DurationSecs;
use proxauth_reqwest::ProxyOrigin;
use proxauth_tokens::{Scope, ScopeSet, TokenLifetimeConfig};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ConfigError;

/// Configuration for an [`AuthService`][crate::AuthService]
///
/// ```
/// use proxauth::ProxyConfig;
///
/// let config = ProxyConfig::from_json_str(r#"{
///     "proxy_origin": "https://intranet-contoso.msappproxy.net",
///     "proxy_scope": "https://intranet-contoso.msappproxy.net/user_impersonation",
///     "sign_in_scopes": "User.Read",
///     "timing": { "bridge_deadline_ms": 500 }
/// }"#).unwrap();
///
/// assert_eq!(config.timing.bridge_deadline_ms, 500);
/// assert_eq!(config.timing.fetch_timeout_ms, 3000);
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// The reverse-proxied origin that receives access tokens
    pub proxy_origin: Url,

    /// The scope requested for the proxy origin
    pub proxy_scope: Scope,

    /// Scopes requested at sign-in
    ///
    /// These must be obtainable before app-protection enrollment completes,
    /// so the proxy scope does not belong here.
    #[serde(default)]
    pub sign_in_scopes: ScopeSet,

    /// Timeouts, intervals and token lifetime margins
    #[serde(default)]
    pub timing: Timing,
}

/// Timeouts, intervals and token lifetime margins
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Timing {
    /// Upper bound for a single fetch from the token source
    pub fetch_timeout_ms: u64,
    /// Upper bound for a synchronous caller waiting on a token
    pub bridge_deadline_ms: u64,
    /// Upper bound for the whole readiness wait
    pub readiness_timeout_ms: u64,
    /// Pause between readiness polls
    pub readiness_interval_ms: u64,
    /// Upper bound for replaying an engine request, body included
    pub replay_timeout_ms: u64,
    /// Tokens this close to expiry are no longer served
    pub expiry_margin_secs: u64,
    /// Tokens this close to expiry are refreshed in the background
    pub refresh_margin_secs: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 3_000,
            bridge_deadline_ms: 1_000,
            readiness_timeout_ms: 30_000,
            readiness_interval_ms: 500,
            replay_timeout_ms: 30_000,
            expiry_margin_secs: 120,
            refresh_margin_secs: 300,
        }
    }
}

impl Timing {
    pub(crate) fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub(crate) fn bridge_deadline(&self) -> Duration {
        Duration::from_millis(self.bridge_deadline_ms)
    }

    pub(crate) fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub(crate) fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    pub(crate) fn replay_timeout(&self) -> Duration {
        Duration::from_millis(self.replay_timeout_ms)
    }

    pub(crate) fn lifetime_config(&self) -> TokenLifetimeConfig {
        TokenLifetimeConfig::new(
            DurationSecs(self.expiry_margin_secs),
            DurationSecs(self.refresh_margin_secs),
        )
    }
}

impl ProxyConfig {
    /// Constructs a configuration with default timing
    pub fn new(proxy_origin: Url, proxy_scope: impl Into<Scope>, sign_in_scopes: ScopeSet) -> Self {
        Self {
            proxy_origin,
            proxy_scope: proxy_scope.into(),
            sign_in_scopes,
            timing: Timing::default(),
        }
    }

    /// Parses and validates a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the proxy origin is usable and the proxy scope is set
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.origin()?;
        if self.proxy_scope.as_str().trim().is_empty() {
            return Err(ConfigError::EmptyProxyScope);
        }
        Ok(())
    }

    /// The proxy origin
    pub fn origin(&self) -> Result<ProxyOrigin, ConfigError> {
        Ok(ProxyOrigin::from_url(self.proxy_origin.clone())?)
    }

    /// The proxy scope as a cache key
    pub fn proxy_scopes(&self) -> ScopeSet {
        ScopeSet::single(self.proxy_scope.clone())
    }
}
