use proxauth_reqwest::InvalidOrigin;
use proxauth_tokens::AuthError;
use thiserror::Error;

/// The configuration cannot be used
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document is not valid configuration JSON
    #[error("malformed configuration")]
    Json(#[from] serde_json::Error),
    /// The proxy origin is not an absolute `http` or `https` URL
    #[error("invalid proxy origin")]
    InvalidOrigin(#[from] InvalidOrigin),
    /// The proxy scope is blank
    #[error("proxy scope must not be empty")]
    EmptyProxyScope,
    /// No async runtime was available to host token fetches
    #[error("an async runtime is required")]
    NoRuntime,
}

/// Access to the proxy origin could not be established
#[derive(Clone, Debug, Error)]
pub enum ReadinessError {
    /// Enrollment or token acquisition did not succeed in time
    #[error("timed out waiting for proxy access")]
    Timeout,
    /// Token acquisition failed in a way that waiting will not fix
    #[error("authentication failed")]
    AuthFailed(#[source] AuthError),
}

impl ReadinessError {
    /// Whether the user must sign in interactively before trying again
    pub fn requires_interaction(&self) -> bool {
        match self {
            Self::Timeout => false,
            Self::AuthFailed(err) => err.requires_interaction(),
        }
    }
}
