use std::{error, sync::Arc};

use thiserror::Error;

/// A failure to obtain an access token
///
/// The error is cheap to clone so that a single failed fetch can be reported
/// to every caller that was waiting on it.
#[derive(Clone, Debug, Error)]
pub enum AuthError {
    /// No account is signed in
    #[error("no account is signed in")]
    NoAccount,
    /// The identity client has not been initialized
    #[error("identity client is not initialized")]
    NotInitialized,
    /// The identity provider completed without producing a result
    #[error("identity provider returned no result")]
    NoResult,
    /// The user dismissed an interactive flow
    #[error("interactive authentication was canceled")]
    Canceled,
    /// Silent acquisition was refused and an interactive step is mandatory
    #[error("interactive authentication is required")]
    UiRequired,
    /// A deadline elapsed before a token was obtained
    #[error("timed out waiting for a token")]
    Timeout,
    /// Any other failure reported by the identity provider
    #[error("token acquisition failed: {0}")]
    Unknown(#[source] Arc<dyn error::Error + Send + Sync + 'static>),
}

impl AuthError {
    /// Wraps an arbitrary failure as [`AuthError::Unknown`]
    pub fn unknown<E>(error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync + 'static>>,
    {
        Self::Unknown(Arc::from(error.into()))
    }

    /// Whether retrying the same request later may succeed without user action
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoResult | Self::Timeout | Self::Unknown(_))
    }

    /// Whether the failure can only be resolved by an interactive sign-in
    pub fn requires_interaction(&self) -> bool {
        matches!(self, Self::UiRequired)
    }
}
