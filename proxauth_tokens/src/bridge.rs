//! Bounded-latency token access for synchronous callers

use std::{sync::Arc, time::Duration};

use proxauth_clock::{Clock, System};

use crate::{
    callback, sources::TokenSource, AccessToken, ScopeSet, TokenCache, TokenEntry,
};

/// Adapts a [`TokenCache`] for callers that must return synchronously
///
/// Script bridges and engine callbacks run on threads that may not be held
/// up indefinitely. The bridge runs the acquisition on the cache's runtime
/// and waits at most `deadline` for it. When the deadline passes, the caller
/// gets no token and proceeds unauthenticated, while the acquisition keeps
/// running so that a later call can be served from the cache.
///
/// Errors never cross the bridge; they are logged and reported as `None`.
#[derive(Debug)]
pub struct SyncTokenBridge<S, C = System> {
    cache: TokenCache<S, C>,
    deadline: Duration,
}

impl<S, C> Clone for SyncTokenBridge<S, C> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            deadline: self.deadline,
        }
    }
}

impl<S, C> SyncTokenBridge<S, C> {
    /// Constructs a bridge with a one second deadline
    pub fn new(cache: TokenCache<S, C>) -> Self {
        Self {
            cache,
            deadline: Duration::from_secs(1),
        }
    }

    /// Sets how long a synchronous caller may be held up
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// The deadline applied to each call
    #[inline]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// The underlying cache
    #[inline]
    pub fn cache(&self) -> &TokenCache<S, C> {
        &self.cache
    }
}

impl<S, C> SyncTokenBridge<S, C>
where
    S: TokenSource + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Obtains a token entry for `scopes`, or `None` if one could not be
    /// obtained before the deadline
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn acquire(&self, scopes: &ScopeSet) -> Option<Arc<TokenEntry>> {
        if let Some(entry) = self.cache.cached(scopes) {
            if self.cache.lifetime_config().token_status(&entry).is_fresh() {
                return Some(entry);
            }
        }

        let (completion, waiter) = callback::completion();
        let cache = self.cache.clone();
        let task_scopes = scopes.clone();
        self.cache.runtime().spawn(async move {
            completion.complete(cache.acquire(&task_scopes).await);
        });

        let deadline = self.deadline;
        let outcome = self
            .cache
            .runtime()
            .block_on(async move { tokio::time::timeout(deadline, waiter).await });

        match outcome {
            Ok(Some(Ok(entry))) => Some(entry),
            Ok(Some(Err(error))) => {
                tracing::debug!(%scopes, %error, "no token available for synchronous caller");
                None
            }
            Ok(None) => {
                tracing::warn!(%scopes, "token acquisition ended without a result");
                None
            }
            Err(_) => {
                tracing::debug!(
                    %scopes,
                    deadline_ms = deadline.as_millis() as u64,
                    "deadline elapsed, proceeding without a token"
                );
                None
            }
        }
    }

    /// Obtains just the access token for `scopes`
    pub fn access_token(&self, scopes: &ScopeSet) -> Option<AccessToken> {
        self.acquire(scopes).map(|e| e.access_token().to_owned())
    }
}
