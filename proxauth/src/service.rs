//! The authentication service tying the pieces together

use proxauth_reqwest::{InPageScript, ProxyOrigin, RequestInterceptor, ScriptBridge};
use proxauth_tokens::{
    sources::{Account, InteractiveTokenSource, TokenSource},
    AccessToken, AuthError, Scope, ScopeSet, SyncTokenBridge, TokenCache,
};
use tokio::{
    runtime::Handle,
    sync::broadcast::{self, error::RecvError},
};

use crate::{
    config::Timing, ConfigError, EnrollmentGate, GateNotification, ProxyConfig, ReadinessError,
};

/// Signs users in, waits for proxy access to become available and hands out
/// the components that attach tokens to web content
///
/// One service is created per application and shared by reference; all
/// components it hands out share its token cache.
#[derive(Debug)]
pub struct AuthService<S, G> {
    cache: TokenCache<S>,
    gate: G,
    origin: ProxyOrigin,
    proxy_scope: Scope,
    proxy_scopes: ScopeSet,
    sign_in_scopes: ScopeSet,
    timing: Timing,
}

impl<S, G> AuthService<S, G> {
    /// Constructs a service whose token fetches run on the current runtime
    pub fn new(config: ProxyConfig, source: S, gate: G) -> Result<Self, ConfigError> {
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        Self::with_runtime(config, source, gate, runtime)
    }

    /// Constructs a service whose token fetches run on `runtime`
    pub fn with_runtime(
        config: ProxyConfig,
        source: S,
        gate: G,
        runtime: Handle,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let origin = config.origin()?;
        let proxy_scopes = config.proxy_scopes();

        let cache = TokenCache::builder(source)
            .with_lifetime_config(config.timing.lifetime_config())
            .with_fetch_timeout(config.timing.fetch_timeout())
            .with_runtime(runtime)
            .build()
            .map_err(|_| ConfigError::NoRuntime)?;

        tracing::debug!(origin = %origin, scope = %config.proxy_scope, "auth service initialized");

        Ok(Self {
            cache,
            gate,
            origin,
            proxy_scope: config.proxy_scope,
            proxy_scopes,
            sign_in_scopes: config.sign_in_scopes,
            timing: config.timing,
        })
    }

    /// The shared token cache
    #[inline]
    pub fn cache(&self) -> &TokenCache<S> {
        &self.cache
    }

    /// The enrollment gate
    #[inline]
    pub fn gate(&self) -> &G {
        &self.gate
    }

    /// The proxy origin
    #[inline]
    pub fn proxy_origin(&self) -> &ProxyOrigin {
        &self.origin
    }

    /// Builds an interceptor for requests made by the engine itself
    pub fn interceptor(&self) -> Result<RequestInterceptor<S>, reqwest::Error> {
        Ok(RequestInterceptor::new(
            self.cache.clone(),
            self.origin.clone(),
            self.proxy_scopes.clone(),
            RequestInterceptor::<S>::bypass_client(self.timing.replay_timeout())?,
        ))
    }

    /// Builds the bridge object exposed to page scripts
    pub fn script_bridge(&self) -> ScriptBridge<S> {
        ScriptBridge::new(
            self.origin.clone(),
            self.proxy_scope.clone(),
            SyncTokenBridge::new(self.cache.clone()).with_deadline(self.timing.bridge_deadline()),
        )
    }

    /// Renders the script injected into pages on the proxy origin
    pub fn in_page_script(&self) -> InPageScript {
        InPageScript::new(self.origin.clone())
    }

    /// Drops all cached tokens and stops background refreshes
    pub fn shutdown(&self) {
        tracing::debug!("shutting down auth service");
        self.cache.clear();
    }
}

impl<S, G> AuthService<S, G>
where
    S: TokenSource + 'static,
    G: EnrollmentGate,
{
    /// The currently signed-in account
    pub async fn current_account(&self) -> Result<Option<Account>, AuthError> {
        self.cache.source().current_account().await
    }

    /// Signs a user in and registers the account for app protection
    ///
    /// A silent acquisition for the sign-in scopes is tried first; the
    /// interactive flow is presented only when that fails.
    pub async fn sign_in(
        &self,
        ui: &<S as InteractiveTokenSource>::Ui,
    ) -> Result<Account, AuthError>
    where
        S: InteractiveTokenSource,
    {
        let source = self.cache.source();

        let silent = match source.current_account().await {
            Ok(Some(account)) => match source.acquire_silent(&account, &self.sign_in_scopes).await {
                Ok(_) => Some(account),
                Err(error) => {
                    tracing::debug!(%error, "silent sign-in failed");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                tracing::debug!(%error, "unable to determine current account");
                None
            }
        };

        let account = match silent {
            Some(account) => account,
            None => {
                let (account, _) = source.sign_in_interactive(&self.sign_in_scopes, ui).await?;
                // Tokens cached for a previous account must not leak to this one
                self.cache.clear();
                account
            }
        };

        self.gate.register_account(&account).await?;
        tracing::info!(account = %account.username, "signed in");

        Ok(account)
    }

    /// Obtains a proxy token through the provider's UI for the signed-in
    /// account
    ///
    /// Used when [`wait_for_proxy_access_ready()`][Self::wait_for_proxy_access_ready]
    /// fails with an error that [requires interaction][ReadinessError::requires_interaction].
    /// The token is placed in the cache, so proxy access is available as soon
    /// as enrollment allows.
    pub async fn acquire_proxy_token_interactive(
        &self,
        ui: &<S as InteractiveTokenSource>::Ui,
    ) -> Result<AccessToken, AuthError>
    where
        S: InteractiveTokenSource,
    {
        let source = self.cache.source();
        let account = source.current_account().await?.ok_or(AuthError::NoAccount)?;

        let token = source
            .acquire_interactive(&account, &self.proxy_scopes, ui)
            .await?;
        let entry = self.cache.insert(&self.proxy_scopes, token);
        tracing::info!(account = %account.username, "proxy token acquired interactively");

        Ok(entry.access_token().to_owned())
    }

    /// Asks the app-protection subsystem to bring the signed-in account into
    /// compliance
    ///
    /// The outcome arrives as a notification; see [`notifications()`][Self::notifications].
    pub async fn remediate_compliance(&self) -> Result<(), AuthError> {
        let account = self
            .current_account()
            .await?
            .ok_or(AuthError::NoAccount)?;

        tracing::info!(account = %account.username, "requesting compliance remediation");
        self.gate.remediate_compliance(&account).await
    }

    /// Subscribes to enrollment and compliance notifications from the
    /// app-protection subsystem
    pub fn notifications(&self) -> broadcast::Receiver<GateNotification> {
        self.gate.subscribe()
    }

    /// Waits until the account is enrolled and a proxy token can be obtained
    ///
    /// Both conditions are polled under a single deadline. An enrollment
    /// notification triggers an early poll. Token errors that may resolve on
    /// their own are retried; any other error ends the wait.
    pub async fn wait_for_proxy_access_ready(&self) -> Result<(), ReadinessError> {
        match tokio::time::timeout(self.timing.readiness_timeout(), self.poll_until_ready()).await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.timing.readiness_timeout_ms,
                    "proxy access not ready in time"
                );
                Err(ReadinessError::Timeout)
            }
        }
    }

    async fn poll_until_ready(&self) -> Result<(), ReadinessError> {
        let interval = self.timing.readiness_interval();
        let mut notifications = self.gate.subscribe();

        let account = loop {
            match self.current_account().await {
                Ok(Some(account)) => break account,
                Ok(None) => return Err(ReadinessError::AuthFailed(AuthError::NoAccount)),
                Err(error) if error.is_retryable() => {
                    tracing::debug!(%error, "account lookup failed, retrying");
                    tokio::time::sleep(interval).await;
                }
                Err(error) => return Err(ReadinessError::AuthFailed(error)),
            }
        };

        loop {
            let status = self.gate.status(&account).await;
            if status.is_succeeded() {
                break;
            }
            tracing::trace!(%status, "waiting for enrollment");

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                notification = notifications.recv() => match notification {
                    Ok(notification) => {
                        tracing::debug!(?notification, "app-protection notification received");
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "app-protection notifications lagged");
                    }
                    Err(RecvError::Closed) => tokio::time::sleep(interval).await,
                },
            }
        }

        loop {
            match self.cache.acquire(&self.proxy_scopes).await {
                Ok(_) => {
                    tracing::info!(account = %account.username, "proxy access ready");
                    return Ok(());
                }
                Err(error) if error.is_retryable() => {
                    tracing::debug!(%error, "proxy token not yet available, retrying");
                    tokio::time::sleep(interval).await;
                }
                Err(error) => return Err(ReadinessError::AuthFailed(error)),
            }
        }
    }

    /// Signs the current account out and removes it from app protection
    ///
    /// Returns the account that was signed out. The token cache is cleared
    /// even when no account was signed in.
    pub async fn sign_out(&self) -> Result<Option<Account>, AuthError> {
        let source = self.cache.source();
        let account = source.current_account().await?;

        if let Some(account) = &account {
            source.sign_out(account).await?;
            if let Err(error) = self.gate.unregister_account(account).await {
                tracing::warn!(account = %account.username, %error, "failed to unregister account");
            }
            tracing::info!(account = %account.username, "signed out");
        } else {
            tracing::debug!("no account to sign out");
        }

        self.cache.clear();
        Ok(account)
    }

    /// Obtains a token for a service resource on behalf of the app-protection
    /// subsystem
    ///
    /// The token is requested for the resource's `.default` scope.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn service_token(&self, resource_id: &str) -> Result<AccessToken, AuthError> {
        let scopes = ScopeSet::single(format!("{resource_id}/.default"));
        tracing::debug!(resource_id, "service token requested");
        let entry = self.cache.acquire_blocking(&scopes)?;
        Ok(entry.access_token().to_owned())
    }
}
