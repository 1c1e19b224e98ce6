use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use proxauth_clock::{Clock, DurationSecs, System};

use super::{Account, InteractiveTokenSource, TokenSource};
use crate::{AccessToken, AuthError, IssuedToken, ScopeSet};

/// A token source that always issues the same access token
///
/// Every issued token is valid for the configured lifetime from the moment
/// it is requested. Useful for tests and for wiring up a client before a
/// real identity provider is available.
#[derive(Debug)]
pub struct ConstTokenSource<C = System> {
    account: Account,
    token: AccessToken,
    lifetime: DurationSecs,
    signed_in: AtomicBool,
    clock: C,
}

impl ConstTokenSource {
    /// Constructs a source with a signed-in placeholder account and a one hour
    /// token lifetime
    pub fn new(token: impl Into<AccessToken>) -> Self {
        Self {
            account: Account {
                id: "00000000-0000-0000-0000-000000000000".into(),
                username: "user@example.com".into(),
                tenant_id: "common".into(),
                authority: "https://login.example.com/common".into(),
            },
            token: token.into(),
            lifetime: DurationSecs::from_mins(60),
            signed_in: AtomicBool::new(true),
            clock: System,
        }
    }
}

impl<C> ConstTokenSource<C> {
    /// Replaces the signed-in account
    pub fn with_account(mut self, account: Account) -> Self {
        self.account = account;
        self
    }

    /// Sets the lifetime of issued tokens
    pub fn with_lifetime(mut self, lifetime: DurationSecs) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Starts the source with no account signed in
    pub fn signed_out(self) -> Self {
        self.signed_in.store(false, Ordering::Release);
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> ConstTokenSource<D> {
        ConstTokenSource {
            account: self.account,
            token: self.token,
            lifetime: self.lifetime,
            signed_in: self.signed_in,
            clock,
        }
    }
}

impl<C: Clock> ConstTokenSource<C> {
    fn issue(&self) -> IssuedToken {
        IssuedToken::new(self.token.clone(), self.clock.now() + self.lifetime)
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> TokenSource for ConstTokenSource<C> {
    async fn current_account(&self) -> Result<Option<Account>, AuthError> {
        if self.signed_in.load(Ordering::Acquire) {
            Ok(Some(self.account.clone()))
        } else {
            Ok(None)
        }
    }

    async fn acquire_silent(
        &self,
        account: &Account,
        scopes: &ScopeSet,
    ) -> Result<IssuedToken, AuthError> {
        if !self.signed_in.load(Ordering::Acquire) || account != &self.account {
            return Err(AuthError::NoAccount);
        }

        tracing::trace!(%scopes, "issuing constant token");
        Ok(self.issue())
    }

    async fn sign_out(&self, account: &Account) -> Result<(), AuthError> {
        if account != &self.account {
            return Err(AuthError::NoAccount);
        }

        self.signed_in.store(false, Ordering::Release);
        Ok(())
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> InteractiveTokenSource for ConstTokenSource<C> {
    type Ui = ();

    async fn sign_in_interactive(
        &self,
        scopes: &ScopeSet,
        _: &(),
    ) -> Result<(Account, IssuedToken), AuthError> {
        tracing::trace!(%scopes, "signing in constant account");
        self.signed_in.store(true, Ordering::Release);
        Ok((self.account.clone(), self.issue()))
    }

    async fn acquire_interactive(
        &self,
        account: &Account,
        scopes: &ScopeSet,
        _: &(),
    ) -> Result<IssuedToken, AuthError> {
        if !self.signed_in.load(Ordering::Acquire) || account != &self.account {
            return Err(AuthError::NoAccount);
        }

        tracing::trace!(%scopes, "issuing constant token interactively");
        Ok(self.issue())
    }
}
