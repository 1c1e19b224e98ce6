//! Token sources
//!
//! A token source is the identity provider client that actually talks to the
//! authority. The cache in this crate consumes only the silent acquisition
//! path; interactive sign-in is driven by the application where a UI context
//! is available.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{AuthError, IssuedToken, ScopeSet};

mod constant;

pub use constant::ConstTokenSource;

/// An account known to the identity provider
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    /// The provider's unique identifier for the account
    pub id: String,
    /// The user principal name
    pub username: String,
    /// The tenant the account belongs to
    pub tenant_id: String,
    /// The authority that issued the account's tokens
    pub authority: String,
}

/// An asynchronous source for tokens
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Gets the currently signed-in account, if any
    async fn current_account(&self) -> Result<Option<Account>, AuthError>;

    /// Requests a token for `scopes` without user interaction
    async fn acquire_silent(
        &self,
        account: &Account,
        scopes: &ScopeSet,
    ) -> Result<IssuedToken, AuthError>;

    /// Signs `account` out of the identity provider
    async fn sign_out(&self, account: &Account) -> Result<(), AuthError>;
}

/// A token source that can also prompt the user to sign in
#[async_trait]
pub trait InteractiveTokenSource: TokenSource {
    /// A handle to the UI context the provider needs to present its flow
    type Ui: Send + Sync;

    /// Signs a user in interactively and returns the account along with a
    /// token for `scopes`
    async fn sign_in_interactive(
        &self,
        scopes: &ScopeSet,
        ui: &Self::Ui,
    ) -> Result<(Account, IssuedToken), AuthError>;

    /// Requests a token for `scopes` on behalf of an account that is already
    /// signed in, presenting the provider's UI
    ///
    /// This is how [`AuthError::UiRequired`] is resolved: the user completes
    /// whatever the provider asks for (consent, multi-factor prompts) and
    /// silent acquisition works again afterwards.
    async fn acquire_interactive(
        &self,
        account: &Account,
        scopes: &ScopeSet,
        ui: &Self::Ui,
    ) -> Result<IssuedToken, AuthError>;
}

#[async_trait]
impl<S: TokenSource + ?Sized> TokenSource for std::sync::Arc<S> {
    async fn current_account(&self) -> Result<Option<Account>, AuthError> {
        (**self).current_account().await
    }

    async fn acquire_silent(
        &self,
        account: &Account,
        scopes: &ScopeSet,
    ) -> Result<IssuedToken, AuthError> {
        (**self).acquire_silent(account, scopes).await
    }

    async fn sign_out(&self, account: &Account) -> Result<(), AuthError> {
        (**self).sign_out(account).await
    }
}
