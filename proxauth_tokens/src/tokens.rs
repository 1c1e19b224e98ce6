use proxauth_clock::{Clock, DurationSecs, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{AccessToken, AccessTokenRef, ScopeSet};

/// A token as handed back by a token source
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssuedToken {
    /// The bearer access token
    pub access_token: AccessToken,
    /// The time after which the authority no longer accepts the token
    pub expires_at: UnixTime,
}

impl IssuedToken {
    /// Constructs a token that expires at `expires_at`
    pub fn new(access_token: impl Into<AccessToken>, expires_at: UnixTime) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }
}

/// A cached token for a particular set of scopes
///
/// Entries are never mutated once created: a refresh replaces the entry
/// held by the cache with a new one.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenEntry {
    access_token: AccessToken,
    scopes: ScopeSet,
    issued: UnixTime,
    expires_at: UnixTime,
}

impl TokenEntry {
    /// Constructs a new entry from a freshly issued token
    pub fn new(token: IssuedToken, scopes: ScopeSet, issued: UnixTime) -> Self {
        Self {
            access_token: token.access_token,
            scopes,
            issued,
            expires_at: token.expires_at,
        }
    }

    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the scopes this token was requested for
    #[inline]
    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    /// Gets the time at which the token was placed into the cache
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time at which the token expires
    #[inline]
    pub fn expires_at(&self) -> UnixTime {
        self.expires_at
    }

    /// Gets a duration for how much longer the token would be valid as of the
    /// provided time, ignoring any safety margin
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expires_at - time
    }
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is fresh and valid
    Fresh,
    /// The token is valid, but should be refreshed
    Stale,
    /// The token is too close to expiry to be handed out
    Expired,
}

impl TokenStatus {
    /// Whether the token can be used without refreshing
    #[inline]
    pub fn is_fresh(self) -> bool {
        matches!(self, TokenStatus::Fresh)
    }
}

/// Configuration for determining when a cached token should be refreshed
///
/// A token is considered _expired_ once the current time is within
/// `expiry_margin` of its expiry, and _stale_ once it is within
/// `refresh_margin`. Stale tokens are still served while a refresh happens
/// in the background; expired tokens are never served.
#[derive(Clone, Debug)]
pub struct TokenLifetimeConfig<C = System> {
    expiry_margin: DurationSecs,
    refresh_margin: DurationSecs,
    clock: C,
}

impl Default for TokenLifetimeConfig {
    /// Default lifetime configuration
    ///
    /// Treats tokens as expired two minutes before their actual expiry, and
    /// as stale five minutes before, using the system clock.
    fn default() -> Self {
        Self {
            expiry_margin: DurationSecs::from_mins(2),
            refresh_margin: DurationSecs::from_mins(5),
            clock: System,
        }
    }
}

impl TokenLifetimeConfig {
    /// Constructs a new lifetime configuration
    ///
    /// `refresh_margin` is raised to `expiry_margin` if it is smaller, so a
    /// token always passes through the stale state before expiring.
    pub fn new(expiry_margin: DurationSecs, refresh_margin: DurationSecs) -> Self {
        Self {
            expiry_margin,
            refresh_margin: refresh_margin.max(expiry_margin),
            clock: System,
        }
    }
}

impl<C> TokenLifetimeConfig<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenLifetimeConfig<D> {
        TokenLifetimeConfig {
            expiry_margin: self.expiry_margin,
            refresh_margin: self.refresh_margin,
            clock,
        }
    }

    /// The margin before expiry at which a token is no longer served
    #[inline]
    pub fn expiry_margin(&self) -> DurationSecs {
        self.expiry_margin
    }

    /// The margin before expiry at which a background refresh begins
    #[inline]
    pub fn refresh_margin(&self) -> DurationSecs {
        self.refresh_margin
    }

    /// The clock used to evaluate token status
    #[inline]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Gets the token's lifetime status as of the provided time
    pub fn token_status_at(&self, entry: &TokenEntry, time: UnixTime) -> TokenStatus {
        if time >= entry.expires_at - self.expiry_margin {
            TokenStatus::Expired
        } else if time >= entry.expires_at - self.refresh_margin {
            TokenStatus::Stale
        } else {
            TokenStatus::Fresh
        }
    }
}

impl<C: Clock> TokenLifetimeConfig<C> {
    /// Gets the token's current lifetime status based on the configured clock
    #[inline]
    pub fn token_status(&self, entry: &TokenEntry) -> TokenStatus {
        self.token_status_at(entry, self.clock.now())
    }
}
