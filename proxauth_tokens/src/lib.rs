//! Facilities for low-latency access to OAuth2 access tokens
//!
//! Web content rendered inside a client application frequently needs an
//! access token _right now_: a script bridge must answer synchronously and an
//! HTTP interception callback cannot wait on a slow authority. Token
//! authorities, on the other hand, are asynchronous and network-bound.
//!
//! This crate bridges the two with a [`TokenCache`] keyed by [`ScopeSet`]:
//!
//! * tokens are served from memory while _fresh_;
//! * once a token becomes _stale_ (by default within five minutes of expiry),
//!   it continues to be served while a refresh runs in the background;
//! * once a token is _expired_ (by default within two minutes of expiry), the
//!   caller waits for a new token, bounded by a fetch timeout;
//! * at most one fetch per scope set is ever in flight, and callers queued
//!   behind a fetch share its outcome.
//!
//! Synchronous callers go through a [`SyncTokenBridge`], which adds an outer
//! deadline and never reports errors, only the absence of a token.
//!
//! ```
//! use proxauth_tokens::{sources::ConstTokenSource, ScopeSet, SyncTokenBridge, TokenCache};
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//!
//! let cache = TokenCache::builder(ConstTokenSource::new("token"))
//!     .with_runtime(runtime.handle().clone())
//!     .build()
//!     .unwrap();
//!
//! let bridge = SyncTokenBridge::new(cache.clone());
//! let scopes = ScopeSet::parse("https://proxy.example.com/user_impersonation");
//!
//! // Called from a thread that is not driving the runtime
//! let token = bridge.access_token(&scopes);
//! assert_eq!(token.as_ref().map(|t| t.as_str()), Some("token"));
//!
//! // On sign-out, account switch and shutdown
//! cache.clear();
//! ```
//!
//! The identity provider is abstracted behind [`TokenSource`][sources::TokenSource].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod bridge;
pub mod cache;
pub mod callback;
mod error;
mod scopes;
pub mod sources;
mod tokens;

pub use braids::*;
pub use bridge::SyncTokenBridge;
pub use cache::{TokenCache, TokenCacheBuilder};
pub use error::AuthError;
pub use scopes::{Iter as ScopeIter, ScopeSet};
pub use tokens::{IssuedToken, TokenEntry, TokenLifetimeConfig, TokenStatus};
