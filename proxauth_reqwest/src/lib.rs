//! Bearer token injection for web content bound for a reverse-proxied origin
//!
//! Content rendered by an embedded browser engine reaches the proxy origin in
//! two ways, and both need an access token:
//!
//! * requests the engine makes on its own (navigations, subresources) are
//!   handed to a [`RequestInterceptor`], which replays eligible ones through
//!   a bypass client with an `Authorization` header attached;
//! * requests made by page scripts are decorated in the page itself by the
//!   [`InPageScript`], which asks the host for a token through a
//!   [`ScriptBridge`].
//!
//! Requests decorated by the script carry the [`SENTINEL_HEADER`], and the
//! interceptor leaves them alone.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use proxauth_reqwest::{InterceptedRequest, ProxyOrigin, RequestInterceptor};
//! use proxauth_tokens::{sources::ConstTokenSource, ScopeSet, TokenCache};
//!
//! # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = TokenCache::builder(ConstTokenSource::new("token"))
//!     .with_runtime(tokio::runtime::Handle::current())
//!     .build()?;
//!
//! let interceptor = RequestInterceptor::new(
//!     cache,
//!     ProxyOrigin::parse("https://proxy.example.com")?,
//!     ScopeSet::single("https://proxy.example.com/user_impersonation"),
//!     RequestInterceptor::<ConstTokenSource>::bypass_client(Duration::from_secs(30))?,
//! );
//!
//! let req = InterceptedRequest::parse("GET", "https://proxy.example.com/index.html")?
//!     .with_header("Accept", "text/html");
//!
//! if let Some(resp) = interceptor.intercept(&req).await.into_substitute() {
//!     println!("{} {}", resp.status(), resp.reason());
//! }
//! # Ok(()) }
//! ```
//!
//! The classification rules are exposed as [predicates](rules) so that they
//! can be inspected or composed:
//!
//! ```
//! use predicates::prelude::*;
//! use proxauth_reqwest::{rules::{CarriesSentinel, SameOrigin}, InterceptedRequest, ProxyOrigin};
//!
//! let on_proxy = SameOrigin::new(ProxyOrigin::parse("https://proxy.example.com").unwrap());
//! let needs_token = on_proxy.and(CarriesSentinel.not());
//!
//! let req = InterceptedRequest::parse("GET", "https://proxy.example.com/").unwrap();
//! assert!(needs_token.eval(&req));
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod interceptor;
mod origin;
mod request;
pub mod response;
pub mod rules;
pub mod script;

pub use interceptor::{
    Decision, InterceptError, Interception, NonReplayablePolicy, RequestInterceptor,
};
pub use origin::{InvalidOrigin, ProxyOrigin};
pub use request::InterceptedRequest;
pub use response::SubstituteResponse;
pub use script::{InPageScript, ScriptBridge, BRIDGE_NAME};

/// The header marking a request that already carries an access token
pub const SENTINEL_HEADER: &str = "X-Token-Added";
