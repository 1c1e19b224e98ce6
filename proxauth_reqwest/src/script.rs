//! Token injection from inside rendered pages
//!
//! Requests with a body cannot be replayed by the [`RequestInterceptor`][crate::RequestInterceptor],
//! so pages on the proxy origin are given a script that attaches the token
//! before `fetch` or `XMLHttpRequest` sends them. The script asks the host for
//! a token through a synchronous bridge object, [`ScriptBridge`], exposed to
//! the page as `window.ProxAuth`.

use proxauth_clock::{Clock, System};
use proxauth_tokens::{sources::TokenSource, Scope, ScopeSet, SyncTokenBridge};

use crate::{ProxyOrigin, SENTINEL_HEADER};

/// The name under which the bridge object is exposed to page scripts
pub const BRIDGE_NAME: &str = "ProxAuth";

const TEMPLATE: &str = include_str!("../assets/intercept_request.js");

/// The interception script for pages on the proxy origin
#[derive(Clone, Debug)]
pub struct InPageScript {
    origin: ProxyOrigin,
    source: String,
}

impl InPageScript {
    /// Renders the script for the given origin
    pub fn new(origin: ProxyOrigin) -> Self {
        let source = TEMPLATE
            .replace("__BRIDGE__", BRIDGE_NAME)
            .replace("__SENTINEL_HEADER__", SENTINEL_HEADER);

        Self { origin, source }
    }

    /// The script to evaluate once `page_url` has finished loading
    ///
    /// Pages outside the proxy origin get nothing.
    pub fn script_for(&self, page_url: &str) -> Option<&str> {
        if self.origin.matches_str(page_url) {
            Some(&self.source)
        } else {
            tracing::trace!(page_url, "page is not on the proxy origin, not injecting script");
            None
        }
    }

    /// The rendered script
    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// The host side of the page bridge
///
/// Every method returns immediately or within the deadline of the
/// underlying [`SyncTokenBridge`]; failures surface as `None`.
#[derive(Debug)]
pub struct ScriptBridge<S, C = System> {
    origin: ProxyOrigin,
    scope: Scope,
    tokens: SyncTokenBridge<S, C>,
}

impl<S, C> Clone for ScriptBridge<S, C> {
    fn clone(&self) -> Self {
        Self {
            origin: self.origin.clone(),
            scope: self.scope.clone(),
            tokens: self.tokens.clone(),
        }
    }
}

impl<S, C> ScriptBridge<S, C> {
    /// Constructs a bridge
    pub fn new(origin: ProxyOrigin, scope: Scope, tokens: SyncTokenBridge<S, C>) -> Self {
        Self {
            origin,
            scope,
            tokens,
        }
    }

    /// `getProxyOrigin()`
    pub fn proxy_origin(&self) -> String {
        self.origin.ascii_serialization()
    }

    /// `getProxyScope()`
    pub fn proxy_scope(&self) -> String {
        self.scope.as_str().to_owned()
    }
}

impl<S, C> ScriptBridge<S, C>
where
    S: TokenSource + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// `acquireToken(scopes)`
    ///
    /// An empty list, or one holding only blank entries, yields `None`
    /// without consulting the cache.
    pub fn acquire_token(&self, scopes: &[String]) -> Option<String> {
        let scopes: ScopeSet = scopes.iter().map(String::as_str).collect();
        if scopes.is_empty() {
            tracing::debug!("page asked for a token without scopes");
            return None;
        }

        self.tokens
            .access_token(&scopes)
            .map(|token| token.as_str().to_owned())
    }
}
