//! Predicates used to classify intercepted requests
//!
//! Each classification rule is available as a [`Predicate`] so that the
//! rules can be inspected (with [`find_case()`][Predicate::find_case]) or
//! combined with other predicates when a host needs a custom policy.

use std::fmt;

use predicates::{prelude::*, reflection};

use crate::{InterceptedRequest, ProxyOrigin};

/// Matches requests bound for the proxy origin
#[derive(Clone, Debug)]
pub struct SameOrigin {
    origin: ProxyOrigin,
}

impl SameOrigin {
    /// Construct a new predicate for the given origin
    pub fn new(origin: ProxyOrigin) -> Self {
        Self { origin }
    }
}

impl Predicate<InterceptedRequest> for SameOrigin {
    #[inline]
    fn eval(&self, req: &InterceptedRequest) -> bool {
        self.origin.matches(req.url())
    }

    fn find_case(&self, expected: bool, req: &InterceptedRequest) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "origin",
                    req.url().origin().ascii_serialization(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for SameOrigin {}
impl fmt::Display for SameOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("origin == ")?;
        fmt::Display::fmt(&self.origin, f)
    }
}

/// Matches requests that already carry the sentinel header
///
/// The header name is matched case-insensitively and any value counts.
#[derive(Clone, Copy, Debug)]
pub struct CarriesSentinel;

impl Predicate<InterceptedRequest> for CarriesSentinel {
    #[inline]
    fn eval(&self, req: &InterceptedRequest) -> bool {
        req.has_header(crate::SENTINEL_HEADER)
    }

    fn find_case(&self, expected: bool, req: &InterceptedRequest) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "sentinel",
                    req.header(crate::SENTINEL_HEADER)
                        .unwrap_or("<absent>")
                        .to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for CarriesSentinel {}
impl fmt::Display for CarriesSentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("has header ")?;
        f.write_str(crate::SENTINEL_HEADER)
    }
}

/// Matches requests whose method has no body, and can thus be replayed
/// by the interceptor
#[derive(Clone, Copy, Debug)]
pub struct ReplayableMethod;

impl Predicate<InterceptedRequest> for ReplayableMethod {
    #[inline]
    fn eval(&self, req: &InterceptedRequest) -> bool {
        let method = req.method();
        method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD")
    }

    fn find_case(&self, expected: bool, req: &InterceptedRequest) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result)
                    .add_product(reflection::Product::new("method", req.method().to_owned())),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for ReplayableMethod {}
impl fmt::Display for ReplayableMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("method is GET or HEAD")
    }
}
