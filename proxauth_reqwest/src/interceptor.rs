//! Rewriting of engine requests bound for the proxy origin

use std::{error::Error as StdError, fmt::Write as _, time::Duration};

use bytes::{BufMut, BytesMut};
use predicates::Predicate;
use proxauth_clock::{Clock, System};
use proxauth_tokens::{sources::TokenSource, AccessTokenRef, ScopeSet, TokenCache};
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Method,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use thiserror::Error;

use crate::{
    rules::{CarriesSentinel, ReplayableMethod, SameOrigin},
    InterceptedRequest, ProxyOrigin, SubstituteResponse,
};

/// What to do with a same-origin request whose method carries a body
///
/// The engine does not expose request bodies, so such requests cannot be
/// replayed with a token attached. They are expected to be handled by the
/// in-page script instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NonReplayablePolicy {
    /// Let the engine perform the request unmodified
    #[default]
    PassThrough,
    /// Fail the request with a diagnostic page
    Reject,
}

/// The classification of an intercepted request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// The request is not bound for the proxy origin
    ForeignOrigin,
    /// The in-page script has already attached a token
    AlreadyInjected,
    /// The method cannot be replayed
    NonReplayable,
    /// The request should be replayed with a token
    Eligible,
}

/// The outcome of intercepting a request
#[derive(Debug)]
pub enum Interception {
    /// The engine should perform the request itself
    PassThrough,
    /// The engine should use this response instead
    Substitute(SubstituteResponse),
}

impl Interception {
    /// Whether the engine should perform the request itself
    #[inline]
    pub fn is_pass_through(&self) -> bool {
        matches!(self, Self::PassThrough)
    }

    /// The substituted response, if any
    pub fn into_substitute(self) -> Option<SubstituteResponse> {
        match self {
            Self::PassThrough => None,
            Self::Substitute(resp) => Some(resp),
        }
    }
}

/// An error that prevents an eligible request from being replayed
#[derive(Debug, Error)]
pub enum InterceptError {
    /// The method cannot be replayed and the policy rejects it
    #[error("{0} must be handled by the in-page script")]
    NonReplayableMethod(String),
    /// The method is not a valid HTTP method
    #[error("invalid method {0:?}")]
    InvalidMethod(String),
    /// A header name or value could not be carried over
    #[error("invalid header {0:?}")]
    InvalidHeader(String),
    /// The access token contains bytes that are not allowed in a header
    #[error("access token is not a valid header value")]
    InvalidToken,
    /// The upstream exchange failed
    #[error("upstream request failed")]
    Send(#[from] reqwest_middleware::Error),
    /// The upstream answered with a redirect
    #[error("status code {0} not allowed")]
    RedirectNotAllowed(u16),
}

/// Replays engine requests bound for the proxy origin with an access token
/// attached
///
/// Requests are replayed through a dedicated client that never follows
/// redirects, so that the engine observes the same exchange it would have
/// made itself, only authenticated.
#[derive(Debug)]
pub struct RequestInterceptor<S, C = System> {
    tokens: TokenCache<S, C>,
    same_origin: SameOrigin,
    scopes: ScopeSet,
    client: ClientWithMiddleware,
    policy: NonReplayablePolicy,
}

impl<S, C> Clone for RequestInterceptor<S, C> {
    fn clone(&self) -> Self {
        Self {
            tokens: self.tokens.clone(),
            same_origin: self.same_origin.clone(),
            scopes: self.scopes.clone(),
            client: self.client.clone(),
            policy: self.policy,
        }
    }
}

impl<S, C> RequestInterceptor<S, C> {
    /// Constructs an interceptor
    ///
    /// `client` should not follow redirects; see [`bypass_client()`][Self::bypass_client].
    pub fn new(
        tokens: TokenCache<S, C>,
        origin: ProxyOrigin,
        scopes: ScopeSet,
        client: ClientWithMiddleware,
    ) -> Self {
        Self {
            tokens,
            same_origin: SameOrigin::new(origin),
            scopes,
            client,
            policy: NonReplayablePolicy::default(),
        }
    }

    /// Sets the handling of methods that cannot be replayed
    pub fn with_policy(mut self, policy: NonReplayablePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builds a client suitable for replaying requests
    ///
    /// Connecting, and the whole exchange including the body, are bounded
    /// by `timeout`. A replay that runs out of time is rendered as a
    /// diagnostic page.
    pub fn bypass_client(timeout: Duration) -> Result<ClientWithMiddleware, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(ClientBuilder::new(client).build())
    }

    /// The scopes requested for replayed requests
    #[inline]
    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    /// Classifies a request without side effects
    pub fn classify(&self, req: &InterceptedRequest) -> Decision {
        if !self.same_origin.eval(req) {
            Decision::ForeignOrigin
        } else if CarriesSentinel.eval(req) {
            Decision::AlreadyInjected
        } else if !ReplayableMethod.eval(req) {
            Decision::NonReplayable
        } else {
            Decision::Eligible
        }
    }

    /// Replays a request with the given token through the bypass client
    pub async fn rewrite(
        &self,
        req: &InterceptedRequest,
        token: &AccessTokenRef,
    ) -> Result<SubstituteResponse, InterceptError> {
        let method = Method::from_bytes(req.method().to_ascii_uppercase().as_bytes())
            .map_err(|_| InterceptError::InvalidMethod(req.method().to_owned()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in req.headers() {
            if name.eq_ignore_ascii_case(header::AUTHORIZATION.as_str()) {
                continue;
            }

            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| InterceptError::InvalidHeader(name.to_owned()))?;
            let value = HeaderValue::from_bytes(value.as_bytes())
                .map_err(|_| InterceptError::InvalidHeader(name.as_str().to_owned()))?;
            headers.append(name, value);
        }

        headers.insert(header::AUTHORIZATION, bearer(token)?);
        headers.insert(sentinel_header()?, HeaderValue::from_static("true"));

        let response = self
            .client
            .request(method, req.url().clone())
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        tracing::info!(
            method = req.method(),
            url = %req.url(),
            status = status.as_u16(),
            "replayed request with access token"
        );

        if status.is_redirection() {
            return Err(InterceptError::RedirectNotAllowed(status.as_u16()));
        }

        Ok(SubstituteResponse::from_upstream(response))
    }
}

impl<S, C> RequestInterceptor<S, C>
where
    S: TokenSource + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Intercepts a request on behalf of the engine
    ///
    /// Requests that are not eligible, or for which no token could be
    /// obtained, pass through. Failures while replaying an eligible request
    /// are rendered as a diagnostic page.
    pub async fn intercept(&self, req: &InterceptedRequest) -> Interception {
        let decision = self.classify(req);
        tracing::trace!(method = req.method(), url = %req.url(), ?decision, "classified request");

        match decision {
            Decision::ForeignOrigin | Decision::AlreadyInjected => Interception::PassThrough,
            Decision::NonReplayable => match self.policy {
                NonReplayablePolicy::PassThrough => Interception::PassThrough,
                NonReplayablePolicy::Reject => {
                    let error = InterceptError::NonReplayableMethod(req.method().to_owned());
                    Interception::Substitute(render_failure(req, &error))
                }
            },
            Decision::Eligible => {
                let entry = match self.tokens.acquire(&self.scopes).await {
                    Ok(entry) => entry,
                    Err(error) => {
                        tracing::warn!(
                            url = %req.url(),
                            scopes = %self.scopes,
                            %error,
                            "no access token available, passing request through"
                        );
                        return Interception::PassThrough;
                    }
                };

                match self.rewrite(req, entry.access_token()).await {
                    Ok(resp) => Interception::Substitute(resp),
                    Err(error) => Interception::Substitute(render_failure(req, &error)),
                }
            }
        }
    }

    /// Intercepts a request from a thread that is not driving the runtime
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn intercept_blocking(&self, req: &InterceptedRequest) -> Interception {
        self.tokens.runtime().block_on(self.intercept(req))
    }
}

fn bearer(token: &AccessTokenRef) -> Result<HeaderValue, InterceptError> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value =
        HeaderValue::from_maybe_shared(header_value).map_err(|_| InterceptError::InvalidToken)?;
    value.set_sensitive(true);
    Ok(value)
}

fn sentinel_header() -> Result<HeaderName, InterceptError> {
    HeaderName::from_bytes(crate::SENTINEL_HEADER.as_bytes())
        .map_err(|_| InterceptError::InvalidHeader(crate::SENTINEL_HEADER.to_owned()))
}

fn render_failure(req: &InterceptedRequest, error: &InterceptError) -> SubstituteResponse {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(message, ": {cause}");
        source = cause.source();
    }

    tracing::error!(method = req.method(), url = %req.url(), error = %message, "interception failed");

    SubstituteResponse::error_page(req.method(), req.url().as_str(), &message)
}
