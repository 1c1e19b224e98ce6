use std::fmt;

use reqwest::Url;
use thiserror::Error;

/// The single origin for which access tokens are injected
///
/// Comparison follows the web origin model: scheme, host and port must all
/// match, with default ports made explicit. Paths, queries and fragments of
/// the configured URL are ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyOrigin {
    url: Url,
}

/// A proxy origin could not be constructed
#[derive(Debug, Error)]
pub enum InvalidOrigin {
    /// The value is not a URL
    #[error("invalid proxy origin URL")]
    Parse(#[from] url::ParseError),
    /// Only `http` and `https` origins can be proxied
    #[error("unsupported proxy origin scheme `{0}`")]
    UnsupportedScheme(String),
    /// The URL has no host
    #[error("proxy origin has no host")]
    MissingHost,
}

impl ProxyOrigin {
    /// Parses an origin from a URL string such as `https://proxy.example.com`
    pub fn parse(s: &str) -> Result<Self, InvalidOrigin> {
        Self::from_url(Url::parse(s)?)
    }

    /// Constructs an origin from any URL on that origin
    pub fn from_url(url: Url) -> Result<Self, InvalidOrigin> {
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(InvalidOrigin::UnsupportedScheme(other.to_owned())),
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(InvalidOrigin::MissingHost);
        }

        Ok(Self { url })
    }

    /// Whether `url` is same-origin with the proxy
    #[inline]
    pub fn matches(&self, url: &Url) -> bool {
        url.origin() == self.url.origin()
    }

    /// Whether the URL string is same-origin with the proxy
    ///
    /// Values that do not parse as absolute URLs never match.
    pub fn matches_str(&self, url: &str) -> bool {
        Url::parse(url).map_or(false, |url| self.matches(&url))
    }

    /// The origin in its serialized form, e.g. `https://proxy.example.com`
    pub fn ascii_serialization(&self) -> String {
        self.url.origin().ascii_serialization()
    }
}

impl fmt::Display for ProxyOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ascii_serialization())
    }
}

impl std::str::FromStr for ProxyOrigin {
    type Err = InvalidOrigin;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
