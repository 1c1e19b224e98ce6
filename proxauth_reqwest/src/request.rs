use reqwest::Url;

/// A snapshot of a request the embedding browser engine is about to perform
///
/// Headers keep the order in which they were supplied; lookups by name are
/// case-insensitive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterceptedRequest {
    method: String,
    url: Url,
    headers: Vec<(String, String)>,
}

impl InterceptedRequest {
    /// Constructs a request snapshot without headers
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self {
            method: method.into(),
            url,
            headers: Vec::new(),
        }
    }

    /// Constructs a request snapshot from an unparsed URL
    pub fn parse(method: impl Into<String>, url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(method, Url::parse(url)?))
    }

    /// Adds a header to the snapshot
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds every header from `headers`, preserving their order
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// The request method, as reported by the engine
    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request URL
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Iterates over all headers in order
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Gets the first value of the named header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the named header is present with any value
    #[inline]
    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }
}
