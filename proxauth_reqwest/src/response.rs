//! Responses handed back to the embedding engine in place of its own fetch

use std::{borrow::Cow, collections::BTreeMap, fmt};

use bytes::{Bytes, BytesMut};
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use reqwest::{header, Version};

/// An error raised while streaming a substituted body
pub type BodyError = Box<dyn std::error::Error + Send + Sync>;

/// A streamed response body
pub type BodyStream = BoxStream<'static, Result<Bytes, BodyError>>;

/// A complete response returned to the engine in place of the request it
/// intercepted
///
/// Header names are lowercase. When the upstream sent several values for
/// one name, only the first is kept.
pub struct SubstituteResponse {
    status: u16,
    reason: Cow<'static, str>,
    mime_type: Option<String>,
    charset: Option<String>,
    headers: BTreeMap<String, String>,
    body: BodyStream,
}

impl fmt::Debug for SubstituteResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubstituteResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("mime_type", &self.mime_type)
            .field("charset", &self.charset)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl SubstituteResponse {
    /// Adopts an upstream response, streaming its body through
    pub fn from_upstream(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let reason = upstream_reason(&response);

        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            headers
                .entry(name.as_str().to_owned())
                .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let (mime_type, charset) = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| parse_content_type(&String::from_utf8_lossy(v.as_bytes())))
            .unwrap_or_default();

        let body = response
            .bytes_stream()
            .map_err(BodyError::from)
            .boxed();

        Self {
            status,
            reason,
            mime_type,
            charset,
            headers,
            body,
        }
    }

    /// Renders a diagnostic page describing a failed interception
    ///
    /// The page is served with status 502 as `text/html` in UTF-8. All
    /// interpolated values are escaped.
    pub fn error_page(method: &str, url: &str, message: &str) -> Self {
        let message = if message.is_empty() {
            "Unknown error"
        } else {
            message
        };

        let html = format!(
            "<!DOCTYPE html>\n\
             <html>\n\
             <head><meta charset=\"UTF-8\"><title>Error</title></head>\n\
             <body style=\"font-family:sans-serif;padding:20px;background-color:#f8f8f8;\">\n\
             <h2>The request could not be completed</h2>\n\
             <p><strong>Method:</strong> {}</p>\n\
             <p><strong>URL:</strong> {}</p>\n\
             <p><strong>Message:</strong> {}</p>\n\
             </body>\n\
             </html>\n",
            escape_html(method),
            escape_html(url),
            escape_html(message),
        );

        let mut headers = BTreeMap::new();
        headers.insert(
            header::CONTENT_TYPE.as_str().to_owned(),
            "text/html; charset=UTF-8".to_owned(),
        );

        let body = Bytes::from(html);
        Self {
            status: 502,
            reason: Cow::Borrowed("Bad Gateway"),
            mime_type: Some("text/html".to_owned()),
            charset: Some("UTF-8".to_owned()),
            headers,
            body: futures::stream::once(async move { Ok(body) }).boxed(),
        }
    }

    /// The HTTP status code
    #[inline]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The reason phrase accompanying the status code
    #[inline]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// The media type, without parameters
    #[inline]
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// The `charset` parameter of the content type
    #[inline]
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// Response headers, first value per name
    #[inline]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Takes the body stream
    pub fn into_body(self) -> BodyStream {
        self.body
    }

    /// Reads the whole body into memory
    pub async fn collect_body(self) -> Result<Bytes, BodyError> {
        let buf = self
            .body
            .try_fold(BytesMut::new(), |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok(buf)
            })
            .await?;
        Ok(buf.freeze())
    }
}

/// The reason phrase sent by the upstream
///
/// hyper only records the phrase from the status line when it differs from
/// the canonical one, so an HTTP/1 response without a recorded phrase
/// carried the canonical phrase. HTTP/2 has no reason phrases at all; those
/// responses, and codes without a canonical phrase, fall back to
/// [`status_text()`].
fn upstream_reason(response: &reqwest::Response) -> Cow<'static, str> {
    let sent = response
        .extensions()
        .get::<hyper::ext::ReasonPhrase>()
        .map(|phrase| String::from_utf8_lossy(phrase.as_bytes()).trim().to_owned())
        .filter(|phrase| !phrase.is_empty());
    if let Some(phrase) = sent {
        return Cow::Owned(phrase);
    }

    let status = response.status();
    let version = response.version();
    let canonical = if version == Version::HTTP_09
        || version == Version::HTTP_10
        || version == Version::HTTP_11
    {
        status.canonical_reason()
    } else {
        None
    };

    Cow::Borrowed(canonical.unwrap_or_else(|| status_text(status.as_u16())))
}

/// The reason phrase used when the upstream did not provide one
///
/// Only a handful of codes are named; everything else is `Unknown`.
pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Splits a `Content-Type` value into its media type and `charset`
///
/// Parameters other than `charset` are ignored. The parameter name is
/// matched as written, so `Charset=` is not recognized.
pub fn parse_content_type(value: &str) -> (Option<String>, Option<String>) {
    let mut parts = value.split(';');
    let mime_type = parts
        .next()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_owned);

    let charset = parts
        .map(str::trim)
        .filter_map(|p| p.strip_prefix("charset="))
        .last()
        .map(str::to_owned);

    (mime_type, charset)
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    mod when_parsing_content_type {
        use super::*;

        #[test]
        fn bare_media_type_has_no_charset() {
            assert_eq!(
                parse_content_type("application/json"),
                (Some("application/json".to_owned()), None)
            );
        }

        #[test]
        fn charset_is_extracted_and_trimmed() {
            assert_eq!(
                parse_content_type("text/html ;  boundary=x; charset=Shift_JIS "),
                (Some("text/html".to_owned()), Some("Shift_JIS".to_owned()))
            );
        }

        #[test]
        fn charset_parameter_name_is_case_sensitive() {
            assert_eq!(
                parse_content_type("text/plain; Charset=utf-8"),
                (Some("text/plain".to_owned()), None)
            );
        }
    }

    #[test]
    fn status_text_falls_back_to_unknown() {
        assert_eq!(status_text(204), "No Content");
        assert_eq!(status_text(418), "Unknown");
        assert_eq!(status_text(502), "Unknown");
    }

    mod when_rendering_an_error_page {
        use super::*;

        #[tokio::test]
        async fn values_are_escaped() {
            let page = SubstituteResponse::error_page(
                "GET",
                "https://proxy.example/?q=<script>",
                "bad \"thing\" & more",
            );

            assert_eq!(page.status(), 502);
            assert_eq!(page.mime_type(), Some("text/html"));
            assert_eq!(page.charset(), Some("UTF-8"));

            let body = page.collect_body().await.unwrap();
            let body = std::str::from_utf8(&body).unwrap();
            assert!(body.contains("https://proxy.example/?q=&lt;script&gt;"));
            assert!(body.contains("bad &quot;thing&quot; &amp; more"));
            assert!(!body.contains("<script>"));
        }

        #[tokio::test]
        async fn empty_message_is_reported_as_unknown() {
            let page = SubstituteResponse::error_page("HEAD", "https://proxy.example/", "");
            let body = page.collect_body().await.unwrap();
            assert!(std::str::from_utf8(&body).unwrap().contains("Unknown error"));
        }
    }

    mod when_adopting_the_reason_phrase {
        use super::*;

        fn upstream(status: u16, version: http::Version) -> http::Response<&'static str> {
            http::Response::builder()
                .status(status)
                .version(version)
                .body("")
                .unwrap()
        }

        #[test]
        fn http1_uses_the_canonical_phrase() {
            let substitute =
                SubstituteResponse::from_upstream(upstream(503, http::Version::HTTP_11).into());
            assert_eq!(substitute.reason(), "Service Unavailable");
        }

        #[test]
        fn http2_falls_back_to_the_table() {
            let substitute =
                SubstituteResponse::from_upstream(upstream(404, http::Version::HTTP_2).into());
            assert_eq!(substitute.reason(), "Not Found");

            let substitute =
                SubstituteResponse::from_upstream(upstream(503, http::Version::HTTP_2).into());
            assert_eq!(substitute.reason(), "Unknown");
        }

        #[test]
        fn codes_without_a_canonical_phrase_fall_back_to_the_table() {
            let substitute =
                SubstituteResponse::from_upstream(upstream(599, http::Version::HTTP_11).into());
            assert_eq!(substitute.reason(), "Unknown");
        }

        #[test]
        fn recorded_phrase_wins() {
            let mut response = upstream(200, http::Version::HTTP_11);
            response
                .extensions_mut()
                .insert(hyper::ext::ReasonPhrase::from_static(b"Everything Is Fine"));

            let substitute = SubstituteResponse::from_upstream(response.into());
            assert_eq!(substitute.reason(), "Everything Is Fine");
        }
    }

    #[tokio::test]
    async fn upstream_headers_keep_the_first_value() {
        let upstream = http::Response::builder()
            .status(201)
            .header("Content-Type", "text/plain; charset=utf-8")
            .header("Set-Cookie", "a=1")
            .header("Set-Cookie", "b=2")
            .body("created")
            .unwrap();

        let substitute = SubstituteResponse::from_upstream(upstream.into());

        assert_eq!(substitute.status(), 201);
        assert_eq!(substitute.reason(), "Created");
        assert_eq!(substitute.mime_type(), Some("text/plain"));
        assert_eq!(substitute.charset(), Some("utf-8"));
        assert_eq!(substitute.headers().get("set-cookie").map(String::as_str), Some("a=1"));
        assert_eq!(&substitute.collect_body().await.unwrap()[..], b"created");
    }
}
