//! [`Upstream`] backed by a `reqwest` client.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{FetchError, Upstream};
use crate::http::{Request, Response, StatusCode};

/// Headers that describe a single hop and are never forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Forwards requests to a fixed base URL, keeping path, query, method,
/// end-to-end headers and body.
///
/// # Examples
///
/// ```rust,no_run
/// use swgate::upstream::HttpUpstream;
///
/// let upstream = HttpUpstream::new("http://127.0.0.1:9000", None).unwrap();
/// assert_eq!(upstream.base_url(), "http://127.0.0.1:9000");
/// ```
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    /// Builds a client for `base_url`. With `timeout = None` the transport's
    /// own timeouts decide when a fetch counts as failed.
    ///
    /// Redirects are not followed: a `3xx` reaches the caller with its
    /// `Location` and `Set-Cookie` intact.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] if the TLS backend cannot be initialized.
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(builder.build()?, base_url))
    }

    /// Uses a pre-configured client. It should not follow redirects.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, request: &Request) -> String {
        format!("{}{}", self.base_url, request.uri())
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
        let url = self.url_for(request);

        let mut outgoing = self.client.request(method, &url);
        for (name, value) in request.headers().iter() {
            if is_hop_by_hop(name)
                || name.eq_ignore_ascii_case("host")
                || name.eq_ignore_ascii_case("content-length")
            {
                continue;
            }
            outgoing = outgoing.header(name, value);
        }
        if !request.body_bytes().is_empty() {
            outgoing = outgoing.body(request.body_bytes().clone());
        }

        let reply = outgoing.send().await?;
        let code = reply.status().as_u16();
        let status = StatusCode::from_u16(code)
            .ok_or_else(|| FetchError::InvalidResponse(format!("status {code}")))?;
        debug!(%url, status = code, "upstream replied");

        let mut response = Response::new(status);
        relay_headers(reply.headers(), &mut response);

        let body = reply.bytes().await?;
        Ok(response.body_bytes(body))
    }
}

/// Copies end-to-end reply headers onto `response`. Values that are not
/// visible ASCII cannot be carried by [`Headers`](crate::http::Headers) and
/// are dropped.
fn relay_headers(headers: &reqwest::header::HeaderMap, response: &mut Response) {
    for (name, value) in headers {
        if is_hop_by_hop(name.as_str()) || name == reqwest::header::CONTENT_LENGTH {
            continue;
        }
        match value.to_str() {
            Ok(value) => response.add_header(name.as_str(), value),
            Err(_) => debug!(header = %name, "dropping non-ASCII upstream header value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::*;

    #[test]
    fn relay_skips_hop_by_hop_and_undecodable_values() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("content-length", HeaderValue::from_static("12"));
        headers.insert("x-legacy", HeaderValue::from_bytes(b"caf\xe9").unwrap());
        headers.append("set-cookie", HeaderValue::from_static("sid=1"));
        headers.append("set-cookie", HeaderValue::from_static("theme=dark"));

        let mut response = Response::new(StatusCode::OK);
        relay_headers(&headers, &mut response);

        assert_eq!(response.headers().get("content-type"), Some("application/json"));
        assert!(!response.headers().contains("connection"));
        assert!(!response.headers().contains("content-length"));
        assert!(!response.headers().contains("x-legacy"));
        let cookies: Vec<_> = response.headers().get_all("set-cookie").collect();
        assert_eq!(cookies, vec!["sid=1", "theme=dark"]);
    }

    #[test]
    fn hop_by_hop_is_case_insensitive() {
        assert!(is_hop_by_hop("Transfer-Encoding"));
        assert!(is_hop_by_hop("CONNECTION"));
        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("Authorization"));
    }

    #[test]
    fn url_keeps_query_and_drops_trailing_slash() {
        let upstream = HttpUpstream::with_client(reqwest::Client::new(), "http://backend:8000/");
        let req = Request::get("/api/contributions?member=7");
        assert_eq!(upstream.url_for(&req), "http://backend:8000/api/contributions?member=7");
    }
}
