//! Request snapshot handed from the agent to the telemetry reporter.

use axum::extract::ConnectInfo;
use http::header::{HOST, REFERER, USER_AGENT};
use http::{HeaderMap, Request};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Instant;

/// Read-only view of an inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Absolute URL when the host is known, otherwise the request target
    pub url: String,
    pub method: String,
    pub path: String,
    /// Query string including the leading `?`, or empty
    pub query: String,
    /// Empty when the header is absent
    pub user_agent: String,
    /// Empty when neither referrer header is present
    pub referrer: String,
    /// Empty when the client address is unknown
    pub ip_address: String,
    /// Request headers (lowercase keys, repeated values joined with ", ")
    pub headers: BTreeMap<String, String>,
    pub received_at: Instant,
}

impl RequestContext {
    /// Snapshot the parts of a request needed for classification and telemetry.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let headers = request.headers();
        let uri = request.uri();

        let path = uri.path().to_string();
        let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();

        let url = if uri.scheme().is_some() {
            uri.to_string()
        } else if let Some(host) = header_str(headers, HOST.as_str()) {
            let proto = header_str(headers, "x-forwarded-proto");
            let scheme = proto
                .as_deref()
                .and_then(|p| p.split(',').next())
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .unwrap_or("http");
            format!("{scheme}://{host}{path}{query}")
        } else {
            format!("{path}{query}")
        };

        let ip_address = client_ip(headers).unwrap_or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
                .unwrap_or_default()
        });

        Self {
            url,
            method: request.method().to_string(),
            path,
            query,
            user_agent: header_str(headers, USER_AGENT.as_str())
                .map(Cow::into_owned)
                .unwrap_or_default(),
            referrer: referrer(headers),
            ip_address,
            headers: flatten_headers(headers),
            received_at: Instant::now(),
        }
    }

    /// Get a header value by lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }
}

/// Non-empty header value. Bytes outside visible ASCII are decoded lossily.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<Cow<'a, str>> {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()))
        .filter(|v| !v.is_empty())
}

/// First non-empty of `referer` and `referrer`.
fn referrer(headers: &HeaderMap) -> String {
    header_str(headers, REFERER.as_str())
        .or_else(|| header_str(headers, "referrer"))
        .map(Cow::into_owned)
        .unwrap_or_default()
}

/// Client address from proxy headers.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = header_str(headers, "x-forwarded-for").and_then(|v| {
        let first = v.split(',').next().unwrap_or_default().trim();
        (!first.is_empty()).then(|| first.to_string())
    });

    forwarded.or_else(|| {
        header_str(headers, "x-real-ip")
            .map(|v| v.trim().to_string())
            .filter(|ip| !ip.is_empty())
    })
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, headers: &[(&str, &str)]) -> Request<()> {
        let mut builder = Request::builder().method("GET").uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_absent_headers_default_to_empty() {
        let ctx = RequestContext::from_request(&request("/about", &[]));
        assert_eq!(ctx.user_agent, "");
        assert_eq!(ctx.referrer, "");
        assert_eq!(ctx.ip_address, "");
        assert_eq!(ctx.url, "/about");
        assert_eq!(ctx.query, "");
    }

    #[test]
    fn test_url_reconstruction() {
        let ctx = RequestContext::from_request(&request(
            "/docs?page=2",
            &[("host", "example.com"), ("x-forwarded-proto", "https")],
        ));
        assert_eq!(ctx.url, "https://example.com/docs?page=2");
        assert_eq!(ctx.path, "/docs");
        assert_eq!(ctx.query, "?page=2");

        let ctx = RequestContext::from_request(&request("https://example.org/x", &[]));
        assert_eq!(ctx.url, "https://example.org/x");
    }

    #[test]
    fn test_referrer_first_non_empty_wins() {
        let ctx = RequestContext::from_request(&request(
            "/",
            &[("referer", "https://a.example/"), ("referrer", "https://b.example/")],
        ));
        assert_eq!(ctx.referrer, "https://a.example/");

        let ctx = RequestContext::from_request(&request(
            "/",
            &[("referer", ""), ("referrer", "https://b.example/")],
        ));
        assert_eq!(ctx.referrer, "https://b.example/");
    }

    #[test]
    fn test_client_ip_sources() {
        let ctx = RequestContext::from_request(&request(
            "/",
            &[("x-forwarded-for", "203.0.113.7, 10.0.0.1"), ("x-real-ip", "10.0.0.2")],
        ));
        assert_eq!(ctx.ip_address, "203.0.113.7");

        let ctx = RequestContext::from_request(&request("/", &[("x-real-ip", "10.0.0.2")]));
        assert_eq!(ctx.ip_address, "10.0.0.2");

        let mut req = request("/", &[]);
        req.extensions_mut()
            .insert(ConnectInfo("192.0.2.1:4000".parse::<SocketAddr>().unwrap()));
        assert_eq!(RequestContext::from_request(&req).ip_address, "192.0.2.1");
    }

    #[test]
    fn test_empty_forwarded_entry_falls_back_to_real_ip() {
        let ctx = RequestContext::from_request(&request(
            "/",
            &[("x-forwarded-for", " , 10.0.0.1"), ("x-real-ip", "198.51.100.9")],
        ));
        assert_eq!(ctx.ip_address, "198.51.100.9");
    }

    #[test]
    fn test_non_ascii_user_agent_is_kept() {
        let mut req = request("/", &[("referer", "https://claude.ai/")]);
        req.headers_mut().insert(
            USER_AGENT,
            http::HeaderValue::from_bytes(b"GPTBot/1.2 (caf\xe9)").unwrap(),
        );
        req.headers_mut().insert(
            "referrer",
            http::HeaderValue::from_bytes(b"https://perplexity.ai/\xff").unwrap(),
        );

        let ctx = RequestContext::from_request(&req);
        assert!(ctx.user_agent.starts_with("GPTBot/1.2 (caf"));
        assert_eq!(ctx.referrer, "https://claude.ai/");

        req.headers_mut().remove(http::header::REFERER);
        let ctx = RequestContext::from_request(&req);
        assert!(ctx.referrer.starts_with("https://perplexity.ai/"));
    }

    #[test]
    fn test_repeated_headers_are_joined() {
        let ctx = RequestContext::from_request(&request(
            "/",
            &[("accept", "text/html"), ("accept", "application/json")],
        ));
        assert_eq!(ctx.header("accept"), Some("text/html, application/json"));
    }
}
