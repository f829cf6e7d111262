//! Request and response views exchanged with the mediation layer.

use bytes::Bytes;
use http::header::{Entry, HeaderName, HeaderValue, COOKIE, SET_COOKIE};
use http::{HeaderMap, Method, StatusCode, Uri};
use tracing::warn;

/// Inbound request as seen by the load balancer.
#[derive(Debug, Clone, Default)]
pub struct GatewayRequest {
    /// Request method.
    pub method: Method,
    /// Request URI.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Bytes,
}

impl GatewayRequest {
    /// Create a request.
    #[must_use]
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Create a `GET` request for `/`.
    #[must_use]
    pub fn get() -> Self {
        Self::new(Method::GET, Uri::from_static("/"))
    }

    /// Append a header. Names or values that are not valid HTTP are dropped.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        append_header(&mut self.headers, name, value);
        self
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header, if present and textual.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of a cookie sent by the client.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.trim())
    }

    /// Whether the client reached the gateway over TLS.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.uri.scheme_str() == Some("https")
            || self
                .header("x-forwarded-proto")
                .is_some_and(|p| p.eq_ignore_ascii_case("https"))
    }
}

/// Response returned to the original caller.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl Default for GatewayResponse {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl GatewayResponse {
    /// Create an empty response with the given status.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// `200 OK`.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// `503 Service Unavailable`, returned when no endpoint can be selected.
    #[must_use]
    pub fn service_unavailable() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE).with_body("no endpoint available")
    }

    /// `504 Gateway Timeout`, synthesized by the timeout sweeper.
    #[must_use]
    pub fn gateway_timeout() -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT).with_body("endpoint timed out")
    }

    /// `502 Bad Gateway`, returned when the endpoint could not be reached.
    #[must_use]
    pub fn bad_gateway() -> Self {
        Self::new(StatusCode::BAD_GATEWAY).with_body("endpoint unreachable")
    }

    /// Append a header. Names or values that are not valid HTTP are dropped.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        append_header(&mut self.headers, name, value);
        self
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header, if present and textual.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Replace a header. Returns `false` if the name or value is not valid HTTP.
    pub fn set_header(&mut self, name: &str, value: &str) -> bool {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
                true
            },
            _ => {
                warn!(header = name, "Dropping invalid response header");
                false
            },
        }
    }

    /// All `Set-Cookie` values.
    #[must_use]
    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    /// Rewrite `Set-Cookie` values in place.
    ///
    /// `rewrite` sees each textual value and returns a replacement for the ones
    /// it changes. Every other value, textual or not, is kept byte for byte.
    /// Returns how many values were replaced.
    pub fn rewrite_set_cookies<F>(&mut self, mut rewrite: F) -> usize
    where
        F: FnMut(&str) -> Option<String>,
    {
        let Entry::Occupied(mut entry) = self.headers.entry(SET_COOKIE) else {
            return 0;
        };

        let mut replaced = 0;
        for value in entry.iter_mut() {
            let Some(replacement) = value.to_str().ok().and_then(&mut rewrite) else {
                continue;
            };
            match HeaderValue::from_str(&replacement) {
                Ok(new) => {
                    *value = new;
                    replaced += 1;
                },
                Err(_) => warn!("Keeping Set-Cookie value, rewrite is not valid HTTP"),
            }
        }
        replaced
    }

    /// Replace every `Set-Cookie` header with `cookies`.
    pub fn replace_set_cookies(&mut self, cookies: &[String]) {
        self.headers.remove(SET_COOKIE);
        for cookie in cookies {
            match HeaderValue::from_str(cookie) {
                Ok(value) => {
                    self.headers.append(SET_COOKIE, value);
                },
                Err(_) => warn!("Dropping invalid Set-Cookie value"),
            }
        }
    }
}

fn append_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
        (Ok(name), Ok(value)) => {
            headers.append(name, value);
        },
        _ => warn!(header = name, "Dropping invalid header"),
    }
}
