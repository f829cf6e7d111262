//! Session affinity.
//!
//! The store maps an affinity token to the endpoint that served it and keeps
//! the inverse index per endpoint. What the token is depends on the
//! persistence mode:
//!
//! - `application-cookie`: the value of the backend's session cookie. The
//!   endpoint marker is spliced into the backend's `Set-Cookie` header.
//! - `lb-cookie`: the endpoint marker, carried in the balancer's own cookie.
//! - `client-ip`: the validated client IP.
//!
//! Entries are only created or rebound by responses and only dropped by an
//! administrative reset.

use super::client::client_ip;
use super::config::{AffinityConfig, PersistenceMode};
use super::endpoint::Endpoint;
use super::message::{GatewayRequest, GatewayResponse};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Bidirectional token/endpoint map.
#[derive(Debug, Default)]
pub struct AffinityStore {
    by_token: DashMap<String, Arc<Endpoint>>,
    by_endpoint: DashMap<String, BTreeSet<String>>,
}

impl AffinityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoint bound to `token`, healthy or not.
    #[must_use]
    pub fn lookup(&self, token: &str) -> Option<Arc<Endpoint>> {
        self.by_token.get(token).map(|e| Arc::clone(e.value()))
    }

    /// Bind `token` to `endpoint`, replacing any previous binding.
    pub fn bind(&self, token: &str, endpoint: &Arc<Endpoint>) {
        let previous = self.by_token.insert(token.to_string(), Arc::clone(endpoint));

        if let Some(previous) = previous {
            if previous.name() == endpoint.name() {
                return;
            }
            if let Some(mut tokens) = self.by_endpoint.get_mut(previous.name()) {
                tokens.remove(token);
            }
            debug!(
                from = %previous.name(),
                to = %endpoint.name(),
                "Affinity rebound"
            );
        }

        self.by_endpoint
            .entry(endpoint.name().to_string())
            .or_default()
            .insert(token.to_string());
    }

    /// Tokens currently bound to an endpoint.
    #[must_use]
    pub fn tokens_for(&self, endpoint: &str) -> Vec<String> {
        self.by_endpoint
            .get(endpoint)
            .map(|tokens| tokens.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every binding to an endpoint. Returns how many were dropped.
    pub fn forget_endpoint(&self, endpoint: &str) -> usize {
        let Some((_, tokens)) = self.by_endpoint.remove(endpoint) else {
            return 0;
        };
        for token in &tokens {
            self.by_token
                .remove_if(token, |_, bound| bound.name() == endpoint);
        }
        tokens.len()
    }

    /// Drop every binding.
    pub fn clear(&self) {
        self.by_token.clear();
        self.by_endpoint.clear();
    }

    /// Number of tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

/// Persistence policy plus its store.
#[derive(Debug)]
pub struct SessionAffinity {
    mode: PersistenceMode,
    config: AffinityConfig,
    store: AffinityStore,
}

impl SessionAffinity {
    /// Create affinity handling for a persistence mode.
    #[must_use]
    pub fn new(mode: PersistenceMode, config: AffinityConfig) -> Self {
        Self {
            mode,
            config,
            store: AffinityStore::new(),
        }
    }

    /// Persistence mode.
    #[must_use]
    pub fn mode(&self) -> PersistenceMode {
        self.mode
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &AffinityStore {
        &self.store
    }

    /// Affinity token carried by a request, if any.
    #[must_use]
    pub fn request_token(&self, request: &GatewayRequest) -> Option<String> {
        match self.mode {
            PersistenceMode::None => None,
            PersistenceMode::ApplicationCookie => request
                .cookie(&self.config.application_cookie)
                .map(str::to_string),
            PersistenceMode::LbCookie => request.cookie(&self.config.cookie_name).map(str::to_string),
            PersistenceMode::ClientIp => client_ip(request).map(|ip| ip.to_string()),
        }
    }

    /// Endpoint the token is pinned to, healthy or not.
    #[must_use]
    pub fn sticky_endpoint(&self, token: &str) -> Option<Arc<Endpoint>> {
        self.store.lookup(token)
    }

    /// Record the serving endpoint and rewrite cookies on the way out.
    ///
    /// `token` is the token the request carried; `secure` is whether the
    /// client connection was TLS.
    pub fn on_response(
        &self,
        response: &mut GatewayResponse,
        endpoint: &Arc<Endpoint>,
        token: Option<&str>,
        secure: bool,
    ) {
        match self.mode {
            PersistenceMode::None => {},
            PersistenceMode::ClientIp => {
                if let Some(ip) = token {
                    self.store.bind(ip, endpoint);
                }
            },
            PersistenceMode::LbCookie => {
                let discarded = response.set_cookies();
                if !discarded.is_empty() {
                    debug!(
                        endpoint = %endpoint.name(),
                        count = discarded.len(),
                        "Discarding backend Set-Cookie headers"
                    );
                }
                let cookie = lb_cookie(
                    &self.config.cookie_name,
                    endpoint.marker(),
                    self.config.secure || secure,
                );
                response.replace_set_cookies(&[cookie]);
                self.store.bind(endpoint.marker(), endpoint);
            },
            PersistenceMode::ApplicationCookie => {
                let mut bound = false;
                response.rewrite_set_cookies(|cookie| {
                    let value = cookie_value(cookie, &self.config.application_cookie)?;
                    self.store.bind(value, endpoint);
                    bound = true;
                    Some(splice_marker(cookie, &self.config.cookie_name, endpoint.marker()))
                });

                if !bound {
                    if let Some(token) = token {
                        self.store.bind(token, endpoint);
                    }
                }
            },
        }
        trace!(endpoint = %endpoint.name(), mode = ?self.mode, "Affinity updated");
    }
}

/// The balancer's own cookie: `name=marker; HttpOnly[; Secure]`, no expiry.
#[must_use]
pub fn lb_cookie(name: &str, marker: &str, secure: bool) -> String {
    if secure {
        format!("{name}={marker}; HttpOnly; Secure")
    } else {
        format!("{name}={marker}; HttpOnly")
    }
}

/// Value of `name` if `set_cookie` sets that cookie.
#[must_use]
pub fn cookie_value<'a>(set_cookie: &'a str, name: &str) -> Option<&'a str> {
    let pair = set_cookie.split(';').next()?;
    let (key, value) = pair.split_once('=')?;
    (key.trim() == name).then_some(value.trim())
}

/// Splice `;key=marker;` directly after the leading `name=value` pair.
///
/// Everything after the first `;` is kept byte for byte.
#[must_use]
pub fn splice_marker(set_cookie: &str, key: &str, marker: &str) -> String {
    let (pair, attributes) = set_cookie
        .split_once(';')
        .unwrap_or((set_cookie, ""));
    format!("{pair};{key}={marker};{attributes}")
}
