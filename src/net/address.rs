//! Backend address normalization.
//!
//! # Responsibilities
//! - Parse user-supplied backend addresses (`host:port`, `host`, or URLs)
//! - Produce one canonical `scheme://host:port/path` form per logical endpoint
//!
//! # Canonical Form
//! ```text
//! localhost                    → ws://localhost:8182/gremlin
//! DB-1.internal:9000           → ws://db-1.internal:9000/gremlin
//! https://Graph.example.com/   → wss://graph.example.com:8182/gremlin
//! ws://10.0.0.5:80/custom/     → ws://10.0.0.5:80/custom
//! ```
//!
//! # Design Decisions
//! - Scheme and host are lowercased
//! - Missing scheme is `ws`; `http`/`https` map to `ws`/`wss`
//! - Missing port is the Gremlin Server default (8182), even for `wss`
//! - Credentials, query strings and fragments are rejected

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Default Gremlin Server port.
pub const DEFAULT_PORT: u16 = 8182;

/// Default Gremlin Server WebSocket path.
pub const DEFAULT_PATH: &str = "/gremlin";

/// Errors produced while normalizing an address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("invalid address: {0}")]
    Parse(String),

    #[error("unsupported scheme '{0}' (expected ws, wss, http or https)")]
    UnsupportedScheme(String),

    #[error("address has no host")]
    MissingHost,

    #[error("credentials are not allowed in backend addresses")]
    Credentials,

    #[error("query strings and fragments are not allowed in backend addresses")]
    QueryOrFragment,
}

/// A normalized backend endpoint.
///
/// Two endpoints are equal exactly when their canonical strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    canonical: String,
    secure: bool,
    host: String,
    port: u16,
}

impl Endpoint {
    /// Normalize a raw address.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AddressError::Empty);
        }

        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("ws://{}", raw)
        };

        let url = Url::parse(&with_scheme).map_err(|e| AddressError::Parse(e.to_string()))?;

        let secure = match url.scheme() {
            "ws" | "http" => false,
            "wss" | "https" => true,
            other => return Err(AddressError::UnsupportedScheme(other.to_string())),
        };

        if !url.username().is_empty() || url.password().is_some() {
            return Err(AddressError::Credentials);
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(AddressError::QueryOrFragment);
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(AddressError::MissingHost)?
            .to_ascii_lowercase();

        // `Url` drops a port equal to the scheme default, so an explicit
        // `:80`/`:443` has to be recovered from the raw authority.
        let port = match url.port() {
            Some(port) => port,
            None if has_explicit_port(&with_scheme) => url.port_or_known_default().unwrap_or(DEFAULT_PORT),
            None => DEFAULT_PORT,
        };

        let trimmed = url.path().trim_end_matches('/');
        let path = if trimmed.is_empty() { DEFAULT_PATH } else { trimmed };

        let scheme = if secure { "wss" } else { "ws" };
        let canonical = format!("{}://{}:{}{}", scheme, host, port, path);

        Ok(Self {
            canonical,
            secure,
            host,
            port,
        })
    }

    /// Canonical `scheme://host:port/path` form.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the endpoint uses TLS (`wss`).
    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl FromStr for Endpoint {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl AsRef<str> for Endpoint {
    fn as_ref(&self) -> &str {
        &self.canonical
    }
}

/// Check whether the authority section of `url` carries a `:port` suffix.
fn has_explicit_port(url: &str) -> bool {
    let after_scheme = match url.split_once("://") {
        Some((_, rest)) => rest,
        None => url,
    };
    let authority = after_scheme
        .split(|c: char| c == '/' || c == '?' || c == '#')
        .next()
        .unwrap_or("");
    let host_port = authority.rsplit('@').next().unwrap_or(authority);

    // IPv6 literals keep their colons inside brackets.
    let tail = match host_port.rfind(']') {
        Some(idx) => &host_port[idx + 1..],
        None => host_port,
    };
    tail.contains(':')
}
