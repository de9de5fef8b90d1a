//! Destination resolution and query composition
//!
//! A [`Destination`] is the scheme, host and port triple that connections
//! are pooled under.

use std::{collections::BTreeMap, fmt};

use url::{Host, Url};

use crate::error::{HttpError, Result};

/// Scheme prefixed onto URLs that fail to parse as given
pub const DEFAULT_SCHEME_PREFIX: &str = "http://";

/// Transport class of a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    fn parse(scheme: &str) -> Option<Self> {
        match scheme {
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            _ => None,
        }
    }
}

/// Pool route key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Destination {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }

    /// Resolve the destination of a URL string
    pub fn resolve(url: &str) -> Result<Self> {
        resolve(url).map(|(_, destination)| destination)
    }

    fn from_url(url: &Url) -> Option<Self> {
        let scheme = Scheme::parse(url.scheme())?;
        let host = match url.host()? {
            Host::Domain(domain) if !domain.is_empty() => domain.to_string(),
            Host::Domain(_) => return None,
            Host::Ipv4(addr) => addr.to_string(),
            Host::Ipv6(addr) => addr.to_string(),
        };
        let port = url.port_or_known_default()?;
        Some(Self::new(scheme, host, port))
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host name or bare IP address, as passed to the resolver
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Host as written in a URL, with IPv6 literals bracketed
    fn uri_host(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, as sent in the Host header
    pub fn authority(&self) -> String {
        let default_port = match self.scheme {
            Scheme::Http => 80,
            Scheme::Https => 443,
        };
        if self.port == default_port {
            self.uri_host()
        } else {
            format!("{}:{}", self.uri_host(), self.port)
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.uri_host(), self.port)
    }
}

/// Parse a URL into its normalized form and destination
///
/// A URL that does not resolve as given is retried once with
/// [`DEFAULT_SCHEME_PREFIX`] before failing.
pub fn resolve(raw: &str) -> Result<(Url, Destination)> {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(url) if url.has_host() => {
            return Destination::from_url(&url)
                .map(|destination| (url, destination))
                .ok_or_else(|| HttpError::Configuration(format!("unsupported url : {raw}")));
        }
        _ if raw.contains("://") => {
            return Err(HttpError::Configuration(format!("url formatter error : {raw}")));
        }
        _ => {}
    }

    let prefixed = format!("{DEFAULT_SCHEME_PREFIX}{raw}");
    Url::parse(&prefixed)
        .ok()
        .and_then(|url| Destination::from_url(&url).map(|destination| (url, destination)))
        .ok_or_else(|| HttpError::Configuration(format!("url formatter error : {prefixed}")))
}

/// Append `params` to the query string of `url`
///
/// Pairs are form-urlencoded in map order and placed after any existing
/// query and before any fragment.
pub fn append_query(url: &str, params: &BTreeMap<String, String>) -> String {
    if params.is_empty() {
        return url.to_string();
    }

    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish();

    let (base, fragment) = match url.find('#') {
        Some(idx) => url.split_at(idx),
        None => (url, ""),
    };
    let separator = match base.find('?') {
        None => "?",
        Some(idx) if idx + 1 == base.len() || base.ends_with('&') => "",
        Some(_) => "&",
    };

    format!("{base}{separator}{encoded}{fragment}")
}
