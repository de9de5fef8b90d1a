//! Request construction
//!
//! [`RequestBuilder`] turns a method, URL, headers and parameters into a
//! [`Request`] carrying its encoded body and the pool timeouts.

use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use bytes::Bytes;
use http::{
    header::{HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE},
    HeaderMap, Method,
};
use url::Url;

use crate::{
    config::PoolConfig,
    error::{HttpError, Result},
    route::{self, Destination},
};

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
pub const UTF_8: &str = "UTF-8";

/// Header map supplied by callers
///
/// Names are matched case-insensitively when sent; of two keys differing
/// only in case, the later one in map order wins.
pub type Headers = BTreeMap<String, String>;

/// Body parameters supplied by callers
pub type Params = BTreeMap<String, String>;

/// Supported request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Head,
    Patch,
    Delete,
    Trace,
    Options,
}

impl RequestMethod {
    pub const ALL: [RequestMethod; 8] = [
        RequestMethod::Get,
        RequestMethod::Post,
        RequestMethod::Put,
        RequestMethod::Head,
        RequestMethod::Patch,
        RequestMethod::Delete,
        RequestMethod::Trace,
        RequestMethod::Options,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
            RequestMethod::Head => "HEAD",
            RequestMethod::Patch => "PATCH",
            RequestMethod::Delete => "DELETE",
            RequestMethod::Trace => "TRACE",
            RequestMethod::Options => "OPTIONS",
        }
    }

    pub fn to_method(self) -> Method {
        match self {
            RequestMethod::Get => Method::GET,
            RequestMethod::Post => Method::POST,
            RequestMethod::Put => Method::PUT,
            RequestMethod::Head => Method::HEAD,
            RequestMethod::Patch => Method::PATCH,
            RequestMethod::Delete => Method::DELETE,
            RequestMethod::Trace => Method::TRACE,
            RequestMethod::Options => Method::OPTIONS,
        }
    }

    /// Whether the method carries an enclosed body
    pub fn encloses_body(&self) -> bool {
        matches!(
            self,
            RequestMethod::Post | RequestMethod::Put | RequestMethod::Patch
        )
    }

    /// Eligible for automatic retry
    pub fn is_idempotent(&self) -> bool {
        !self.encloses_body()
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestMethod {
    type Err = HttpError;

    fn from_str(s: &str) -> Result<Self> {
        RequestMethod::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| HttpError::UnsupportedMethod(s.to_string()))
    }
}

impl TryFrom<&Method> for RequestMethod {
    type Error = HttpError;

    fn try_from(method: &Method) -> Result<Self> {
        method.as_str().parse()
    }
}

/// Timeouts applied to one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect
    pub connect: Duration,
    /// Waiting for a pool slot
    pub connection_request: Duration,
    /// Waiting for the response head, then for the body
    pub socket: Duration,
}

impl Timeouts {
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            connect: config.connect_timeout(),
            connection_request: config.connect_timeout(),
            socket: config.socket_timeout(),
        }
    }
}

/// Encoded request entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub content_encoding: &'static str,
}

impl RequestBody {
    fn utf8(bytes: impl Into<Bytes>, content_type: &'static str) -> Self {
        Self {
            bytes: bytes.into(),
            content_type,
            content_encoding: UTF_8,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

/// Fully configured request
#[derive(Debug, Clone)]
pub struct Request {
    method: RequestMethod,
    url: Url,
    destination: Destination,
    headers: HeaderMap,
    body: Option<RequestBody>,
    timeouts: Timeouts,
}

impl Request {
    pub fn method(&self) -> RequestMethod {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Override the timeouts set at build time
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Path plus query, the HTTP/1.1 origin-form target
    pub fn target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    /// Effective Content-Type header value
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }
}

/// Builds requests with the timeouts of one pool configuration
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    timeouts: Timeouts,
}

impl RequestBuilder {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            timeouts: Timeouts::from_config(config),
        }
    }

    /// Build a request whose body, if any, is encoded from `params`
    pub fn build(
        &self,
        method: RequestMethod,
        url: &str,
        headers: Option<&Headers>,
        params: Option<&Params>,
    ) -> Result<Request> {
        let mut request = self.base(method, url, headers)?;

        let params = match params {
            Some(params) if method.encloses_body() && !params.is_empty() => params,
            _ => return Ok(request),
        };

        let declared = match headers {
            None => APPLICATION_JSON.to_string(),
            Some(_) => request
                .content_type()
                .unwrap_or(APPLICATION_JSON)
                .to_string(),
        };

        let body = match media_type(&declared).as_str() {
            APPLICATION_JSON => RequestBody::utf8(serde_json::to_vec(params)?, APPLICATION_JSON),
            APPLICATION_FORM_URLENCODED => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(params.iter())
                    .finish();
                RequestBody::utf8(encoded, APPLICATION_FORM_URLENCODED)
            }
            _ => return Err(HttpError::UnsupportedContentType(declared)),
        };

        attach(&mut request, body);
        Ok(request)
    }

    /// Build a request carrying `raw` verbatim as a JSON body
    ///
    /// Content-Type is forced to JSON whatever the caller headers say.
    /// A blank `raw` sends no body.
    pub fn build_raw(
        &self,
        method: RequestMethod,
        url: &str,
        headers: Option<&Headers>,
        raw: &str,
    ) -> Result<Request> {
        let mut request = self.base(method, url, headers)?;
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));

        if method.encloses_body() && !raw.trim().is_empty() {
            attach(
                &mut request,
                RequestBody::utf8(Bytes::copy_from_slice(raw.as_bytes()), APPLICATION_JSON),
            );
        }
        Ok(request)
    }

    fn base(&self, method: RequestMethod, url: &str, headers: Option<&Headers>) -> Result<Request> {
        let (url, destination) = route::resolve(url)?;

        let mut header_map = HeaderMap::new();
        match headers {
            None => {
                header_map.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
            }
            Some(headers) => {
                for (name, value) in headers {
                    let name = HeaderName::from_bytes(name.as_bytes())
                        .map_err(|e| HttpError::InvalidRequest(format!("header {name}: {e}")))?;
                    let value = HeaderValue::from_str(value)
                        .map_err(|e| HttpError::InvalidRequest(format!("header {name}: {e}")))?;
                    header_map.insert(name, value);
                }
            }
        }

        Ok(Request {
            method,
            url,
            destination,
            headers: header_map,
            body: None,
            timeouts: self.timeouts,
        })
    }
}

fn attach(request: &mut Request, body: RequestBody) {
    if !request.headers.contains_key(CONTENT_TYPE) {
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(body.content_type));
    }
    if !request.headers.contains_key(CONTENT_ENCODING) {
        request
            .headers
            .insert(CONTENT_ENCODING, HeaderValue::from_static(body.content_encoding));
    }
    request.body = Some(body);
}

/// Media type without parameters, lowercased
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
