//! Response value

use serde::de::DeserializeOwned;

use crate::error::Result;

/// Status code and fully drained body of one exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status_code: u16,
    body: String,
}

impl Response {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Decode the body as JSON, `None` when the body is blank
    pub fn decode_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        if self.body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&self.body)?))
    }
}
