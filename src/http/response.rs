//! Backend response representation.

use serde::de::DeserializeOwned;

use crate::error::{LinkError, Result};

/// A fully-read response from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl BackendResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| LinkError::Decode(e.to_string()))
    }

    /// True when this is a 403 whose body carries one of the mismatch markers.
    pub fn is_auth_mismatch(&self, markers: &[String]) -> bool {
        if self.status != 403 {
            return false;
        }
        let body = self.body.to_ascii_lowercase();
        markers
            .iter()
            .any(|marker| body.contains(&marker.to_ascii_lowercase()))
    }
}
