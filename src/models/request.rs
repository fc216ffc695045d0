// Request descriptors and buffered responses

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ClientError, Result};

/// Everything needed to perform one logical call against the backend
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,

    /// Absolute URL or a path resolved against the configured base URL
    pub url: String,

    pub headers: HeaderMap,
    pub body: Option<Bytes>,

    /// Never start a refresh round for this request (refresh/logout/login endpoints)
    pub skip_refresh: bool,

    /// Never attach the stored credential
    pub anonymous: bool,

    /// Overrides the client-wide request timeout
    pub timeout: Option<Duration>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            skip_refresh: false,
            anonymous: false,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Add a header, rejecting names or values that are not valid HTTP
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::InvalidRequest(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::InvalidRequest(format!("header value for {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Serialize `body` as the JSON payload
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| ClientError::InvalidRequest(format!("JSON body: {e}")))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn skip_refresh(mut self) -> Self {
        self.skip_refresh = true;
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether the caller supplied its own Authorization header
    pub fn has_explicit_authorization(&self) -> bool {
        self.headers.contains_key(AUTHORIZATION)
    }
}

/// A fully buffered HTTP response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turn a non-success status into [`ClientError::Api`]
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ClientError::from_status(self.status, &self.text()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_defaults() {
        let req = RequestDescriptor::get("/appointments");
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.url, "/appointments");
        assert!(!req.skip_refresh);
        assert!(!req.anonymous);
        assert!(req.body.is_none());
        assert!(req.timeout.is_none());
        assert!(!req.has_explicit_authorization());
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let req = RequestDescriptor::post("/patients")
            .json(&json!({"name": "Ada"}))
            .unwrap();
        assert_eq!(req.headers[CONTENT_TYPE], "application/json");
        assert_eq!(req.body.as_deref(), Some(br#"{"name":"Ada"}"#.as_slice()));
    }

    #[test]
    fn test_explicit_authorization_header() {
        let req = RequestDescriptor::get("/logs")
            .header("Authorization", "Bearer caller-token")
            .unwrap();
        assert!(req.has_explicit_authorization());
    }

    #[test]
    fn test_invalid_header_rejected() {
        let err = RequestDescriptor::get("/logs")
            .header("bad header", "x")
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));

        let err = RequestDescriptor::get("/logs")
            .header("x-note", "line\nbreak")
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    #[test]
    fn test_response_json_and_text() {
        let response = ApiResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(br#"{"items":[1,2]}"#),
        };
        assert!(response.is_success());
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["items"][1], 2);
        assert_eq!(response.text(), r#"{"items":[1,2]}"#);
    }

    #[test]
    fn test_error_for_status() {
        let ok = ApiResponse {
            status: StatusCode::CREATED,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        assert!(ok.error_for_status().is_ok());

        let not_found = ApiResponse {
            status: StatusCode::NOT_FOUND,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"no such patient"),
        };
        match not_found.error_for_status() {
            Err(ClientError::Api { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "no such patient");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_response_json_error() {
        let response = ApiResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"<html>"),
        };
        let err = response.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
    }
}
