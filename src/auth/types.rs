// Authentication types

use serde::Serialize;
use serde_json::Value;

/// Keys accepted for the access token in refresh and login bodies, first present wins
pub const TOKEN_FIELDS: [&str; 3] = ["access_token", "token", "accessToken"];

/// Process-wide notification that the session is gone and the user must log in again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionExpired;

/// Login request body
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Pull the access token out of a refresh or login response body.
///
/// Keys are tried in [`TOKEN_FIELDS`] order; null, empty or non-string values
/// count as absent. `None` means the body is unusable as a credential.
pub fn extract_access_token(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let object = value.as_object()?;

    TOKEN_FIELDS
        .iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .find(|token| !token.trim().is_empty())
        .map(str::to_string)
}
