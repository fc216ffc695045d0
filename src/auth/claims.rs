// Access token claims and derived session state

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Claims carried in the access token payload.
/// The signature is never checked here, the backend is the authority.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

impl Claims {
    /// Decode the payload segment of a JWT
    pub fn decode(token: &str) -> Option<Self> {
        let mut parts = token.split('.');
        let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }

        // Some issuers keep the padding, the URL-safe engine rejects it
        let payload = payload.trim_end_matches('=');
        let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    /// Informational only, a 401 from the backend is what ends a session
    pub fn is_expired(&self) -> bool {
        self.expires_at().map(|exp| Utc::now() >= exp).unwrap_or(false)
    }

    pub fn is_admin(&self) -> bool {
        self.role
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case("admin"))
    }

    pub fn is_doctor(&self) -> bool {
        self.role
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case("doctor"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Authenticated(Claims),
    Anonymous,
}

impl SessionState {
    pub fn from_token(token: Option<&str>) -> Self {
        match token.and_then(Claims::decode) {
            Some(claims) => SessionState::Authenticated(claims),
            None => SessionState::Anonymous,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn claims(&self) -> Option<&Claims> {
        match self {
            SessionState::Authenticated(claims) => Some(claims),
            SessionState::Anonymous => None,
        }
    }
}

#[cfg(test)]
pub(crate) fn make_token(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.signature", header, payload)
}
