use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::{AuthManager, CredentialStore};
use crate::error::{ClientError, Result};
use crate::models::{ApiResponse, RequestDescriptor};

/// One outgoing call plus the refresh bookkeeping attached to it
#[derive(Clone)]
pub struct RequestAttempt {
    pub descriptor: RequestDescriptor,

    /// Stored credential this attempt is sent with, `None` when unauthenticated
    /// or when the caller supplied its own Authorization header
    pub credential: Option<String>,

    /// Set once the request has been resubmitted after a refresh
    pub retried: bool,

    /// Short id correlating the original call and its retry in logs
    pub request_id: String,
}

impl RequestAttempt {
    /// The single resubmission allowed after a refresh
    pub fn retry_with(self, token: String) -> Self {
        Self {
            credential: Some(token),
            retried: true,
            ..self
        }
    }
}

/// Performs network calls, attaching the stored credential when appropriate
#[derive(Clone)]
pub struct RequestExecutor {
    /// Shared HTTP client with connection pooling and a cookie jar for the refresh cookie
    client: Client,

    base_url: Url,

    store: CredentialStore,
}

impl RequestExecutor {
    pub fn new(
        store: CredentialStore,
        base_url: &str,
        max_connections: usize,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::InvalidRequest(format!("base URL {base_url:?}: {e}")))?;

        let client = Client::builder()
            .pool_max_idle_per_host(max_connections)
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            base_url,
            store,
        })
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Snapshot the credential for a new logical request
    pub fn begin(&self, descriptor: RequestDescriptor) -> RequestAttempt {
        let credential = if descriptor.anonymous || descriptor.has_explicit_authorization() {
            None
        } else {
            self.store.get()
        };

        RequestAttempt {
            descriptor,
            credential,
            retried: false,
            request_id: Uuid::new_v4().to_string()[..8].to_string(),
        }
    }

    /// Resolve a path against the base URL; absolute URLs pass through
    pub fn resolve_url(&self, url: &str) -> Result<Url> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Url::parse(url)
                .map_err(|e| ClientError::InvalidRequest(format!("URL {url:?}: {e}")));
        }

        let base = self.base_url.as_str().trim_end_matches('/');
        let path = url.trim_start_matches('/');
        Url::parse(&format!("{}/{}", base, path))
            .map_err(|e| ClientError::InvalidRequest(format!("URL {url:?}: {e}")))
    }

    /// Execute one attempt. Any HTTP status is returned as a response;
    /// only transport failures become errors.
    pub async fn execute(&self, attempt: &RequestAttempt) -> Result<ApiResponse> {
        let descriptor = &attempt.descriptor;
        let url = self.resolve_url(&descriptor.url)?;

        tracing::debug!(
            request_id = %attempt.request_id,
            method = %descriptor.method,
            url = %url,
            has_credential = attempt.credential.is_some(),
            retried = attempt.retried,
            "Sending HTTP request"
        );

        let mut builder = self
            .client
            .request(descriptor.method.clone(), url.clone())
            .headers(descriptor.headers.clone());
        if let Some(ref token) = attempt.credential {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = descriptor.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = descriptor.timeout {
            builder = builder.timeout(timeout);
        }

        let result = async {
            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(ApiResponse {
                status,
                headers,
                body,
            })
        }
        .await;

        match result {
            Ok(response) => {
                tracing::debug!(
                    request_id = %attempt.request_id,
                    status = %response.status,
                    "Received HTTP response"
                );
                Ok(response)
            }
            Err(e) => {
                let err = ClientError::from(e);
                tracing::warn!(
                    request_id = %attempt.request_id,
                    error_kind = err.kind(),
                    error = %err,
                    url = %url,
                    "HTTP request error"
                );
                Err(err)
            }
        }
    }
}

/// HTTP client for the clinic backend.
/// Recovers from an expired access token by joining the shared refresh round
/// and resubmitting the request once with the new credential.
#[derive(Clone)]
pub struct ClinicHttpClient {
    auth_manager: Arc<AuthManager>,
}

impl ClinicHttpClient {
    pub fn new(auth_manager: Arc<AuthManager>) -> Self {
        Self { auth_manager }
    }

    pub fn auth_manager(&self) -> &Arc<AuthManager> {
        &self.auth_manager
    }

    /// Send a request.
    /// Non-401 statuses are returned untouched; a 401 either recovers through a
    /// refresh or ends as [`ClientError::Unauthorized`].
    pub async fn send(&self, descriptor: RequestDescriptor) -> Result<ApiResponse> {
        let executor = self.auth_manager.executor();
        let mut attempt = executor.begin(descriptor);

        loop {
            let response = executor.execute(&attempt).await?;
            if response.status != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            tracing::debug!(
                request_id = %attempt.request_id,
                retried = attempt.retried,
                "Received 401"
            );

            match self.auth_manager.recover(&attempt).await {
                Ok(token) => {
                    attempt = attempt.retry_with(token);
                }
                Err(e) => {
                    tracing::warn!(
                        request_id = %attempt.request_id,
                        error = %e,
                        "Request failed authentication"
                    );
                    return Err(e);
                }
            }
        }
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.send(RequestDescriptor::get(path)).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.send(RequestDescriptor::post(path).json(body)?).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.send(RequestDescriptor::put(path).json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.send(RequestDescriptor::delete(path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(store: CredentialStore) -> RequestExecutor {
        RequestExecutor::new(
            store,
            "http://clinic.test/api/",
            4,
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_url() {
        let exec = executor(CredentialStore::new());
        assert_eq!(
            exec.resolve_url("/appointments").unwrap().as_str(),
            "http://clinic.test/api/appointments"
        );
        assert_eq!(
            exec.resolve_url("patients?page=2").unwrap().as_str(),
            "http://clinic.test/api/patients?page=2"
        );
        assert_eq!(
            exec.resolve_url("https://other.test/x").unwrap().as_str(),
            "https://other.test/x"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let result = RequestExecutor::new(
            CredentialStore::new(),
            "::not a url::",
            4,
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(ClientError::InvalidRequest(_))));
    }

    #[test]
    fn test_begin_attaches_stored_credential() {
        let exec = executor(CredentialStore::with_token("stored"));
        let attempt = exec.begin(RequestDescriptor::get("/logs"));
        assert_eq!(attempt.credential.as_deref(), Some("stored"));
        assert!(!attempt.retried);
        assert_eq!(attempt.request_id.len(), 8);
    }

    #[test]
    fn test_begin_respects_explicit_header_and_anonymous() {
        let exec = executor(CredentialStore::with_token("stored"));

        let explicit = RequestDescriptor::get("/logs")
            .header("Authorization", "Bearer caller")
            .unwrap();
        assert_eq!(exec.begin(explicit).credential, None);

        let anonymous = RequestDescriptor::post("/auth/refresh").anonymous();
        assert_eq!(exec.begin(anonymous).credential, None);
    }

    #[test]
    fn test_begin_without_credential() {
        let exec = executor(CredentialStore::new());
        assert_eq!(exec.begin(RequestDescriptor::get("/logs")).credential, None);
    }

    #[test]
    fn test_retry_with_marks_attempt() {
        let exec = executor(CredentialStore::with_token("old"));
        let attempt = exec.begin(RequestDescriptor::get("/patients"));
        let id = attempt.request_id.clone();
        let retry = attempt.retry_with("new".to_string());
        assert!(retry.retried);
        assert_eq!(retry.credential.as_deref(), Some("new"));
        assert_eq!(retry.request_id, id);
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        // Grab a free port and release it so the connection is refused
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let exec = RequestExecutor::new(
            CredentialStore::new(),
            &format!("http://127.0.0.1:{port}"),
            1,
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        let attempt = exec.begin(RequestDescriptor::get("/appointments"));
        let err = exec.execute(&attempt).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
