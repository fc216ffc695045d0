use tokio::sync::broadcast;

use super::claims::SessionState;
use super::refresh::RefreshCoordinator;
use super::store::CredentialStore;
use super::terminator::SessionTerminator;
use super::types::{extract_access_token, LoginRequest, SessionExpired};
use crate::config::Config;
use crate::error::{AuthFailure, ClientError, Result};
use crate::http_client::{RequestAttempt, RequestExecutor};
use crate::models::RequestDescriptor;

/// Authentication manager.
/// Composition root for one session: owns the credential store and wires the
/// executor, refresh coordinator and session terminator around it. Independent
/// managers never share state.
pub struct AuthManager {
    executor: RequestExecutor,
    coordinator: RefreshCoordinator,
    terminator: SessionTerminator,
    login_path: String,
}

impl AuthManager {
    /// Create a new AuthManager with an empty session
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_store(config, CredentialStore::new())
    }

    /// Create a new AuthManager around an existing store (restored session, tests)
    pub fn with_store(config: &Config, store: CredentialStore) -> Result<Self> {
        let executor = RequestExecutor::new(
            store,
            &config.api_base_url,
            config.http_max_connections,
            config.connect_timeout(),
            config.request_timeout(),
        )?;

        let terminator = SessionTerminator::new(
            executor.clone(),
            &config.logout_path,
            config.request_timeout(),
        );

        let coordinator = RefreshCoordinator::new(
            executor.clone(),
            terminator.clone(),
            &config.refresh_path,
            config.refresh_timeout(),
        );

        Ok(Self {
            executor,
            coordinator,
            terminator,
            login_path: config.login_path.clone(),
        })
    }

    pub fn store(&self) -> &CredentialStore {
        self.executor.store()
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Subscribe to session-expired notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionExpired> {
        self.terminator.subscribe()
    }

    /// Recover from a 401 on `attempt` (see [`RefreshCoordinator::recover`])
    pub async fn recover(&self, attempt: &RequestAttempt) -> Result<String> {
        self.coordinator.recover(attempt).await
    }

    /// Log in with email and password and store the returned access token
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionState> {
        tracing::info!("Logging in...");

        let request = RequestDescriptor::post(self.login_path.as_str())
            .json(&LoginRequest { email, password })?
            .skip_refresh()
            .anonymous();
        let attempt = self.executor.begin(request);
        let response = self.executor.execute(&attempt).await?;

        if response.status == reqwest::StatusCode::UNAUTHORIZED {
            tracing::warn!("Login rejected");
            return Err(ClientError::Unauthorized(AuthFailure::InvalidCredentials));
        }
        let response = response.error_for_status()?;

        let token = extract_access_token(&response.body).ok_or_else(|| {
            ClientError::InvalidResponse("login response does not contain an access token".to_string())
        })?;
        self.store().set(token);

        let state = self.session_state();
        tracing::info!(
            authenticated = state.is_authenticated(),
            role = state.claims().and_then(|c| c.role.as_deref()).unwrap_or("unknown"),
            "Login successful"
        );
        Ok(state)
    }

    /// Explicit logout through the session terminator
    pub async fn logout(&self) {
        tracing::info!("Logging out...");
        self.terminator.terminate().await;
    }

    /// Current session state derived from the stored credential
    pub fn session_state(&self) -> SessionState {
        SessionState::from_token(self.store().get().as_deref())
    }

    pub fn is_authenticated(&self) -> bool {
        self.session_state().is_authenticated()
    }
}
