// Single-flight token refresh

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt, Shared};

use super::terminator::SessionTerminator;
use super::types::extract_access_token;
use crate::error::{AuthFailure, ClientError};
use crate::http_client::{RequestAttempt, RequestExecutor};
use crate::models::RequestDescriptor;

/// Outcome every joiner of a refresh round observes
type RefreshOutcome = std::result::Result<String, AuthFailure>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// The one refresh round currently in flight
struct PendingRefresh {
    round: u64,
    outcome: SharedRefresh,
}

/// Coordinates token refresh so that any number of concurrent 401s produce a
/// single call to the refresh endpoint.
///
/// A round runs as its own task. Joiners only hold a handle to its outcome, so
/// a caller giving up never cancels a refresh other requests are waiting on.
/// The pending slot is cleared only once the round has fully settled: the new
/// token is stored, or the session has been terminated.
#[derive(Clone)]
pub struct RefreshCoordinator {
    executor: RequestExecutor,
    terminator: SessionTerminator,
    refresh_path: Arc<str>,
    timeout: Duration,
    pending: Arc<Mutex<Option<PendingRefresh>>>,
    rounds: Arc<AtomicU64>,
}

/// Clears the pending slot when a round ends, including by panic
struct SettleGuard {
    pending: Arc<Mutex<Option<PendingRefresh>>>,
    round: u64,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.as_ref().map(|p| p.round) == Some(self.round) {
            *pending = None;
        }
    }
}

impl RefreshCoordinator {
    pub fn new(
        executor: RequestExecutor,
        terminator: SessionTerminator,
        refresh_path: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            terminator,
            refresh_path: Arc::from(refresh_path),
            timeout,
            pending: Arc::new(Mutex::new(None)),
            rounds: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of refresh rounds started so far
    pub fn rounds_started(&self) -> u64 {
        self.rounds.load(Ordering::Acquire)
    }

    pub fn is_refreshing(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Handle a 401 for `attempt`.
    /// Returns the credential to resubmit with, or the terminal failure. A
    /// terminal 401 for the session's own credential ends the session; one for
    /// a skip-refresh request or a caller-supplied credential leaves it alone.
    pub async fn recover(&self, attempt: &RequestAttempt) -> crate::error::Result<String> {
        match self.resolve(attempt).await {
            Ok(token) => Ok(token),
            Err(failure @ (AuthFailure::NoCredential | AuthFailure::AlreadyRetried)) => {
                tracing::debug!(
                    request_id = %attempt.request_id,
                    reason = %failure,
                    "Terminal 401, ending session"
                );
                self.terminator
                    .terminate_if_current(attempt.credential.as_deref())
                    .await;
                Err(ClientError::Unauthorized(failure))
            }
            Err(failure) => Err(ClientError::Unauthorized(failure)),
        }
    }

    async fn resolve(&self, attempt: &RequestAttempt) -> RefreshOutcome {
        if attempt.descriptor.skip_refresh {
            return Err(AuthFailure::SkipRefresh);
        }
        if attempt.credential.is_none() && attempt.descriptor.has_explicit_authorization() {
            return Err(AuthFailure::CallerCredential);
        }
        if attempt.retried {
            return Err(AuthFailure::AlreadyRetried);
        }
        let Some(sent_with) = attempt.credential.as_deref() else {
            return Err(AuthFailure::NoCredential);
        };

        let outcome = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match pending.as_ref() {
                Some(current) => {
                    tracing::debug!(
                        request_id = %attempt.request_id,
                        round = current.round,
                        "Joining refresh round in flight"
                    );
                    current.outcome.clone()
                }
                None => match self.executor.store().get() {
                    // A round that settled after this request went out already replaced the token
                    Some(current) if current != sent_with => {
                        tracing::debug!(
                            request_id = %attempt.request_id,
                            "Credential already refreshed, retrying with it"
                        );
                        return Ok(current);
                    }
                    Some(_) => self.start_round(&mut pending, sent_with.to_string()),
                    None => return Err(AuthFailure::NoCredential),
                },
            }
        };

        outcome.await
    }

    /// Spawn a new round and publish it in the pending slot.
    /// Must be called with the slot locked and empty.
    fn start_round(&self, pending: &mut Option<PendingRefresh>, stale: String) -> SharedRefresh {
        let round = self.rounds.fetch_add(1, Ordering::AcqRel) + 1;
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_round(round, stale).await });

        let outcome = async move {
            handle.await.unwrap_or_else(|e| {
                tracing::error!(round, error = %e, "Refresh task aborted");
                Err(AuthFailure::RefreshFailed)
            })
        }
        .boxed()
        .shared();

        *pending = Some(PendingRefresh {
            round,
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn run_round(self, round: u64, stale: String) -> RefreshOutcome {
        let _settle = SettleGuard {
            pending: self.pending.clone(),
            round,
        };

        tracing::info!(round, "Refreshing access token...");
        let store = self.executor.store();

        match self.request_new_token().await {
            Ok(token) => {
                if store.replace_if(Some(&stale), token.clone()) {
                    tracing::info!(round, "Access token refreshed");
                    return Ok(token);
                }

                // Someone logged in or out while the refresh was outstanding
                match store.get() {
                    Some(newer) => {
                        tracing::warn!(round, "Credential replaced during refresh, keeping the newer one");
                        Ok(newer)
                    }
                    None => {
                        tracing::warn!(round, "Session ended during refresh, discarding token");
                        Err(AuthFailure::RefreshFailed)
                    }
                }
            }
            Err(e) => {
                tracing::warn!(round, error = %format!("{:#}", e), "Token refresh failed, ending session");
                self.terminator.terminate().await;
                Err(AuthFailure::RefreshFailed)
            }
        }
    }

    /// Call the refresh endpoint with ambient credentials only
    async fn request_new_token(&self) -> Result<String> {
        let request = RequestDescriptor::post(&*self.refresh_path)
            .skip_refresh()
            .anonymous()
            .timeout(self.timeout);
        let attempt = self.executor.begin(request);

        let response = self
            .executor
            .execute(&attempt)
            .await
            .context("Failed to send refresh request")?;

        if !response.is_success() {
            anyhow::bail!("Refresh endpoint returned {}", response.status);
        }

        extract_access_token(&response.body)
            .context("Refresh response does not contain an access token")
    }
}
