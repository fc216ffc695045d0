// Session termination and the session-expired broadcast

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use super::store::CredentialStore;
use super::types::SessionExpired;
use crate::http_client::RequestExecutor;
use crate::models::RequestDescriptor;

/// Capacity of the session event channel
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Ends the session: best-effort logout, clear the credential, notify subscribers.
#[derive(Clone)]
pub struct SessionTerminator {
    executor: RequestExecutor,
    logout_path: Arc<str>,
    timeout: Duration,
    events: broadcast::Sender<SessionExpired>,

    /// Set while a termination is in flight so concurrent callers coalesce
    terminating: Arc<AtomicBool>,
}

/// Resets the in-flight flag and guarantees the credential ends up cleared,
/// even if the terminating future is dropped halfway through the logout call.
struct TerminationGuard<'a> {
    flag: &'a AtomicBool,
    store: &'a CredentialStore,
}

impl Drop for TerminationGuard<'_> {
    fn drop(&mut self) {
        self.store.clear();
        self.flag.store(false, Ordering::Release);
    }
}

impl SessionTerminator {
    pub fn new(executor: RequestExecutor, logout_path: &str, timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            executor,
            logout_path: Arc::from(logout_path),
            timeout,
            events,
            terminating: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionExpired> {
        self.events.subscribe()
    }

    /// Terminate the session.
    /// Returns false when another termination was already in flight; the
    /// credential is cleared either way but no second event is emitted.
    pub async fn terminate(&self) -> bool {
        let store = self.executor.store();

        if self.terminating.swap(true, Ordering::AcqRel) {
            store.clear();
            tracing::debug!("Session termination already in progress");
            return false;
        }
        let _guard = TerminationGuard {
            flag: &self.terminating,
            store,
        };

        let logout = RequestDescriptor::post(&*self.logout_path)
            .skip_refresh()
            .timeout(self.timeout);
        let attempt = self.executor.begin(logout);
        match self.executor.execute(&attempt).await {
            Ok(response) if response.is_success() => {
                tracing::debug!("Backend logout acknowledged");
            }
            Ok(response) => {
                tracing::debug!(status = %response.status, "Backend logout rejected, ignoring");
            }
            Err(e) => {
                tracing::debug!(error = %e, "Backend logout failed, ignoring");
            }
        }

        store.clear();
        let receivers = self.events.send(SessionExpired).unwrap_or(0);
        tracing::info!(receivers, "Session ended, credential cleared");
        true
    }

    /// Terminate only while the store still holds `expected`, the credential
    /// a rejected request was sent with. A session that has since been ended
    /// or replaced is left alone.
    pub async fn terminate_if_current(&self, expected: Option<&str>) -> bool {
        if self.executor.store().get().as_deref() != expected {
            tracing::debug!("Credential changed since the request was sent, not terminating");
            return false;
        }
        self.terminate().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminator(store: CredentialStore, base_url: &str) -> SessionTerminator {
        let executor = RequestExecutor::new(
            store,
            base_url,
            2,
            Duration::from_secs(1),
            Duration::from_secs(2),
        )
        .unwrap();
        SessionTerminator::new(executor, "/auth/logout", Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_terminate_clears_and_notifies() {
        let mut server = mockito::Server::new_async().await;
        let logout = server
            .mock("POST", "/auth/logout")
            .match_header("authorization", "Bearer live-token")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let store = CredentialStore::with_token("live-token");
        let terminator = terminator(store.clone(), &server.url());
        let mut events = terminator.subscribe();

        assert!(terminator.terminate().await);
        assert_eq!(store.get(), None);
        assert_eq!(events.recv().await.unwrap(), SessionExpired);
        logout.assert_async().await;
    }

    #[tokio::test]
    async fn test_logout_failure_does_not_block_cleanup() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/logout")
            .with_status(500)
            .create_async()
            .await;

        let store = CredentialStore::with_token("t");
        let terminator = terminator(store.clone(), &server.url());
        let mut events = terminator.subscribe();

        assert!(terminator.terminate().await);
        assert_eq!(store.get(), None);
        assert_eq!(events.try_recv().unwrap(), SessionExpired);
    }

    #[tokio::test]
    async fn test_unreachable_backend_still_terminates() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let store = CredentialStore::with_token("t");
        let terminator = terminator(store.clone(), &format!("http://127.0.0.1:{port}"));
        let mut events = terminator.subscribe();

        assert!(terminator.terminate().await);
        assert_eq!(store.get(), None);
        assert_eq!(events.try_recv().unwrap(), SessionExpired);
    }

    #[tokio::test]
    async fn test_concurrent_terminations_emit_once() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/logout")
            .with_status(200)
            .create_async()
            .await;

        let store = CredentialStore::with_token("t");
        let terminator = terminator(store.clone(), &server.url());
        let mut events = terminator.subscribe();

        let (a, b, c) = tokio::join!(
            terminator.terminate(),
            terminator.terminate(),
            terminator.terminate()
        );
        assert_eq!([a, b, c].iter().filter(|emitted| **emitted).count(), 1);
        assert_eq!(store.get(), None);
        assert_eq!(events.try_recv().unwrap(), SessionExpired);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_terminate_without_subscribers() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/logout")
            .with_status(200)
            .create_async()
            .await;

        let store = CredentialStore::with_token("t");
        let terminator = terminator(store.clone(), &server.url());
        assert!(terminator.terminate().await);
        assert_eq!(store.get(), None);

        // A later termination is a fresh cycle
        store.set("again");
        let mut events = terminator.subscribe();
        assert!(terminator.terminate().await);
        assert_eq!(events.try_recv().unwrap(), SessionExpired);
    }

    #[tokio::test]
    async fn test_terminate_if_current_skips_replaced_session() {
        let mut server = mockito::Server::new_async().await;
        let logout = server
            .mock("POST", "/auth/logout")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let store = CredentialStore::with_token("after-login");
        let terminator = terminator(store.clone(), &server.url());
        let mut events = terminator.subscribe();

        assert!(!terminator.terminate_if_current(Some("before-login")).await);
        assert_eq!(store.get().as_deref(), Some("after-login"));
        assert!(events.try_recv().is_err());

        assert!(terminator.terminate_if_current(Some("after-login")).await);
        assert_eq!(store.get(), None);
        assert_eq!(events.try_recv().unwrap(), SessionExpired);
        logout.assert_async().await;
    }
}
