// Authentication module
// Manages the access token lifecycle: storage, single-flight refresh, session termination

mod claims;
mod manager;
mod refresh;
mod store;
mod terminator;
mod types;

pub use claims::{Claims, SessionState};
pub use manager::AuthManager;
pub use refresh::RefreshCoordinator;
pub use store::CredentialStore;
pub use terminator::SessionTerminator;
pub use types::{extract_access_token, SessionExpired, TOKEN_FIELDS};
