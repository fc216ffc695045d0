// Clinic session - authenticated HTTP client core for the clinic dashboard

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod models;

pub use auth::{AuthManager, CredentialStore, SessionExpired, SessionState};
pub use config::Config;
pub use error::{AuthFailure, ClientError};
pub use http_client::ClinicHttpClient;
pub use models::{ApiResponse, RequestDescriptor};
