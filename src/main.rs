use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use std::sync::Arc;

use clinic_session::auth::AuthManager;
use clinic_session::config::{CliArgs, Config, LogFormat};
use clinic_session::http_client::ClinicHttpClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before parsing so its values act as environment defaults
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = Config::from_args(&args)?;
    config.validate()?;

    init_logging(&config);

    tracing::info!("Clinic session probe starting...");
    tracing::info!("Backend: {}", config.api_base_url);

    let auth_manager = Arc::new(
        AuthManager::new(&config).context("Failed to initialize authentication manager")?,
    );

    if let Some(token) = args.token.clone() {
        auth_manager.store().set(token);
        tracing::info!("Session seeded from provided access token");
    } else if let (Some(email), Some(password)) = (args.email.as_deref(), args.password.as_deref()) {
        auth_manager
            .login(email, password)
            .await
            .context("Login failed")?;
    } else {
        tracing::warn!("No token or login credentials given, requests will be unauthenticated");
    }

    match auth_manager.session_state().claims() {
        Some(claims) => tracing::info!(
            subject = claims.sub.as_deref().unwrap_or("unknown"),
            role = claims.role.as_deref().unwrap_or("unknown"),
            expired = claims.is_expired(),
            "Session claims decoded"
        ),
        None => tracing::debug!("Session has no decodable claims"),
    }

    // Stand-in for the UI shell, which would redirect to the login view
    let mut session_events = auth_manager.subscribe();

    let client = ClinicHttpClient::new(auth_manager.clone());

    if args.paths.is_empty() {
        tracing::warn!("Nothing to fetch (use --get <PATH>)");
    }

    let fetches = join_all(args.paths.iter().map(|path| {
        let client = client.clone();
        async move { (path.as_str(), client.get(path).await) }
    }));

    let results = tokio::select! {
        results = fetches => results,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C signal, aborting");
            return Ok(());
        }
    };

    let mut failures = 0;
    for (path, result) in results {
        match result {
            Ok(response) => {
                println!("{:<40} {} ({} bytes)", path, response.status, response.body.len());
            }
            Err(e) => {
                failures += 1;
                println!("{:<40} error: {}", path, e);
            }
        }
    }

    let rounds = auth_manager.coordinator().rounds_started();
    if rounds > 0 {
        tracing::info!(rounds, "Token refresh rounds performed");
    }

    let expired = session_events.try_recv().is_ok();
    if expired {
        tracing::warn!("Session expired - login required");
        anyhow::bail!("Session expired during the run");
    }
    if failures > 0 {
        anyhow::bail!("{} request(s) failed", failures);
    }

    Ok(())
}

/// Initialize logging with the configured level and format
fn init_logging(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
