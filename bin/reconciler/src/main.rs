mod config;

use crate::config::ReconcilerConfig;
use groupgate_access::AccessService;
use groupgate_authz::{Authorizer, HttpAuthzClient};
use groupgate_store::PgMembershipStore;
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ReconcilerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let store = PgMembershipStore::new(db_pool);
    tracing::info!("Running database migrations...");
    store.migrate().await.expect("failed to run migrations");

    let client = Arc::new(
        HttpAuthzClient::new(&config.authz).expect("failed to create authorization client"),
    );
    let authorizer = Authorizer::new(client.clone());

    // Refuse to touch any grant unless the remote model is the one we expect
    if let Err(e) = authorizer.validate_model().await {
        tracing::error!(error = %e, "Authorization model validation failed");
        shutdown(&client).await;
        return ExitCode::FAILURE;
    }

    let service = AccessService::new(Arc::new(store), authorizer);
    let code = tokio::select! {
        result = service.reconcile_all() => match result {
            Ok(summary) if summary.failed.is_empty() => ExitCode::SUCCESS,
            Ok(summary) => {
                tracing::warn!(failed = ?summary.failed, "Some applications failed to reconcile");
                ExitCode::FAILURE
            }
            Err(e) => {
                tracing::error!(error = %e, "Reconciliation failed");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping reconciliation");
            ExitCode::FAILURE
        }
    };

    shutdown(&client).await;
    code
}

async fn shutdown(client: &HttpAuthzClient) {
    if let Err(e) = client.shutdown().await {
        tracing::warn!(error = %e, "Worker pool did not drain cleanly");
    }
}
