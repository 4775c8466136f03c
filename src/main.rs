//! Replica Router - Main entry point.
//!
//! Connects a primary/replica pair and runs the read-then-write routing
//! scenarios against it, logging where each unit of work was routed.

use clap::Parser;
use replica_router::config::{Config, Scenario};
use replica_router::db::PoolRegistry;
use replica_router::users::{UserOuterService, UserService};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

async fn run_scenarios(registry: &Arc<PoolRegistry>, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let users = UserService::new().with_timeout(config.transaction_timeout_duration());
    let outer = UserOuterService::new(users.clone());

    let mut ctx = registry.context();
    users.ensure_schema(&mut ctx).await?;

    for scenario in config.scenario.expand() {
        // One context per scenario, as if each ran in its own request.
        let mut ctx = registry.context();
        info!(scenario = %scenario, context_id = %ctx.id(), "Running scenario");

        let result = match scenario {
            Scenario::ReadThenWrite => outer.read_then_write(&mut ctx, &config.name, &config.email).await,
            Scenario::ReadThenWriteInTransaction => {
                outer
                    .read_then_write_in_transaction(&mut ctx, &config.name, &config.email)
                    .await
            }
            Scenario::ReadThenWriteIndependent => {
                outer
                    .read_then_write_independent(&mut ctx, &config.name, &config.email)
                    .await
            }
            Scenario::All => continue,
        };

        match result {
            Ok(user) => info!(scenario = %scenario, id = user.id, name = %user.name, "Scenario complete"),
            Err(e) => {
                error!(
                    scenario = %scenario,
                    error = %e,
                    suggestion = e.suggestion().unwrap_or("-"),
                    "Scenario failed"
                );
                ctx.unwind().await?;
                return Err(e.into());
            }
        }
    }

    let found = users.find_all_users_read_only(&mut ctx, &config.name).await?;
    info!(name = %config.name, count = found.len(), "Users visible through the replica");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!(
        scenario = %config.scenario,
        "Starting Replica Router v{}",
        env!("CARGO_PKG_VERSION")
    );

    let (primary, replica) = config.parse_data_sources()?;
    let registry = Arc::new(PoolRegistry::connect(primary, replica).await?);

    for source in registry.info() {
        info!(
            pool = %source.pool,
            db_type = %source.database_type,
            endpoint = %source.endpoint,
            version = ?source.server_version,
            "Data source"
        );
    }

    let result = run_scenarios(&registry, &config).await;
    registry.close().await;

    if let Err(e) = result {
        error!(error = %e, "Router error");
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}
