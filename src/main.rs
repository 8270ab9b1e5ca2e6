//! Meridian EMR service
//!
//! Main entry point for the Meridian HTTP API.

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use meridian::api::{self, AppState};
use meridian::config::{self, LoggingConfig};
use meridian::db::Database;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

fn init_tracing(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if cfg.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Load configuration
    let config = config::load_config().context("failed to load configuration")?;
    init_tracing(&config.logging);

    // Connect to database
    let database = Database::connect(&config.database)
        .await
        .context("failed to connect to database")?;

    // Run migrations
    database
        .run_migrations()
        .await
        .context("failed to run database migrations")?;

    let state = web::Data::new(AppState::new(database, &config));
    let bind = (config.server.host.clone(), config.server.port);
    info!(host = %bind.0, port = bind.1, "starting HTTP server");

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(TracingLogger::default())
            .wrap(Cors::default().allow_any_origin().allow_any_method().allow_any_header().max_age(3600))
            .configure(api::configure)
    });
    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server.bind(bind)?.run().await?;
    Ok(())
}
