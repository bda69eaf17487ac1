#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the Good Cause Eviction eligibility map.
//!
//! Handlers are thin: they parse the request, lease a connection for the
//! request alone, and hand off to `gce_map_database`. Every request owns a
//! cancellation token whose drop guard lives as long as the handler (or
//! the CSV body stream), so a client that goes away cancels its queries.

mod handlers;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use gce_map_database::db::DatabaseConfig;
use gce_map_database::run_migrations;

/// Shared application state.
pub struct AppState {
    /// Where each request opens its own connection.
    pub config: DatabaseConfig,
}

/// Registers the `/api` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/buildings", web::get().to(handlers::buildings))
            .route("/clusters", web::get().to(handlers::clusters))
            .route("/districts/{kind}", web::get().to(handlers::districts))
            .route(
                "/districts/{kind}/{id}/buildings.csv",
                web::get().to(handlers::district_csv),
            )
            .route(
                "/hexes/{zoom}/{longitude}/{latitude}/buildings.csv",
                web::get().to(handlers::hex_csv),
            ),
    );
}

/// Starts the eligibility map API server.
///
/// Reads the database settings from the environment, applies pending
/// migrations on a short-lived connection, and serves until shutdown. The
/// caller provides the async runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an error if the database is unreachable, a migration fails, or
/// the HTTP server fails to bind.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config = DatabaseConfig::from_env();

    log::info!("Running migrations...");
    {
        let lease = config.connect().await.map_err(std::io::Error::other)?;
        run_migrations(&*lease)
            .await
            .map_err(std::io::Error::other)?;
    }

    let state = web::Data::new(AppState { config });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
