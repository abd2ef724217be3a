#![warn(clippy::all, clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};

mod error;
mod routes;

use error::AppError;
use logger::init_tracing;
use upwatch_service::{Config, KvStore, LibsqlStore, LocationLookup, TraceLocation};

/// Shared check machinery handed to the trigger route.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn KvStore>,
    pub location: Arc<dyn LocationLookup>,
}

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config_path = std::env::var("UPWATCH_CONFIG").ok();
    let config = Config::from_config(config_path.as_ref())?;

    let store: Arc<dyn KvStore> = Arc::new(LibsqlStore::open(&config.store.path).await?);
    let location: Arc<dyn LocationLookup> = Arc::new(TraceLocation::new()?);

    let state = web::Data::new(AppState { config, store, location });

    let addr: SocketAddr = std::env::var("UPWATCH_BIND")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;
    run_server(addr, state).await
}

async fn run_server(addr: SocketAddr, state: web::Data<AppState>) -> Result<(), AppError> {
    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes::routes))
        .bind(addr)?
        .run()
        .await?;

    Ok(())
}
