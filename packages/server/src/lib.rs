#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for census radius queries.
//!
//! Loads the census block dataset once at startup, opens the payload store
//! if the layout needs one, and serves `/api/pop2010` radius queries from
//! the resulting [`QueryEngine`]. If the dataset or store cannot be loaded
//! the server does not bind at all.

pub mod config;
mod handlers;

use std::path::Path;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use census_radius_dataset::progress::{ProgressCallback, null_progress};
use census_radius_dataset::{
    DatasetLoader, DatasetSource, DatasetState, DatasetUnavailable, LoadOptions,
};
use census_radius_geodesy::{GeodesyModel, Wgs84};
use census_radius_query::{PayloadSource, QueryEngine, QueryError, QueryOptions};
use census_radius_store::StoreError;

use crate::config::{ConfigError, PAYLOADS_VAR, ServerConfig};

/// Errors that prevent the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid or incomplete configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The dataset failed to load.
    #[error(transparent)]
    Dataset(#[from] DatasetUnavailable),

    /// The payload store failed to open.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The query engine could not be built.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// The HTTP server failed to bind or run.
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state.
pub struct AppState {
    /// Query engine over the loaded dataset. Read-only, shared by every
    /// worker.
    pub engine: Arc<QueryEngine>,
}

/// Loads the dataset and payload store named by `config` and builds the
/// query engine, reporting decode progress to `progress`.
///
/// # Errors
///
/// See [`open_engine`].
pub fn build_engine(
    config: &ServerConfig,
    progress: Arc<dyn ProgressCallback>,
) -> Result<QueryEngine, ServerError> {
    open_engine(
        &config.dataset,
        config.payloads.as_deref(),
        config.load,
        config.query,
        progress,
    )
}

/// Loads `source`, opens the payload store at `payloads` (if any), and
/// builds a query engine over them.
///
/// # Errors
///
/// Returns [`ServerError`] if the dataset does not reach the ready state,
/// a required payload store is missing or cannot be opened, or the engine
/// rejects the combination.
pub fn open_engine(
    source: &DatasetSource,
    payloads: Option<&Path>,
    load: LoadOptions,
    query: QueryOptions,
    progress: Arc<dyn ProgressCallback>,
) -> Result<QueryEngine, ServerError> {
    let model: Arc<dyn GeodesyModel> = Arc::new(Wgs84::new());
    let loader = DatasetLoader::new(Arc::clone(&model))
        .with_options(load)
        .with_progress(progress);

    let state = DatasetState::default().load(&loader, source);
    let dataset = state.ready()?;

    let payloads = match payloads {
        Some(path) => {
            log::info!("Opening payload store {}", path.display());
            PayloadSource::Store(census_radius_store::open(path, query.workers)?)
        }
        None if dataset.has_demographics() => PayloadSource::Resident,
        None => return Err(ConfigError::Missing(PAYLOADS_VAR).into()),
    };

    Ok(QueryEngine::with_model(dataset, model, payloads, query)?)
}

/// Registers the `/api` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/pop2010", web::get().to(handlers::pop2010_usage))
            .route(
                "/pop2010/{distance}/lat/{lat}/lon/{lon}",
                web::get().to(handlers::pop2010),
            ),
    );
}

/// Starts the census radius API server.
///
/// Builds the query engine from `config` and then starts the Actix-Web
/// HTTP server. This is a regular async function; the caller provides the
/// runtime (e.g. via `#[actix_web::main]`) and initializes logging.
///
/// # Errors
///
/// Returns [`ServerError`] if the engine cannot be built, or if the HTTP
/// server fails to bind or encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    log::info!("Loading census blocks...");
    let engine = build_engine(&config, null_progress())?;

    let state = web::Data::new(AppState {
        engine: Arc::new(engine),
    });

    log::info!("Starting server on {}:{}", config.bind_addr, config.port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((config.bind_addr.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
