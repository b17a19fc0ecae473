#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Standalone census radius API server.
//!
//! Reads its configuration from the environment (see
//! [`census_radius_server::config`]) and serves until interrupted.

use census_radius_server::config::ServerConfig;
use census_radius_server::{ServerError, run_server};

#[actix_web::main]
async fn main() -> Result<(), ServerError> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config = ServerConfig::from_env()?;
    if let Err(e) = run_server(config).await {
        log::error!("Server failed: {e}");
        return Err(e);
    }

    Ok(())
}
