//! SCIM 2.0 service over an LDAP-style directory.
//!
//! Users, Groups and schema extensions are exposed over SCIM and translated
//! to and from directory entries through a declarative mapping. See
//! [`engine::TranslationEngine`] for the request pipeline and
//! [`handlers`] for per-attribute translation logic.

pub mod codec;
pub mod config;
pub mod directory;
pub mod engine;
pub mod handlers;
#[cfg(feature = "server")]
pub mod observability;
pub mod resource;
pub mod routes;
pub mod schema;
pub mod scim;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::Router;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{
    config::{BridgeConfig, ConfigError},
    directory::InMemoryDirectory,
    engine::TranslationEngine,
    handlers::HandlerRegistry,
    schema::SchemaModel,
};

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BridgeConfig>,
    pub engine: Arc<TranslationEngine>,
}

impl AppState {
    /// Build the schema model, the directory and the handler bindings.
    pub fn from_config(config: BridgeConfig) -> Result<Self, ConfigError> {
        let model = Arc::new(SchemaModel::build(&config.mapping)?);
        let directory = InMemoryDirectory::from_config(&config.directory)
            .map_err(|e| ConfigError::Validation(format!("Invalid directory seed: {}", e)))?;
        let registry = HandlerRegistry::with_builtins(&config.handlers);
        let engine = TranslationEngine::new(
            model,
            Arc::new(directory),
            &registry,
            config.server.public_base_url(),
        )?
        .with_max_results(config.server.max_results);

        Ok(Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
        })
    }
}

/// Mount the SCIM routes under `server.base_path` with request tracing and
/// the body size limit.
pub fn build_app(state: AppState) -> Router {
    let base_path = state.config.server.base_path.trim_end_matches('/').to_string();
    let body_limit = state.config.server.body_limit_bytes;

    let scim = routes::scim_routes();
    let app = if base_path.is_empty() {
        scim
    } else {
        Router::new().nest(&base_path, scim)
    };

    app.layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}
