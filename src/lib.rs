#![allow(clippy::new_without_default)]

use std::sync::Arc;

pub mod api;
pub mod checks;
pub mod ci;
pub mod config;
pub mod correlation;
pub mod db;
pub mod errors;
pub mod events;
pub mod git;
pub mod models;
pub mod provider;
pub mod webhook;
pub mod worker;

use config::Config;
use db::ClientPool;
use git::GitComparator;
use provider::ProviderClient;

/// Process-wide shared state handed to every axum handler and the worker
/// loop: a connection pool, the Git Comparator's mirror registry, the
/// provider client, and the resolved configuration.
pub struct AppState {
    pub db: ClientPool,
    pub git: GitComparator,
    pub provider: ProviderClient,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Arc<AppState> {
        let provider = ProviderClient::new(
            secrecy::SecretString::from(config.provider_token.clone()),
            config.provider_api_url.clone(),
        );
        let git = GitComparator::new(config.repo_base_dir.clone());
        let db = ClientPool::new(config.database_url.clone());
        Arc::new(AppState {
            db,
            git,
            provider,
            config,
        })
    }
}
