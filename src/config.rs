//! Process-wide configuration, read from the environment (optionally loaded
//! from a `.env` file in local development via `dotenvy`). There is no
//! per-repo config file here: which projects and jobs exist, and how they
//! relate, are rows in the store, not static config — see `db::projects` and
//! `db::jobs`.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres DSN for the Store.
    pub database_url: String,
    /// Filesystem root under which the Git Comparator keeps its bare mirrors.
    pub repo_base_dir: String,
    /// Bearer token used when posting commit statuses back to the provider.
    pub provider_token: String,
    /// Required `secret` query-param value on `/hooks/provider`.
    pub provider_webhook_secret: String,
    /// Base URL for outbound status calls, e.g. `https://api.github.com`.
    pub provider_api_url: String,
    /// Base URL a project's clone URL is built from: `{base}/{owner}/{name}.git`.
    /// Distinct from `provider_api_url` since a provider's REST API host and
    /// its git clone host commonly differ (e.g. `api.github.com` vs
    /// `github.com`).
    pub provider_clone_base_url: String,
    /// External origin used to build `target_url`s pointing at our dashboard.
    pub server_url: String,
    /// HTTP listen port.
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            repo_base_dir: env::var("REPO_BASE_DIR").unwrap_or_else(|_| "./repos".to_owned()),
            provider_token: env::var("PROVIDER_TOKEN").unwrap_or_default(),
            provider_webhook_secret: require_env("PROVIDER_WEBHOOK_SECRET")?,
            provider_api_url: env::var("PROVIDER_API_URL")
                .unwrap_or_else(|_| "https://api.github.com".to_owned()),
            provider_clone_base_url: env::var("PROVIDER_CLONE_BASE_URL")
                .unwrap_or_else(|_| "https://github.com".to_owned()),
            server_url: env::var("SERVER_URL").unwrap_or_else(|_| "http://localhost:8000".to_owned()),
            port: env::var("PORT")
                .ok()
                .map(|p| p.parse::<u16>())
                .transpose()?
                .unwrap_or(8000),
        })
    }
}

fn require_env(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("missing required environment variable {key}"))
}

/// Whether the background worker loop (and job scheduler) should be disabled.
/// Set by the integration test harness so tests control state transitions
/// deterministically instead of racing a background task.
pub fn is_worker_disabled() -> bool {
    env::var_os("TRIAGEBOT_TEST_DISABLE_JOBS").is_some()
}
