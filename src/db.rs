//! The Store (§4.A): a relational home for projects, pull requests, jobs,
//! builds, per-build SHAs, and the durable event-bus queue. Each submodule
//! owns the queries for one entity; this file owns connection management and
//! the forward-only migration runner.

use anyhow::Context as _;
use std::sync::OnceLock;
pub use tokio_postgres::Client as DbClient;

pub mod builds;
pub mod bus;
pub mod jobs;
pub mod projects;
pub mod pull_requests;

/// A lazily-connecting handle to the Store. Migrations run once per process,
/// the first time a connection is requested.
pub struct ClientPool {
    db_url: String,
    migrated: OnceLock<()>,
}

impl ClientPool {
    pub fn new(db_url: String) -> Self {
        ClientPool {
            db_url,
            migrated: OnceLock::new(),
        }
    }

    /// Open a fresh connection, running migrations first if this is the
    /// first connection this pool has handed out.
    pub async fn get(&self) -> anyhow::Result<DbClient> {
        let client = make_client(&self.db_url).await?;
        if self.migrated.get().is_none() {
            run_migrations(&client).await?;
            let _ = self.migrated.set(());
        }
        Ok(client)
    }
}

/// Host fragments that indicate the database requires a TLS connection with a
/// managed-provider CA (mirrors the handling a production Postgres client
/// needs for e.g. RDS, where the default root store doesn't carry the
/// provider's CA).
const TLS_REQUIRED_HOST_MARKERS: &[&str] = &["rds.amazonaws.com"];

pub async fn make_client(db_url: &str) -> anyhow::Result<tokio_postgres::Client> {
    if TLS_REQUIRED_HOST_MARKERS
        .iter()
        .any(|marker| db_url.contains(marker))
    {
        let cert = fetch_provider_ca().await?;
        let connector = native_tls::TlsConnector::builder()
            .add_root_certificate(cert)
            .build()
            .context("building TlsConnector")?;
        let connector = postgres_native_tls::MakeTlsConnector::new(connector);

        let (client, connection) = tokio_postgres::connect(db_url, connector)
            .await
            .context("connecting to database over TLS")?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("database connection error: {e}");
            }
        });
        Ok(client)
    } else {
        tracing::warn!("non-TLS connection to database; set a managed DSN to enable TLS");
        let (client, connection) = tokio_postgres::connect(db_url, tokio_postgres::NoTls)
            .await
            .context("connecting to database")?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("database connection error: {e}");
            }
        });
        Ok(client)
    }
}

const PROVIDER_CA_URL: &str = "https://s3.amazonaws.com/rds-downloads/rds-ca-2019-root.pem";

async fn fetch_provider_ca() -> anyhow::Result<native_tls::Certificate> {
    let pem = reqwest::get(PROVIDER_CA_URL)
        .await
        .context("fetching database CA bundle")?
        .bytes()
        .await
        .context("reading database CA bundle body")?;
    native_tls::Certificate::from_pem(&pem).context("parsing database CA bundle")
}

pub async fn run_migrations(client: &DbClient) -> anyhow::Result<()> {
    client
        .execute(
            "CREATE TABLE IF NOT EXISTS database_versions (
                zero INTEGER PRIMARY KEY,
                migration_counter INTEGER
            );",
            &[],
        )
        .await
        .context("creating database versioning table")?;

    client
        .execute(
            "INSERT INTO database_versions (zero, migration_counter)
        VALUES (0, 0)
        ON CONFLICT DO NOTHING",
            &[],
        )
        .await
        .context("inserting initial database_versions")?;

    let migration_idx: i32 = client
        .query_one("SELECT migration_counter FROM database_versions", &[])
        .await
        .context("getting migration counter")?
        .get(0);
    let migration_idx = migration_idx as usize;

    for (idx, migration) in MIGRATIONS.iter().enumerate() {
        if idx >= migration_idx {
            client
                .execute(*migration, &[])
                .await
                .with_context(|| format!("executing {}th migration", idx))?;
            client
                .execute(
                    "UPDATE database_versions SET migration_counter = $1",
                    &[&(idx as i32 + 1)],
                )
                .await
                .with_context(|| format!("updating migration counter to {}", idx))?;
        }
    }

    Ok(())
}

static MIGRATIONS: &[&str] = &[
    "
CREATE TABLE projects (
    id SERIAL PRIMARY KEY,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    base_tip TEXT,
    publish_status BOOLEAN NOT NULL DEFAULT FALSE,
    UNIQUE (owner, name)
);
",
    "
CREATE TABLE pull_requests (
    id SERIAL PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects (id),
    number INTEGER NOT NULL,
    head TEXT NOT NULL,
    merge_head TEXT,
    author TEXT NOT NULL DEFAULT '',
    title TEXT NOT NULL DEFAULT '',
    is_open BOOLEAN NOT NULL DEFAULT TRUE,
    ahead INTEGER,
    behind INTEGER,
    is_mergeable BOOLEAN,
    UNIQUE (project_id, number)
);
",
    "
CREATE TABLE jobs (
    id SERIAL PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
",
    "
CREATE TABLE job_projects (
    job_id INTEGER NOT NULL REFERENCES jobs (id) ON DELETE CASCADE,
    project_id INTEGER NOT NULL REFERENCES projects (id),
    parameter_name TEXT,
    position INTEGER NOT NULL,
    PRIMARY KEY (job_id, project_id)
);
",
    "
CREATE TABLE builds (
    id SERIAL PRIMARY KEY,
    job_id INTEGER NOT NULL REFERENCES jobs (id),
    build_number INTEGER NOT NULL,
    success BOOLEAN,
    status TEXT,
    UNIQUE (job_id, build_number)
);
",
    "
CREATE TABLE build_shas (
    build_id INTEGER NOT NULL REFERENCES builds (id) ON DELETE CASCADE,
    project_id INTEGER NOT NULL REFERENCES projects (id),
    sha TEXT NOT NULL,
    PRIMARY KEY (build_id, project_id)
);
",
    "
CREATE TABLE bus_events (
    id BIGSERIAL PRIMARY KEY,
    kind TEXT NOT NULL,
    payload JSONB NOT NULL,
    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT now(),
    claimed_at TIMESTAMP WITH TIME ZONE
);
",
];
