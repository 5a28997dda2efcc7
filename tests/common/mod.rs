//! Shared integration-test scaffolding: a disposable Postgres database per
//! test, created and torn down around the test body. Requires `TEST_DB_URL`
//! to point at a server the test process can create/drop databases on;
//! tests are skipped (not failed) when it isn't set, matching how CI-less
//! local runs shouldn't block on a database being present.

use cinch_merge_gate::db;
use std::future::Future;
use tokio_postgres::Config;

pub struct TestContext {
    client: tokio_postgres::Client,
    db_name: String,
    original_db_url: String,
    test_db_url: String,
    conn_handle: tokio::task::JoinHandle<()>,
}

impl TestContext {
    async fn new(db_url: &str) -> Self {
        let mut config: Config = db_url.parse().expect("cannot parse connection string");

        let client = db::make_client(db_url)
            .await
            .expect("cannot connect to database");
        let db_name = format!("db{}", uuid::Uuid::new_v4().simple());
        client
            .execute(&format!("CREATE DATABASE {db_name}"), &[])
            .await
            .expect("cannot create database");
        drop(client);

        config.dbname(&db_name);
        let (client, connection) = config
            .connect(tokio_postgres::NoTls)
            .await
            .expect("cannot connect to the newly created database");
        let conn_handle = tokio::spawn(async move {
            connection.await.unwrap();
        });

        db::run_migrations(&client)
            .await
            .expect("cannot run database migrations");

        let test_db_url = with_dbname(db_url, &db_name);

        Self {
            client,
            db_name,
            original_db_url: db_url.to_owned(),
            test_db_url,
            conn_handle,
        }
    }

    pub fn client(&self) -> &tokio_postgres::Client {
        &self.client
    }

    /// The connection string for this test's disposable database, suitable
    /// for handing to code (like `AppState::new`) that opens its own pool.
    pub fn database_url(&self) -> String {
        self.test_db_url.clone()
    }

    /// Opens a second connection to this test's disposable database. Useful
    /// for calls (like `jobs::upsert`) that need `&mut Client` for a
    /// transaction while the primary connection is borrowed immutably
    /// elsewhere.
    pub async fn connect(&self) -> tokio_postgres::Client {
        let config: Config = self
            .test_db_url
            .parse()
            .expect("cannot parse connection string");
        let (client, connection) = config
            .connect(tokio_postgres::NoTls)
            .await
            .expect("cannot connect to test database");
        tokio::spawn(async move {
            connection.await.unwrap();
        });
        client
    }

    async fn finish(self) {
        drop(self.client);
        self.conn_handle.await.unwrap();

        let client = db::make_client(&self.original_db_url)
            .await
            .expect("cannot connect to database");
        client
            .execute(&format!("DROP DATABASE {}", self.db_name), &[])
            .await
            .unwrap();
    }
}

/// Rewrites the dbname in a `postgres://...` connection string, keeping any
/// trailing query string intact. `TestContext` connects with this form
/// throughout so every connection it hands out (and any pool built from
/// `database_url()`) lands on the same disposable database.
fn with_dbname(url: &str, db_name: &str) -> String {
    let Some(slash) = url.rfind('/') else {
        return format!("{url} dbname={db_name}");
    };
    let (prefix, rest) = url.split_at(slash + 1);
    match rest.find('?') {
        Some(q) => format!("{prefix}{db_name}{}", &rest[q..]),
        None => format!("{prefix}{db_name}"),
    }
}

pub async fn run_test<F, Fut>(f: F)
where
    F: FnOnce(&TestContext) -> Fut,
    Fut: Future<Output = ()>,
{
    let Ok(db_url) = std::env::var("TEST_DB_URL") else {
        eprintln!("skipping test because TEST_DB_URL was not set");
        return;
    };
    let ctx = TestContext::new(&db_url).await;
    f(&ctx).await;
    ctx.finish().await;
}
