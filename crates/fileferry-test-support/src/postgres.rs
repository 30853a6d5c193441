//! Disposable Postgres databases for integration tests.

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use postgres::NoTls;
use url::Url;

/// Variable naming a Postgres server tests may create databases on.
pub const TEST_DATABASE_URL_ENV: &str = "FILEFERRY_TEST_DATABASE_URL";

/// A uniquely named database dropped when the handle goes away.
pub struct TestDatabase {
    connection_string: String,
    admin_url: String,
    name: String,
}

impl TestDatabase {
    /// Connection string for `sqlx` or any other Postgres client.
    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        let statement = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", self.name);
        let _ = run_admin(&self.admin_url, statement);
    }
}

/// Create a fresh database on the server named by `FILEFERRY_TEST_DATABASE_URL`.
///
/// Tests call this and skip when it returns an error.
///
/// # Errors
///
/// Returns an error when the variable is unset, the URL is malformed or the
/// server refuses the `CREATE DATABASE`.
pub fn start_postgres() -> Result<TestDatabase> {
    let base = std::env::var(TEST_DATABASE_URL_ENV)
        .map_err(|_| anyhow!("{TEST_DATABASE_URL_ENV} is not set"))?;
    let parsed = Url::parse(&base).context("invalid postgres connection url")?;
    let name = unique_database_name();

    let mut admin = parsed.clone();
    admin.set_path("/postgres");
    let mut target = parsed;
    target.set_path(&format!("/{name}"));

    run_admin(admin.as_str(), format!("CREATE DATABASE \"{name}\""))?;
    Ok(TestDatabase {
        connection_string: target.to_string(),
        admin_url: admin.to_string(),
        name,
    })
}

// The blocking client owns its own runtime, so it must not run on an async worker.
fn run_admin(admin_url: &str, statement: String) -> Result<()> {
    let admin_url = admin_url.to_string();
    std::thread::spawn(move || -> Result<()> {
        let config = postgres::Config::from_str(&admin_url)?;
        let mut client = config.connect(NoTls)?;
        client
            .simple_query(&statement)
            .map(|_| ())
            .with_context(|| format!("failed to run `{statement}`"))
    })
    .join()
    .unwrap_or_else(|_| Err(anyhow!("postgres admin thread panicked")))
}

fn unique_database_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("fileferry_test_{}_{nanos}", std::process::id())
}
