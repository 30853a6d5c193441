#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Postgres persistence shared by every orchestrator instance.
//!
//! Sessions, learning aggregates and the run ledger live in the
//! `fileferry_runtime` schema so validity checks and aggregate updates stay
//! consistent across processes.

mod outcomes;
mod runs;
mod sessions;

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub use outcomes::PgOutcomeStore;
pub use runs::PgRunLedger;
pub use sessions::PgSessionStore;

const MAX_CONNECTIONS: u32 = 10;

/// Handle to the runtime schema.
#[derive(Clone, Debug)]
pub struct RuntimeStore {
    pool: PgPool,
}

impl RuntimeStore {
    /// Connect to `database_url` and apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or migrations fail.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(database_url)
            .await
            .context("failed to connect to runtime database")?;
        Self::new(pool).await
    }

    /// Wrap an existing pool, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail or the database is unreachable.
    pub async fn new(pool: PgPool) -> Result<Self> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&pool)
            .await
            .context("failed to run runtime migrations")?;
        Ok(Self { pool })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Session store over this schema.
    #[must_use]
    pub fn sessions(&self) -> PgSessionStore {
        PgSessionStore::new(self.pool.clone())
    }

    /// Outcome store keeping audit rows for `retention`.
    #[must_use]
    pub fn outcomes(&self, retention: Duration) -> PgOutcomeStore {
        PgOutcomeStore::new(self.pool.clone(), retention)
    }

    /// Run ledger over this schema.
    #[must_use]
    pub fn runs(&self) -> PgRunLedger {
        PgRunLedger::new(self.pool.clone())
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn clamp_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_saturate_at_the_edges() {
        assert_eq!(clamp_i64(42), 42);
        assert_eq!(clamp_i64(u64::MAX), i64::MAX);
        assert_eq!(clamp_u64(-5), 0);
        assert_eq!(clamp_u64(7), 7);
    }
}
