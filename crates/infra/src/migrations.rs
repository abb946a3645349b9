//! SQL schema, applied in order at startup.
//!
//! Every statement is idempotent (`IF NOT EXISTS`), so re-running is harmless.

use sqlx::PgPool;
use tracing::info;

/// Schema files in application order.
pub const MIGRATIONS: &[(&str, &str)] = &[
    ("0001_outbox", include_str!("../migrations/0001_outbox.sql")),
    ("0002_projections", include_str!("../migrations/0002_projections.sql")),
];

/// Apply every migration.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    for (name, sql) in MIGRATIONS {
        sqlx::raw_sql(sql).execute(pool).await?;
        info!(migration = name, "migration applied");
    }
    Ok(())
}
