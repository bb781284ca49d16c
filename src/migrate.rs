use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Fingerprint table: one row per indexed keybinding
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fingerprints (
            id TEXT PRIMARY KEY,
            hash TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fingerprints_updated_at ON fingerprints(updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
