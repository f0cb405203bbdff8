use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Environments are a JSON array of names.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            cloud_platform TEXT NOT NULL DEFAULT 'Unknown',
            environments_json TEXT NOT NULL DEFAULT '[]',
            slack_webhook TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS components (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            name TEXT NOT NULL,
            excluded_environments_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            FOREIGN KEY (project_id) REFERENCES projects(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before components carried excluded environments.
    let has_excluded: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM pragma_table_info('components') WHERE name = 'excluded_environments_json'",
    )
    .fetch_one(pool)
    .await?;
    if !has_excluded {
        sqlx::query(
            "ALTER TABLE components ADD COLUMN excluded_environments_json TEXT NOT NULL DEFAULT '[]'",
        )
        .execute(pool)
        .await?;
    }

    // Only the sha256 of a token is stored.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tokens (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            name TEXT NOT NULL,
            hash TEXT NOT NULL UNIQUE,
            prefix TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (project_id) REFERENCES projects(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS plans (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            component_id TEXT NOT NULL,
            environment TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            pending_approval INTEGER NOT NULL DEFAULT 0,
            artifact_key TEXT NOT NULL,
            document_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_components_project ON components(project_id, name)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tokens_project ON tokens(project_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_plans_key ON plans(component_id, environment, timestamp DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_plans_project_env ON plans(project_id, environment)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
