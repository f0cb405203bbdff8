//! SQLite-backed [`PlanIndex`] and [`Registry`] implementations.
//!
//! Plan documents are stored whole as JSON in `plans.document_json`, with
//! the columns the index filters and orders on copied alongside. Projects,
//! components and token hashes have their own tables.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use plan_harness_core::models::{CloudPlatform, Component, Project, StalenessKey};
use plan_harness_core::projection::PlanDocument;
use plan_harness_core::store::{PlanFilter, PlanIndex, Registry};

/// SQLite implementation of the plan index and the project registry.
pub struct SqliteStore {
    pool: SqlitePool,
}

/// A stored access token, without its hash.
#[derive(Debug, Clone, Serialize)]
pub struct TokenRecord {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub prefix: String,
    pub created_at: String,
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn project_from_row(row: &SqliteRow) -> Result<Project> {
    let environments_json: String = row.get("environments_json");
    let platform: String = row.get("cloud_platform");
    Ok(Project {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        cloud_platform: platform.parse().unwrap_or_default(),
        environments: serde_json::from_str(&environments_json)
            .context("corrupt environments_json")?,
        slack_webhook: row.get("slack_webhook"),
    })
}

fn component_from_row(row: &SqliteRow) -> Result<Component> {
    let excluded_json: String = row.get("excluded_environments_json");
    Ok(Component {
        id: row.get("id"),
        name: row.get("name"),
        project_id: row.get("project_id"),
        excluded_environments: serde_json::from_str(&excluded_json)
            .context("corrupt excluded_environments_json")?,
    })
}

const COMPONENT_COLUMNS: &str = "id, name, project_id, excluded_environments_json";

fn plan_from_row(row: &SqliteRow) -> Result<PlanDocument> {
    let json: String = row.get("document_json");
    serde_json::from_str(&json).context("corrupt plan document")
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
        environments: &[String],
        slack_webhook: Option<&str>,
    ) -> Result<Project> {
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
            cloud_platform: CloudPlatform::Unknown,
            environments: environments.to_vec(),
            slack_webhook: slack_webhook.map(str::to_string),
        };
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, description, cloud_platform, environments_json,
                                  slack_webhook, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.cloud_platform.as_str())
        .bind(serde_json::to_string(&project.environments)?)
        .bind(&project.slack_webhook)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(project)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(project_from_row).collect()
    }

    pub async fn set_environments(&self, project_id: &str, environments: &[String]) -> Result<()> {
        sqlx::query("UPDATE projects SET environments_json = ? WHERE id = ?")
            .bind(serde_json::to_string(environments)?)
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn create_component(&self, project_id: &str, name: &str) -> Result<Component> {
        let component = Component {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            project_id: project_id.to_string(),
            excluded_environments: Vec::new(),
        };
        sqlx::query("INSERT INTO components (id, project_id, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(&component.id)
            .bind(&component.project_id)
            .bind(&component.name)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(component)
    }

    /// Update the given project fields. An empty `slack_webhook` clears it.
    pub async fn update_project(
        &self,
        project_id: &str,
        description: Option<&str>,
        slack_webhook: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE projects SET
                description = COALESCE(?, description),
                slack_webhook = CASE WHEN ? IS NULL THEN slack_webhook ELSE NULLIF(?, '') END
            WHERE id = ?
            "#,
        )
        .bind(description)
        .bind(slack_webhook)
        .bind(slack_webhook)
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Rename a component and/or replace its excluded environments.
    pub async fn update_component(
        &self,
        component_id: &str,
        name: Option<&str>,
        excluded_environments: Option<&[String]>,
    ) -> Result<bool> {
        let excluded = excluded_environments.map(serde_json::to_string).transpose()?;
        let result = sqlx::query(
            r#"
            UPDATE components SET
                name = COALESCE(?, name),
                excluded_environments_json = COALESCE(?, excluded_environments_json)
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(excluded)
        .bind(component_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_component_record(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM components WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_token(
        &self,
        project_id: &str,
        name: &str,
        hash: &str,
        prefix: &str,
    ) -> Result<TokenRecord> {
        let now = chrono::Utc::now().timestamp();
        let record = TokenRecord {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            prefix: prefix.to_string(),
            created_at: format_ts_iso(now),
        };
        sqlx::query(
            "INSERT INTO tokens (id, project_id, name, hash, prefix, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.project_id)
        .bind(&record.name)
        .bind(hash)
        .bind(&record.prefix)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn list_tokens(&self, project_id: &str) -> Result<Vec<TokenRecord>> {
        let rows = sqlx::query(
            "SELECT id, project_id, name, prefix, created_at FROM tokens WHERE project_id = ? ORDER BY created_at ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| TokenRecord {
                id: row.get("id"),
                project_id: row.get("project_id"),
                name: row.get("name"),
                prefix: row.get("prefix"),
                created_at: format_ts_iso(row.get("created_at")),
            })
            .collect())
    }

    pub async fn delete_token(&self, project_id: &str, token_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tokens WHERE id = ? AND project_id = ?")
            .bind(token_id)
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether `hash` belongs to a token issued for `project_id`.
    pub async fn token_matches(&self, project_id: &str, hash: &str) -> Result<bool> {
        let found: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM tokens WHERE project_id = ? AND hash = ?")
                .bind(project_id)
                .bind(hash)
                .fetch_one(&self.pool)
                .await?;
        Ok(found)
    }
}

#[async_trait]
impl PlanIndex for SqliteStore {
    async fn latest_accepted(&self, key: &StalenessKey) -> Result<Option<PlanDocument>> {
        let row = sqlx::query(
            r#"
            SELECT document_json FROM plans
            WHERE component_id = ? AND environment = ? AND pending_approval = 0
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(&key.component_id)
        .bind(&key.environment)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(plan_from_row).transpose()
    }

    async fn put_plan(&self, doc: &PlanDocument) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO plans (id, project_id, component_id, environment, timestamp,
                               pending_approval, artifact_key, document_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                project_id = excluded.project_id,
                component_id = excluded.component_id,
                environment = excluded.environment,
                timestamp = excluded.timestamp,
                pending_approval = excluded.pending_approval,
                artifact_key = excluded.artifact_key,
                document_json = excluded.document_json
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.project_id)
        .bind(&doc.component_id)
        .bind(&doc.environment)
        .bind(&doc.timestamp)
        .bind(doc.pending_approval)
        .bind(&doc.artifact_key)
        .bind(serde_json::to_string(doc)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_plan(&self, id: &str) -> Result<Option<PlanDocument>> {
        let row = sqlx::query("SELECT document_json FROM plans WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(plan_from_row).transpose()
    }

    async fn list_plans(&self, filter: &PlanFilter) -> Result<Vec<PlanDocument>> {
        let mut sql = String::from("SELECT document_json FROM plans WHERE 1=1");
        let mut binds: Vec<&str> = Vec::new();
        if let Some(p) = &filter.project_id {
            sql.push_str(" AND project_id = ?");
            binds.push(p);
        }
        if let Some(c) = &filter.component_id {
            sql.push_str(" AND component_id = ?");
            binds.push(c);
        }
        if let Some(e) = &filter.environment {
            sql.push_str(" AND environment = ?");
            binds.push(e);
        }
        sql.push_str(" ORDER BY timestamp DESC, id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut query = sqlx::query(&sql);
        for b in binds {
            query = query.bind(b);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(plan_from_row).collect()
    }

    async fn delete_plan(&self, id: &str) -> Result<Option<PlanDocument>> {
        let doc = self.get_plan(id).await?;
        if doc.is_some() {
            sqlx::query("DELETE FROM plans WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(doc)
    }

    async fn delete_component_plans(&self, component_id: &str) -> Result<Vec<PlanDocument>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query("SELECT document_json FROM plans WHERE component_id = ?")
            .bind(component_id)
            .fetch_all(&mut *tx)
            .await?;
        let docs = rows.iter().map(plan_from_row).collect::<Result<Vec<_>>>()?;
        sqlx::query("DELETE FROM plans WHERE component_id = ?")
            .bind(component_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(docs)
    }

    async fn delete_environment_plans(
        &self,
        project_id: &str,
        environment: &str,
    ) -> Result<Vec<PlanDocument>> {
        let mut tx = self.pool.begin().await?;
        let rows =
            sqlx::query("SELECT document_json FROM plans WHERE project_id = ? AND environment = ?")
                .bind(project_id)
                .bind(environment)
                .fetch_all(&mut *tx)
                .await?;
        let docs = rows.iter().map(plan_from_row).collect::<Result<Vec<_>>>()?;
        sqlx::query("DELETE FROM plans WHERE project_id = ? AND environment = ?")
            .bind(project_id)
            .bind(environment)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(docs)
    }
}

#[async_trait]
impl Registry for SqliteStore {
    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn get_component(&self, id: &str) -> Result<Option<Component>> {
        let sql = format!("SELECT {} FROM components WHERE id = ?", COMPONENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(component_from_row).transpose()
    }

    async fn find_components(&self, project_id: &str, name: &str) -> Result<Vec<Component>> {
        let sql = format!(
            "SELECT {} FROM components WHERE project_id = ? AND name = ?",
            COMPONENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(name)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(component_from_row).collect()
    }

    async fn list_components(&self, project_id: &str) -> Result<Vec<Component>> {
        let sql = format!(
            "SELECT {} FROM components WHERE project_id = ? ORDER BY name ASC",
            COMPONENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(component_from_row).collect()
    }

    async fn set_project_platform(&self, project_id: &str, platform: CloudPlatform) -> Result<()> {
        sqlx::query("UPDATE projects SET cloud_platform = ? WHERE id = ?")
            .bind(platform.as_str())
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
