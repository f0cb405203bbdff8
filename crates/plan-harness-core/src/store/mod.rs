//! Storage and notification abstractions for Plan Harness.
//!
//! The ingestion coordinator talks to three stores and one outbound
//! channel, each behind a trait so backends are pluggable (SQLite and
//! the filesystem in the application, [`memory`] for tests):
//!
//! | Trait | Holds |
//! |-------|-------|
//! | [`ArtifactStore`] | Full, unmodified plan JSON keyed by [`ArtifactKey`](crate::projection::ArtifactKey) |
//! | [`PlanIndex`] | Pruned, queryable [`PlanDocument`]s |
//! | [`Registry`] | Project and component identity records |
//! | [`Notifier`] | Outbound drift alerts |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::drift::DriftCounts;
use crate::models::{CloudPlatform, Component, Project, StalenessKey};
use crate::projection::PlanDocument;

/// Blob-style storage for full plan artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write `bytes` under `key`, overwriting any existing object.
    ///
    /// Returns a location string (URL or path) recorded on the plan document.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove an object. Returns `false` if nothing was stored under `key`.
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// Filter for [`PlanIndex::list_plans`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct PlanFilter {
    pub project_id: Option<String>,
    pub component_id: Option<String>,
    pub environment: Option<String>,
    pub limit: Option<usize>,
}

/// Indexed store of pruned plan documents.
#[async_trait]
pub trait PlanIndex: Send + Sync {
    /// The newest accepted (non-pending) plan for `key`, by timestamp.
    async fn latest_accepted(&self, key: &StalenessKey) -> Result<Option<PlanDocument>>;

    /// Insert or replace a plan document by id.
    async fn put_plan(&self, doc: &PlanDocument) -> Result<()>;

    async fn get_plan(&self, id: &str) -> Result<Option<PlanDocument>>;

    /// Matching plans, newest timestamp first.
    async fn list_plans(&self, filter: &PlanFilter) -> Result<Vec<PlanDocument>>;

    /// Remove one plan, returning it if it existed.
    async fn delete_plan(&self, id: &str) -> Result<Option<PlanDocument>>;

    /// Remove every plan of a component, returning the removed documents.
    async fn delete_component_plans(&self, component_id: &str) -> Result<Vec<PlanDocument>>;

    /// Remove every plan of one environment in a project.
    async fn delete_environment_plans(
        &self,
        project_id: &str,
        environment: &str,
    ) -> Result<Vec<PlanDocument>>;
}

/// Project and component identity records.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn get_project(&self, id: &str) -> Result<Option<Project>>;

    async fn get_component(&self, id: &str) -> Result<Option<Component>>;

    /// Components of `project_id` whose name equals `name` exactly.
    async fn find_components(&self, project_id: &str, name: &str) -> Result<Vec<Component>>;

    async fn list_components(&self, project_id: &str) -> Result<Vec<Component>>;

    /// Fix a project's cloud platform.
    async fn set_project_platform(&self, project_id: &str, platform: CloudPlatform) -> Result<()>;
}

/// Payload of a drift alert.
#[derive(Debug, Clone, Serialize)]
pub struct DriftAlert {
    pub plan_id: String,
    pub project_id: String,
    pub project_name: String,
    pub component_id: String,
    pub component_name: String,
    pub environment: String,
    pub drift: DriftCounts,
    /// Per-project webhook, when one is configured.
    pub webhook: Option<String>,
}

/// Outbound channel for drift alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn drift_detected(&self, alert: &DriftAlert) -> Result<()>;
}
