//! Plan retrieval and deletion.
//!
//! Shared by the `ph plans` commands and the `/plans` HTTP routes.
//! Deleting a plan removes both its index document and its artifact.

use anyhow::{bail, Result};

use plan_harness_core::projection::PlanDocument;
use plan_harness_core::store::{ArtifactStore, PlanFilter, PlanIndex};

use crate::config::Config;
use crate::ingest::format_drift;
use crate::services::Services;

pub async fn list_plans(services: &Services, mut filter: PlanFilter) -> Result<Vec<PlanDocument>> {
    let max = services.config.ingest.list_limit;
    filter.limit = Some(filter.limit.map_or(max, |l| l.min(max)));
    services.store.list_plans(&filter).await
}

pub async fn get_plan(services: &Services, id: &str) -> Result<Option<PlanDocument>> {
    services.store.get_plan(id).await
}

/// Delete one plan and its artifact. Returns the removed document.
pub async fn delete_plan(services: &Services, id: &str) -> Result<Option<PlanDocument>> {
    let removed = services.store.delete_plan(id).await?;
    if let Some(doc) = &removed {
        remove_artifacts(&services.artifacts, std::slice::from_ref(doc)).await;
    }
    Ok(removed)
}

/// Best-effort artifact cleanup after index documents are gone.
pub async fn remove_artifacts(artifacts: &dyn ArtifactStore, docs: &[PlanDocument]) -> usize {
    let mut removed = 0;
    for doc in docs {
        match artifacts.delete(&doc.artifact_key).await {
            Ok(true) => removed += 1,
            Ok(false) => tracing::debug!(key = %doc.artifact_key, "artifact already absent"),
            Err(e) => tracing::warn!(key = %doc.artifact_key, "failed to delete artifact: {:#}", e),
        }
    }
    removed
}

pub async fn run_list(config: &Config, filter: PlanFilter) -> Result<()> {
    let services = Services::open(config).await?;
    let plans = list_plans(&services, filter).await;
    services.close().await;
    let plans = plans?;

    if plans.is_empty() {
        println!("No plans found.");
        return Ok(());
    }
    for p in &plans {
        println!(
            "{}  {}  {}/{}  {}{}",
            p.id,
            p.timestamp,
            p.component_name,
            p.environment,
            format_drift(&p.drift),
            if p.pending_approval { "  [pending]" } else { "" }
        );
    }
    Ok(())
}

pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let plan = get_plan(&services, id).await;
    services.close().await;
    match plan? {
        Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
        None => bail!("plan not found: {}", id),
    }
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let removed = delete_plan(&services, id).await;
    services.close().await;
    match removed? {
        Some(doc) => println!("Deleted plan {} ({}/{}).", doc.id, doc.component_name, doc.environment),
        None => bail!("plan not found: {}", id),
    }
    Ok(())
}
