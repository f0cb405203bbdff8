//! Plan submission and offline analysis commands.
//!
//! `ph ingest` runs a plan file through the same coordinator as
//! `POST /manual_ingest`. `ph analyze` runs the pure pipeline stages on a
//! plan file without touching the database.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;

use plan_harness_core::drift::{self, DriftCounts};
use plan_harness_core::graph::{self, ResourceGraph};
use plan_harness_core::ingest::{ComponentRef, IngestOutcome, IngestRequest};
use plan_harness_core::linker::{ComponentNameIndex, HeuristicLinker};
use plan_harness_core::models::CloudPlatform;
use plan_harness_core::normalize::normalize_plan;
use plan_harness_core::IngestError;

use crate::auth::Caller;
use crate::config::Config;
use crate::services::Services;

/// Validate and ingest a request body on behalf of `caller`.
pub async fn submit(
    services: &Services,
    body: Value,
    caller: &Caller,
) -> Result<IngestOutcome, IngestError> {
    let request = IngestRequest::from_json(body)?;
    services
        .ingestor()
        .ingest(request, caller.project_id(), Utc::now())
        .await
}

fn read_plan(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse plan JSON: {}", path.display()))
}

pub struct IngestArgs<'a> {
    pub file: &'a Path,
    pub component: ComponentRef,
    /// Resolve names within this project, as a project token would.
    pub project: Option<String>,
    pub environment: String,
    pub branch: Option<String>,
}

pub async fn run_ingest(config: &Config, args: IngestArgs<'_>) -> Result<()> {
    let plan = read_plan(args.file)?;
    let services = Services::open(config).await?;

    let mut request = IngestRequest::new(args.component, args.environment, plan);
    request.branch = args.branch;

    let outcome = services
        .ingestor()
        .ingest(request, args.project.as_deref(), Utc::now())
        .await;
    services.close().await;
    let outcome = outcome?;

    println!("Plan uploaded successfully.");
    println!("  id:          {}", outcome.plan_id);
    println!("  component:   {}", outcome.component_id);
    println!("  environment: {}", outcome.environment);
    println!("  timestamp:   {}", outcome.timestamp);
    println!("  drift:       {}", format_drift(&outcome.drift));
    println!("  artifact:    {}", outcome.artifact_location);
    if outcome.pending_approval {
        println!("  status:      pending approval (environment not registered)");
    }
    if !outcome.dependencies.is_empty() {
        let deps: Vec<&str> = outcome
            .dependencies
            .iter()
            .map(|d| d.component_id.as_str())
            .collect();
        println!("  links:       {}", deps.join(", "));
    }
    if outcome.notified {
        println!("  alert:       drift notification sent");
    }
    Ok(())
}

/// Terraform-style one-line summary.
pub fn format_drift(drift: &DriftCounts) -> String {
    let (add, change, destroy) = crate::notify::terraform_counts(drift);
    let mut out = format!("+{} ~{} -{}", add, change, destroy);
    if drift.import > 0 {
        out.push_str(&format!(" (import {})", drift.import));
    }
    out
}

/// Result of `ph analyze`.
#[derive(Debug, Serialize)]
pub struct Analysis {
    pub terraform_version: Option<String>,
    pub timestamp: String,
    pub cloud_platform: CloudPlatform,
    pub providers: BTreeSet<String>,
    pub drift: DriftCounts,
    pub has_drift: bool,
    pub resource_graph: ResourceGraph,
    /// Names of the supplied components the plan appears to depend on.
    pub links: BTreeSet<String>,
}

pub fn analyze(plan: Value, components: &[String], max_depth: usize) -> Result<Analysis> {
    let doc = normalize_plan(plan, Utc::now())?;
    let drift = drift::summarize(&doc.resource_changes());

    let resource_graph = graph::build_graph(doc.plan(), max_depth).unwrap_or_else(|e| {
        tracing::warn!("resource graph skipped: {}", e);
        ResourceGraph::default()
    });

    // Names stand in for ids so the output names what matched.
    let mut index = ComponentNameIndex::new();
    for name in components {
        index.insert(name, name);
    }
    let links = HeuristicLinker::new(&index, None, max_depth)
        .link(doc.plan())
        .unwrap_or_else(|e| {
            tracing::warn!("component links skipped: {}", e);
            Default::default()
        })
        .into_iter()
        .map(|l| l.component_id)
        .collect();

    Ok(Analysis {
        terraform_version: doc.terraform_version().map(str::to_string),
        timestamp: doc.timestamp().to_string(),
        cloud_platform: doc.cloud_platform(),
        providers: doc.providers().clone(),
        has_drift: drift.has_drift(),
        drift,
        resource_graph,
        links,
    })
}

pub fn run_analyze(file: &Path, components: &[String], max_depth: usize, json: bool) -> Result<()> {
    let analysis = analyze(read_plan(file)?, components, max_depth)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }

    println!("Plan: {}", file.display());
    println!(
        "  terraform:  {}",
        analysis.terraform_version.as_deref().unwrap_or("unknown")
    );
    println!("  timestamp:  {}", analysis.timestamp);
    println!("  platform:   {}", analysis.cloud_platform);
    if !analysis.providers.is_empty() {
        let providers: Vec<&str> = analysis.providers.iter().map(String::as_str).collect();
        println!("  providers:  {}", providers.join(", "));
    }
    println!(
        "  drift:      {}{}",
        format_drift(&analysis.drift),
        if analysis.has_drift { "" } else { " (in sync)" }
    );
    println!(
        "  graph:      {} resources, {} edges",
        analysis.resource_graph.nodes.len(),
        analysis.resource_graph.edges.len()
    );
    if !analysis.links.is_empty() {
        let links: Vec<&str> = analysis.links.iter().map(String::as_str).collect();
        println!("  links:      {}", links.join(", "));
    }
    Ok(())
}
