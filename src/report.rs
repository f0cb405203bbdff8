//! Drift status report: one row per environment and component.

use anyhow::{bail, Result};
use serde::Serialize;

use plan_harness_core::models::StalenessKey;
use plan_harness_core::store::{PlanIndex, Registry};

use crate::config::Config;
use crate::ingest::format_drift;
use crate::services::Services;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Synced,
    Drifted,
    #[serde(rename = "No State")]
    NoState,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Synced => "Synced",
            Status::Drifted => "Drifted",
            Status::NoState => "No State",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub environment: String,
    pub component: String,
    pub status: Status,
    pub changes: Option<String>,
    pub last_run: Option<String>,
    pub plan_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub project_id: String,
    pub project_name: String,
    pub rows: Vec<ReportRow>,
}

impl Report {
    pub fn count(&self, status: Status) -> usize {
        self.rows.iter().filter(|r| r.status == status).count()
    }
}

/// Status of the latest accepted plan for every registered environment and
/// component. Environments a component is excluded from get no row.
pub async fn build_report(services: &Services, project_id: &str) -> Result<Report> {
    let Some(project) = services.store.get_project(project_id).await? else {
        bail!("project not found: {}", project_id);
    };
    let components = services.store.list_components(project_id).await?;

    let mut rows = Vec::new();
    for environment in &project.environments {
        for component in &components {
            if component.is_excluded(environment) {
                continue;
            }
            let latest = services
                .store
                .latest_accepted(&StalenessKey::new(&component.id, environment))
                .await?;
            let row = match latest {
                None => ReportRow {
                    environment: environment.clone(),
                    component: component.name.clone(),
                    status: Status::NoState,
                    changes: None,
                    last_run: None,
                    plan_id: None,
                },
                Some(plan) => ReportRow {
                    environment: environment.clone(),
                    component: component.name.clone(),
                    status: if plan.has_drift() {
                        Status::Drifted
                    } else {
                        Status::Synced
                    },
                    changes: Some(format_drift(&plan.drift)),
                    last_run: Some(plan.timestamp),
                    plan_id: Some(plan.id),
                },
            };
            rows.push(row);
        }
    }

    Ok(Report {
        project_id: project.id,
        project_name: project.name,
        rows,
    })
}

pub fn render_text(report: &Report) -> String {
    let mut out = format!("Drift report: {}\n", report.project_name);
    let width = report
        .rows
        .iter()
        .map(|r| r.component.len())
        .max()
        .unwrap_or(0)
        .max("COMPONENT".len());
    out.push_str(&format!(
        "{:<12} {:<width$} {:<9} {:<16} {}\n",
        "ENVIRONMENT", "COMPONENT", "STATUS", "CHANGES", "LAST RUN"
    ));
    for row in &report.rows {
        out.push_str(&format!(
            "{:<12} {:<width$} {:<9} {:<16} {}\n",
            row.environment,
            row.component,
            row.status.as_str(),
            row.changes.as_deref().unwrap_or("-"),
            row.last_run.as_deref().unwrap_or("-"),
        ));
    }
    out.push_str(&format!(
        "{} synced, {} drifted, {} without state\n",
        report.count(Status::Synced),
        report.count(Status::Drifted),
        report.count(Status::NoState)
    ));
    out
}

pub async fn run_report(config: &Config, project_id: &str, json: bool) -> Result<()> {
    let services = Services::open(config).await?;
    let report = build_report(&services, project_id).await;
    services.close().await;
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_text(&report));
    }
    Ok(())
}
