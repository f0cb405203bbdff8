//! Project, component and token administration.
//!
//! Deleting a component or an environment cascades to every plan stored
//! under it, index documents first and then artifacts.

use anyhow::{bail, Result};

use plan_harness_core::models::{Component, Project};
use plan_harness_core::store::{PlanIndex, Registry};

use crate::auth;
use crate::config::Config;
use crate::plans::remove_artifacts;
use crate::services::Services;
use crate::sqlite_store::TokenRecord;

pub const DEFAULT_ENVIRONMENTS: &[&str] = &["dev"];

async fn require_project(services: &Services, project_id: &str) -> Result<Project> {
    match services.store.get_project(project_id).await? {
        Some(p) => Ok(p),
        None => bail!("project not found: {}", project_id),
    }
}

pub async fn create_project(
    services: &Services,
    name: &str,
    description: Option<&str>,
    environments: &[String],
    slack_webhook: Option<&str>,
) -> Result<Project> {
    if name.trim().is_empty() {
        bail!("project name must not be empty");
    }
    if let Some(url) = slack_webhook {
        check_webhook(url)?;
    }
    let environments: Vec<String> = if environments.is_empty() {
        DEFAULT_ENVIRONMENTS.iter().map(|e| e.to_string()).collect()
    } else {
        environments.to_vec()
    };
    let project = services
        .store
        .create_project(name, description, &environments, slack_webhook)
        .await?;
    tracing::info!(project = %project.id, name, "project created");
    Ok(project)
}

fn check_webhook(url: &str) -> Result<()> {
    if !url.starts_with("https://") && !url.starts_with("http://") {
        bail!("slack webhook must be an http(s) URL: {}", url);
    }
    Ok(())
}

/// Update a project's description and notification webhook.
/// `Some("")` clears the webhook.
pub async fn update_project(
    services: &Services,
    project_id: &str,
    description: Option<&str>,
    slack_webhook: Option<&str>,
) -> Result<Project> {
    if description.is_none() && slack_webhook.is_none() {
        bail!("nothing to update");
    }
    if let Some(url) = slack_webhook.filter(|u| !u.is_empty()) {
        check_webhook(url)?;
    }
    if !services
        .store
        .update_project(project_id, description, slack_webhook)
        .await?
    {
        bail!("project not found: {}", project_id);
    }
    tracing::info!(project = project_id, "project updated");
    require_project(services, project_id).await
}

pub async fn add_environment(services: &Services, project_id: &str, environment: &str) -> Result<Project> {
    let mut project = require_project(services, project_id).await?;
    if environment.trim().is_empty() {
        bail!("environment name must not be empty");
    }
    if project.has_environment(environment) {
        bail!("environment '{}' already exists in {}", environment, project.name);
    }
    project.environments.push(environment.to_string());
    services
        .store
        .set_environments(project_id, &project.environments)
        .await?;
    Ok(project)
}

/// Remove an environment and every plan submitted for it.
/// Returns the updated project and the number of plans removed.
pub async fn delete_environment(
    services: &Services,
    project_id: &str,
    environment: &str,
) -> Result<(Project, usize)> {
    let mut project = require_project(services, project_id).await?;
    // Pending plans for an unregistered environment are removable too.
    project.environments.retain(|e| e != environment);
    services
        .store
        .set_environments(project_id, &project.environments)
        .await?;

    let removed = services
        .store
        .delete_environment_plans(project_id, environment)
        .await?;
    remove_artifacts(&services.artifacts, &removed).await;
    tracing::info!(project = project_id, environment, plans = removed.len(), "environment deleted");
    Ok((project, removed.len()))
}

pub async fn create_component(services: &Services, project_id: &str, name: &str) -> Result<Component> {
    require_project(services, project_id).await?;
    if name.trim().is_empty() {
        bail!("component name must not be empty");
    }
    if !services.store.find_components(project_id, name).await?.is_empty() {
        tracing::warn!(
            project = project_id,
            name,
            "component name already used; submissions by name will be ambiguous"
        );
    }
    services.store.create_component(project_id, name).await
}

/// Rename a component and/or replace the environments it is excluded from.
pub async fn update_component(
    services: &Services,
    component_id: &str,
    name: Option<&str>,
    excluded_environments: Option<&[String]>,
) -> Result<Component> {
    if name.is_none() && excluded_environments.is_none() {
        bail!("nothing to update");
    }
    let Some(component) = services.store.get_component(component_id).await? else {
        bail!("component not found: {}", component_id);
    };
    if let Some(name) = name {
        if name.trim().is_empty() {
            bail!("component name must not be empty");
        }
        let clash = services
            .store
            .find_components(&component.project_id, name)
            .await?
            .iter()
            .any(|c| c.id != component.id);
        if clash {
            tracing::warn!(
                project = %component.project_id,
                name,
                "component name already used; submissions by name will be ambiguous"
            );
        }
    }
    let excluded = excluded_environments.map(|envs| {
        let mut envs = envs.to_vec();
        envs.sort();
        envs.dedup();
        envs
    });
    services
        .store
        .update_component(component_id, name, excluded.as_deref())
        .await?;
    tracing::info!(component = component_id, "component updated");
    match services.store.get_component(component_id).await? {
        Some(c) => Ok(c),
        None => bail!("component not found: {}", component_id),
    }
}

/// Remove a component and all of its plans.
pub async fn delete_component(services: &Services, component_id: &str) -> Result<(Component, usize)> {
    let Some(component) = services.store.get_component(component_id).await? else {
        bail!("component not found: {}", component_id);
    };
    let removed = services.store.delete_component_plans(component_id).await?;
    remove_artifacts(&services.artifacts, &removed).await;
    services.store.delete_component_record(component_id).await?;
    tracing::info!(component = component_id, plans = removed.len(), "component deleted");
    Ok((component, removed.len()))
}

/// Issue a token; the returned string is the only copy of the secret.
pub async fn create_token(services: &Services, project_id: &str, name: &str) -> Result<(TokenRecord, String)> {
    require_project(services, project_id).await?;
    let issued = auth::issue_token(project_id);
    let record = services
        .store
        .insert_token(project_id, name, &issued.hash, &issued.prefix)
        .await?;
    Ok((record, issued.token))
}

// ============ CLI ============

pub async fn run_project_create(
    config: &Config,
    name: &str,
    description: Option<&str>,
    environments: &[String],
    slack_webhook: Option<&str>,
) -> Result<()> {
    let services = Services::open(config).await?;
    let project = create_project(&services, name, description, environments, slack_webhook).await;
    services.close().await;
    let project = project?;
    println!("Created project {} ({})", project.name, project.id);
    println!("  environments: {}", project.environments.join(", "));
    Ok(())
}

pub async fn run_project_update(
    config: &Config,
    project_id: &str,
    description: Option<&str>,
    slack_webhook: Option<&str>,
) -> Result<()> {
    let services = Services::open(config).await?;
    let project = update_project(&services, project_id, description, slack_webhook).await;
    services.close().await;
    let project = project?;
    println!("Updated project {} ({})", project.name, project.id);
    println!("  description:   {}", project.description.as_deref().unwrap_or("-"));
    println!("  slack webhook: {}", if project.slack_webhook.is_some() { "set" } else { "none" });
    Ok(())
}

pub async fn run_project_list(config: &Config) -> Result<()> {
    let services = Services::open(config).await?;
    let projects = services.store.list_projects().await;
    services.close().await;
    let projects = projects?;
    if projects.is_empty() {
        println!("No projects.");
    }
    for p in projects {
        println!(
            "{}  {}  [{}]  platform={}",
            p.id,
            p.name,
            p.environments.join(", "),
            p.cloud_platform
        );
    }
    Ok(())
}

pub async fn run_add_environment(config: &Config, project_id: &str, environment: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let project = add_environment(&services, project_id, environment).await;
    services.close().await;
    let project = project?;
    println!("Environments of {}: {}", project.name, project.environments.join(", "));
    Ok(())
}

pub async fn run_delete_environment(config: &Config, project_id: &str, environment: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let result = delete_environment(&services, project_id, environment).await;
    services.close().await;
    let (project, plans) = result?;
    println!(
        "Deleted environment {} from {} ({} plans removed).",
        environment, project.name, plans
    );
    Ok(())
}

pub async fn run_component_create(config: &Config, project_id: &str, name: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let component = create_component(&services, project_id, name).await;
    services.close().await;
    let component = component?;
    println!("Created component {} ({})", component.name, component.id);
    Ok(())
}

pub async fn run_component_list(config: &Config, project_id: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let components = services.store.list_components(project_id).await;
    services.close().await;
    let components = components?;
    if components.is_empty() {
        println!("No components.");
    }
    for c in components {
        if c.excluded_environments.is_empty() {
            println!("{}  {}", c.id, c.name);
        } else {
            println!("{}  {}  excludes [{}]", c.id, c.name, c.excluded_environments.join(", "));
        }
    }
    Ok(())
}

pub async fn run_component_update(
    config: &Config,
    component_id: &str,
    name: Option<&str>,
    excluded_environments: Option<&[String]>,
) -> Result<()> {
    let services = Services::open(config).await?;
    let component = update_component(&services, component_id, name, excluded_environments).await;
    services.close().await;
    let component = component?;
    println!("Updated component {} ({})", component.name, component.id);
    if !component.excluded_environments.is_empty() {
        println!("  excluded: {}", component.excluded_environments.join(", "));
    }
    Ok(())
}

pub async fn run_component_delete(config: &Config, component_id: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let result = delete_component(&services, component_id).await;
    services.close().await;
    let (component, plans) = result?;
    println!("Deleted component {} ({} plans removed).", component.name, plans);
    Ok(())
}

pub async fn run_token_create(config: &Config, project_id: &str, name: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let result = create_token(&services, project_id, name).await;
    services.close().await;
    let (record, token) = result?;
    println!("{}", token);
    eprintln!(
        "Token {} created. Store it securely; it will not be shown again.",
        record.id
    );
    Ok(())
}

pub async fn run_token_list(config: &Config, project_id: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let tokens = services.store.list_tokens(project_id).await;
    services.close().await;
    let tokens = tokens?;
    if tokens.is_empty() {
        println!("No tokens.");
    }
    for t in tokens {
        println!("{}  {}  {}  {}", t.id, t.name, t.prefix, t.created_at);
    }
    Ok(())
}

pub async fn run_token_revoke(config: &Config, project_id: &str, token_id: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let revoked = services.store.delete_token(project_id, token_id).await;
    services.close().await;
    if !revoked? {
        bail!("token not found: {}", token_id);
    }
    println!("Revoked token {}.", token_id);
    Ok(())
}
