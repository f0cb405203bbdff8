//! Ingestion coordinator.
//!
//! [`Ingestor`] runs one plan submission through the pipeline against the
//! store traits:
//!
//! 1. Resolve the component (by id, or by name within the caller's project)
//! 2. Check the caller's project owns it
//! 3. Normalize the plan
//! 4. Reject a cloud platform that contradicts the project's
//! 5. Admit against the staleness guard (skipped for pending environments)
//! 6. Build the resource graph and component links, degrading to empty on failure
//! 7. Project and size-check the document
//! 8. Upload the artifact, then write the document
//! 9. Fix the project's platform if it was unknown
//! 10. Alert on a clean → drifted transition
//!
//! Steps 1–7 perform no writes. A failed artifact upload leaves no document.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::drift::{self, DriftCounts};
use crate::error::{ConflictError, IngestError};
use crate::graph::{self, ResourceGraph, DEFAULT_MAX_DEPTH};
use crate::linker::{ComponentNameIndex, DependencyLink, HeuristicLinker};
use crate::models::{Component, Project, StalenessKey};
use crate::normalize::{normalize_plan, NormalizedPlanDocument};
use crate::probe;
use crate::projection::{self, PlanIdentity};
use crate::staleness::StalenessGuard;
use crate::store::{ArtifactStore, DriftAlert, Notifier, PlanIndex, Registry};

/// Default index item limit, matching common document-store item caps.
pub const DEFAULT_MAX_ITEM_BYTES: usize = 2 * 1024 * 1024;

/// How the submission names its component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentRef {
    Id(String),
    Name(String),
}

/// A validated ingestion request.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub component: ComponentRef,
    pub environment: String,
    pub branch: Option<String>,
    pub terraform_plan: Value,
}

impl IngestRequest {
    pub fn new(component: ComponentRef, environment: impl Into<String>, terraform_plan: Value) -> Self {
        Self {
            component,
            environment: environment.into(),
            branch: None,
            terraform_plan,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Validate a request body.
    ///
    /// `component_id` wins over `component_name` when both are given. The
    /// plan itself is only checked for presence here; its shape is checked
    /// by normalization.
    pub fn from_json(mut body: Value) -> Result<Self, IngestError> {
        if !body.is_object() {
            return Err(IngestError::Validation(format!(
                "request body must be a JSON object, found {}",
                probe::kind(&body)
            )));
        }

        let component = if let Some(id) = probe::non_empty_string(&body, "component_id") {
            ComponentRef::Id(id.to_string())
        } else if let Some(name) = probe::non_empty_string(&body, "component_name") {
            ComponentRef::Name(name.to_string())
        } else {
            return Err(missing_fields());
        };

        let environment = probe::non_empty_string(&body, "environment")
            .ok_or_else(missing_fields)?
            .to_string();
        let branch = probe::non_empty_string(&body, "branch").map(str::to_string);

        let terraform_plan = match body.get_mut("terraform_plan").map(Value::take) {
            Some(Value::Null) | None => return Err(missing_fields()),
            Some(Value::Object(map)) if map.is_empty() => return Err(missing_fields()),
            Some(plan) => plan,
        };

        Ok(Self {
            component,
            environment,
            branch,
            terraform_plan,
        })
    }
}

fn missing_fields() -> IngestError {
    IngestError::Validation(
        "missing required fields: component_id (or component_name), environment, terraform_plan"
            .to_string(),
    )
}

/// Tunables for [`Ingestor`].
#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    pub max_item_bytes: usize,
    pub max_depth: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            max_item_bytes: DEFAULT_MAX_ITEM_BYTES,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Result of an accepted submission.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub plan_id: String,
    pub project_id: String,
    pub component_id: String,
    pub environment: String,
    pub timestamp: String,
    pub pending_approval: bool,
    pub drift: DriftCounts,
    pub dependencies: BTreeSet<DependencyLink>,
    pub artifact_location: String,
    pub notified: bool,
}

/// Runs submissions against a set of stores.
pub struct Ingestor<'a> {
    plans: &'a dyn PlanIndex,
    artifacts: &'a dyn ArtifactStore,
    registry: &'a dyn Registry,
    notifier: Option<&'a dyn Notifier>,
    settings: IngestSettings,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        plans: &'a dyn PlanIndex,
        artifacts: &'a dyn ArtifactStore,
        registry: &'a dyn Registry,
    ) -> Self {
        Self {
            plans,
            artifacts,
            registry,
            notifier: None,
            settings: IngestSettings::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: &'a dyn Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_settings(mut self, settings: IngestSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Ingest one plan.
    ///
    /// `caller_project` is the project a token was issued for. `None` means
    /// a trusted internal caller, which may address any component by id but
    /// cannot look components up by name.
    pub async fn ingest(
        &self,
        request: IngestRequest,
        caller_project: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, IngestError> {
        let component = self.resolve_component(&request.component, caller_project).await?;

        if let Some(owner) = caller_project {
            if component.project_id != owner {
                return Err(IngestError::Forbidden(format!(
                    "token is not valid for component {}",
                    component.id
                )));
            }
        }

        let project = self
            .registry
            .get_project(&component.project_id)
            .await?
            .ok_or_else(|| {
                IngestError::NotFound(format!("project not found: {}", component.project_id))
            })?;

        let doc = normalize_plan(request.terraform_plan, now)?;

        let plan_platform = doc.cloud_platform();
        if project.cloud_platform.is_known()
            && plan_platform.is_known()
            && project.cloud_platform != plan_platform
        {
            return Err(ConflictError::PlatformMismatch {
                project: project.cloud_platform,
                plan: plan_platform,
            }
            .into());
        }

        let pending = !project.has_environment(&request.environment);
        let previous = if pending {
            tracing::info!(
                project = %project.id,
                environment = %request.environment,
                "environment not registered, storing plan as pending approval"
            );
            None
        } else {
            let key = StalenessKey::new(&component.id, &request.environment);
            StalenessGuard::new(self.plans)
                .admit(&key, doc.timestamp())
                .await?
        };

        let graph = self.resource_graph(&doc);
        let dependencies = self.dependencies(&doc, &component).await;

        let identity = PlanIdentity {
            plan_id: uuid::Uuid::new_v4().to_string(),
            project_id: project.id.clone(),
            project_name: project.name.clone(),
            component_id: component.id.clone(),
            component_name: component.name.clone(),
            environment: request.environment,
            branch: request.branch,
            pending_approval: pending,
        };
        let mut projection = projection::project(identity, &doc, graph, dependencies)
            .map_err(|e| IngestError::Storage(e.into()))?;

        let size = projection
            .document
            .encoded_len()
            .map_err(|e| IngestError::Storage(e.into()))?;
        if size > self.settings.max_item_bytes {
            return Err(IngestError::Capacity {
                size,
                limit: self.settings.max_item_bytes,
            });
        }

        let key = projection.key.to_string();
        let location = self.artifacts.put(&key, &projection.artifact).await?;
        projection.document.artifact_location = Some(location.clone());
        self.plans.put_plan(&projection.document).await?;

        let document = projection.document;
        tracing::info!(
            plan_id = %document.id,
            component = %document.component_id,
            environment = %document.environment,
            drift = document.drift.drift_total(),
            "plan ingested"
        );

        if !project.cloud_platform.is_known() && plan_platform.is_known() {
            if let Err(e) = self
                .registry
                .set_project_platform(&project.id, plan_platform)
                .await
            {
                tracing::warn!(project = %project.id, "failed to record cloud platform: {:#}", e);
            }
        }

        let notified = !pending
            && drift::should_notify(previous.as_ref().map(|p| &p.drift), &document.drift)
            && self.notify(&project, &document).await;

        Ok(IngestOutcome {
            plan_id: document.id,
            project_id: document.project_id,
            component_id: document.component_id,
            environment: document.environment,
            timestamp: document.timestamp,
            pending_approval: pending,
            drift: document.drift,
            dependencies: document.dependencies,
            artifact_location: location,
            notified,
        })
    }

    async fn resolve_component(
        &self,
        component: &ComponentRef,
        caller_project: Option<&str>,
    ) -> Result<Component, IngestError> {
        match component {
            ComponentRef::Id(id) => self
                .registry
                .get_component(id)
                .await?
                .ok_or_else(|| IngestError::NotFound(format!("component not found: {}", id))),
            ComponentRef::Name(name) => {
                let project_id = caller_project.ok_or_else(|| {
                    IngestError::Validation(
                        "component_name lookup requires a project token".to_string(),
                    )
                })?;
                let mut matches = self.registry.find_components(project_id, name).await?;
                match matches.len() {
                    0 => Err(IngestError::NotFound(format!(
                        "component '{}' not found in project {}",
                        name, project_id
                    ))),
                    1 => Ok(matches.remove(0)),
                    n => Err(ConflictError::AmbiguousComponent {
                        name: name.clone(),
                        matches: n,
                    }
                    .into()),
                }
            }
        }
    }

    fn resource_graph(&self, doc: &NormalizedPlanDocument) -> ResourceGraph {
        match graph::build_graph(doc.plan(), self.settings.max_depth) {
            Ok(graph) => graph,
            Err(e) => {
                tracing::warn!("resource graph skipped: {}", e);
                ResourceGraph::default()
            }
        }
    }

    async fn dependencies(
        &self,
        doc: &NormalizedPlanDocument,
        component: &Component,
    ) -> BTreeSet<DependencyLink> {
        let components = match self.registry.list_components(&component.project_id).await {
            Ok(components) => components,
            Err(e) => {
                tracing::warn!("component links skipped, cannot list components: {:#}", e);
                return BTreeSet::new();
            }
        };
        let index = ComponentNameIndex::from_components(&components);
        HeuristicLinker::new(&index, Some(component.id.as_str()), self.settings.max_depth)
            .link(doc.plan())
            .unwrap_or_else(|e| {
                tracing::warn!("component links skipped: {}", e);
                BTreeSet::new()
            })
    }

    /// Returns whether an alert was delivered.
    async fn notify(&self, project: &Project, document: &projection::PlanDocument) -> bool {
        let Some(notifier) = self.notifier else {
            return false;
        };
        let alert = DriftAlert {
            plan_id: document.id.clone(),
            project_id: project.id.clone(),
            project_name: project.name.clone(),
            component_id: document.component_id.clone(),
            component_name: document.component_name.clone(),
            environment: document.environment.clone(),
            drift: document.drift,
            webhook: project.slack_webhook.clone(),
        };
        match notifier.drift_detected(&alert).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(plan_id = %document.id, "drift notification failed: {:#}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CloudPlatform;
    use crate::store::memory::{InMemoryArtifacts, InMemoryStore, RecordingNotifier};
    use crate::store::PlanFilter;
    use serde_json::json;

    fn store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.insert_project(Project {
            id: "proj".into(),
            name: "Platform".into(),
            description: None,
            cloud_platform: CloudPlatform::Unknown,
            environments: vec!["dev".into(), "prod".into()],
            slack_webhook: Some("https://hooks.example/x".into()),
        });
        for (id, name) in [("comp-app", "app"), ("comp-db-id", "database")] {
            store.insert_component(Component {
                id: id.into(),
                name: name.into(),
                project_id: "proj".into(),
                excluded_environments: Vec::new(),
            });
        }
        store
    }

    fn plan(timestamp: &str, actions: &[&str]) -> Value {
        json!({
            "format_version": "1.2",
            "terraform_version": "1.6.0",
            "timestamp": timestamp,
            "variables": {"db_host": {"value": "database.internal"}},
            "resource_changes": [{
                "address": "azurerm_resource_group.rg",
                "type": "azurerm_resource_group",
                "name": "rg",
                "change": {"actions": actions}
            }],
            "configuration": {
                "provider_config": {"azurerm": {}},
                "root_module": {
                    "resources": [{
                        "address": "azurerm_resource_group.rg",
                        "type": "azurerm_resource_group",
                        "name": "rg"
                    }]
                }
            }
        })
    }

    fn request(environment: &str, body: Value) -> IngestRequest {
        IngestRequest::new(ComponentRef::Id("comp-app".into()), environment, body)
    }

    #[test]
    fn test_request_validation() {
        let ok = IngestRequest::from_json(json!({
            "component_name": "app",
            "environment": "dev",
            "branch": "main",
            "terraform_plan": {"format_version": "1.2"}
        }))
        .unwrap();
        assert_eq!(ok.component, ComponentRef::Name("app".into()));
        assert_eq!(ok.branch.as_deref(), Some("main"));

        for body in [
            json!({"environment": "dev", "terraform_plan": {}}),
            json!({"component_id": "c", "terraform_plan": {}}),
            json!({"component_id": "c", "environment": "dev"}),
            json!({"component_id": "c", "environment": "dev", "terraform_plan": {}}),
            json!({"component_id": "c", "environment": "dev", "terraform_plan": null}),
            json!({"component_id": "", "environment": "dev", "terraform_plan": {}}),
            json!([1, 2]),
        ] {
            let err = IngestRequest::from_json(body).unwrap_err();
            assert_eq!(err.code(), "bad_request");
        }
    }

    #[tokio::test]
    async fn test_ingest_persists_both_forms() {
        let store = store();
        let artifacts = InMemoryArtifacts::new();
        let ingestor = Ingestor::new(&store, &artifacts, &store);

        let outcome = ingestor
            .ingest(
                request("dev", plan("2024-01-01T00:00:00Z", &["create"])).with_branch("main"),
                None,
                Utc::now(),
            )
            .await
            .unwrap();

        assert!(!outcome.pending_approval);
        assert_eq!(outcome.drift.create, 1);
        assert_eq!(
            artifacts.keys(),
            vec![format!("proj/comp-app/dev/{}.json", outcome.plan_id)]
        );

        let doc = store.get_plan(&outcome.plan_id).await.unwrap().unwrap();
        assert_eq!(doc.branch.as_deref(), Some("main"));
        assert_eq!(doc.artifact_location.as_deref(), Some(outcome.artifact_location.as_str()));
        assert_eq!(doc.resource_graph.nodes.len(), 1);
        assert!(doc
            .dependencies
            .iter()
            .any(|d| d.component_id == "comp-db-id"));

        let project = store.get_project("proj").await.unwrap().unwrap();
        assert_eq!(project.cloud_platform, CloudPlatform::Azure);
    }

    #[tokio::test]
    async fn test_stale_plan_rejected_without_writes() {
        let store = store();
        let artifacts = InMemoryArtifacts::new();
        let ingestor = Ingestor::new(&store, &artifacts, &store);
        let ts = "2024-02-01T00:00:00Z";

        ingestor
            .ingest(request("prod", plan(ts, &["no-op"])), None, Utc::now())
            .await
            .unwrap();
        let err = ingestor
            .ingest(request("prod", plan(ts, &["no-op"])), None, Utc::now())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "stale_plan");
        assert_eq!(store.plan_count(), 1);
        assert_eq!(artifacts.keys().len(), 1);
    }

    #[tokio::test]
    async fn test_platform_mismatch() {
        let store = store();
        store
            .set_project_platform("proj", CloudPlatform::Aws)
            .await
            .unwrap();
        let artifacts = InMemoryArtifacts::new();
        let ingestor = Ingestor::new(&store, &artifacts, &store);

        let err = ingestor
            .ingest(request("dev", plan("2024-01-01T00:00:00Z", &["create"])), None, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "platform_mismatch");
        assert_eq!(store.plan_count(), 0);
    }

    #[tokio::test]
    async fn test_component_name_resolution() {
        let store = store();
        store.insert_component(Component {
            id: "comp-app-2".into(),
            name: "app".into(),
            project_id: "proj".into(),
            excluded_environments: Vec::new(),
        });
        let artifacts = InMemoryArtifacts::new();
        let ingestor = Ingestor::new(&store, &artifacts, &store);
        let by_name = |name: &str| {
            IngestRequest::new(
                ComponentRef::Name(name.into()),
                "dev",
                plan("2024-01-01T00:00:00Z", &["no-op"]),
            )
        };

        let err = ingestor
            .ingest(by_name("app"), Some("proj"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::Conflict(ConflictError::AmbiguousComponent { matches: 2, .. })
        ));

        let err = ingestor
            .ingest(by_name("missing"), Some("proj"), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");

        let err = ingestor
            .ingest(by_name("database"), None, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "bad_request");

        let outcome = ingestor
            .ingest(by_name("database"), Some("proj"), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.component_id, "comp-db-id");
    }

    #[tokio::test]
    async fn test_token_for_other_project_forbidden() {
        let store = store();
        let artifacts = InMemoryArtifacts::new();
        let ingestor = Ingestor::new(&store, &artifacts, &store);
        let err = ingestor
            .ingest(
                request("dev", plan("2024-01-01T00:00:00Z", &["no-op"])),
                Some("other-project"),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }

    #[tokio::test]
    async fn test_oversized_projection_rejected_before_writes() {
        let store = store();
        let artifacts = InMemoryArtifacts::new();
        let ingestor = Ingestor::new(&store, &artifacts, &store).with_settings(IngestSettings {
            max_item_bytes: 64,
            ..Default::default()
        });
        let err = ingestor
            .ingest(request("dev", plan("2024-01-01T00:00:00Z", &["create"])), None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Capacity { limit: 64, .. }));
        assert!(artifacts.keys().is_empty());
        assert_eq!(store.plan_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_no_document() {
        let store = store();
        let artifacts = InMemoryArtifacts::failing();
        let ingestor = Ingestor::new(&store, &artifacts, &store);
        let err = ingestor
            .ingest(request("dev", plan("2024-01-01T00:00:00Z", &["create"])), None, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "internal");
        assert_eq!(store.plan_count(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_environment_is_pending() {
        let store = store();
        let artifacts = InMemoryArtifacts::new();
        let ingestor = Ingestor::new(&store, &artifacts, &store);
        let ts = "2024-01-01T00:00:00Z";

        let first = ingestor
            .ingest(request("qa", plan(ts, &["no-op"])), None, Utc::now())
            .await
            .unwrap();
        assert!(first.pending_approval);
        // Pending plans are not ordered, so a repeat is accepted.
        let second = ingestor
            .ingest(request("qa", plan(ts, &["no-op"])), None, Utc::now())
            .await
            .unwrap();
        assert!(second.pending_approval);

        let pending = store
            .list_plans(&PlanFilter {
                environment: Some("qa".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn test_notifies_on_clean_to_drifted() {
        let store = store();
        let artifacts = InMemoryArtifacts::new();
        let notifier = RecordingNotifier::new();
        let ingestor = Ingestor::new(&store, &artifacts, &store).with_notifier(&notifier);

        let first = ingestor
            .ingest(request("prod", plan("2024-01-01T00:00:00Z", &["create"])), None, Utc::now())
            .await
            .unwrap();
        assert!(!first.notified);

        ingestor
            .ingest(request("prod", plan("2024-01-02T00:00:00Z", &["no-op"])), None, Utc::now())
            .await
            .unwrap();
        let drifted = ingestor
            .ingest(request("prod", plan("2024-01-03T00:00:00Z", &["update"])), None, Utc::now())
            .await
            .unwrap();
        assert!(drifted.notified);
        let again = ingestor
            .ingest(request("prod", plan("2024-01-04T00:00:00Z", &["update"])), None, Utc::now())
            .await
            .unwrap();
        assert!(!again.notified);

        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].plan_id, drifted.plan_id);
        assert_eq!(alerts[0].webhook.as_deref(), Some("https://hooks.example/x"));
    }
}
