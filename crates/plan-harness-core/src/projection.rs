//! Dual storage representation of an accepted plan.
//!
//! Every plan is persisted twice:
//!
//! 1. **Full artifact**: the raw plan JSON, byte-for-byte as parsed,
//!    written to blob storage under [`ArtifactKey`].
//! 2. **Plan document**: a [`PlanDocument`] for the queryable index. Its
//!    `terraform_plan` is a [`PrunedPlan`]: metadata plus one
//!    [`ResourceChangeSummary`] per change. Full `before`/`after` state is
//!    dropped; it is large and may hold sensitive values.
//!
//! A pruned plan keeps every action list, so [`PrunedPlan::drift`] yields
//! the same [`DriftCounts`] as summarizing the full artifact.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::drift::{self, DriftCounts};
use crate::graph::ResourceGraph;
use crate::linker::DependencyLink;
use crate::models::{CloudPlatform, ResourceChangeSummary};
use crate::normalize::NormalizedPlanDocument;
use crate::probe;

/// Object-store key of a full plan artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKey {
    pub project_id: String,
    pub component_id: String,
    pub environment: String,
    pub plan_id: String,
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}.json",
            self.project_id, self.component_id, self.environment, self.plan_id
        )
    }
}

/// The reduced plan body kept in the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrunedPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub resource_changes: Vec<ResourceChangeSummary>,
}

impl PrunedPlan {
    /// Prune a normalized plan. Metadata fields are kept only if the plan has them.
    pub fn from_normalized(doc: &NormalizedPlanDocument) -> Self {
        let plan = doc.plan();
        let keep = |key: &str| probe::string(plan, key).found().map(str::to_string);
        Self {
            format_version: keep("format_version"),
            terraform_version: keep("terraform_version"),
            timestamp: keep("timestamp"),
            resource_changes: doc.resource_changes(),
        }
    }

    pub fn drift(&self) -> DriftCounts {
        drift::summarize(&self.resource_changes)
    }
}

/// The indexed, queryable record of one plan submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDocument {
    pub id: String,
    pub project_id: String,
    pub project_name: String,
    pub component_id: String,
    pub component_name: String,
    pub environment: String,
    #[serde(default)]
    pub branch: Option<String>,
    pub timestamp: String,
    #[serde(default)]
    pub terraform_version: Option<String>,
    #[serde(default)]
    pub providers: BTreeSet<String>,
    #[serde(default)]
    pub cloud_platform: CloudPlatform,
    #[serde(default)]
    pub dependencies: BTreeSet<DependencyLink>,
    #[serde(default)]
    pub resource_graph: ResourceGraph,
    #[serde(default)]
    pub drift: DriftCounts,
    pub artifact_key: String,
    #[serde(default)]
    pub artifact_location: Option<String>,
    /// Submitted for an environment the project does not list yet.
    #[serde(default)]
    pub pending_approval: bool,
    pub terraform_plan: PrunedPlan,
}

impl PlanDocument {
    /// Size of the document as the index would store it.
    pub fn encoded_len(&self) -> Result<usize, serde_json::Error> {
        serde_json::to_vec(self).map(|v| v.len())
    }

    pub fn has_drift(&self) -> bool {
        self.drift.has_drift()
    }
}

/// Who a plan belongs to and how it was submitted.
#[derive(Debug, Clone)]
pub struct PlanIdentity {
    pub plan_id: String,
    pub project_id: String,
    pub project_name: String,
    pub component_id: String,
    pub component_name: String,
    pub environment: String,
    pub branch: Option<String>,
    pub pending_approval: bool,
}

/// Both persisted forms of a plan.
#[derive(Debug, Clone)]
pub struct Projection {
    pub key: ArtifactKey,
    pub artifact: Vec<u8>,
    pub document: PlanDocument,
}

/// Build the artifact and the index document for a plan.
pub fn project(
    identity: PlanIdentity,
    doc: &NormalizedPlanDocument,
    graph: ResourceGraph,
    dependencies: BTreeSet<DependencyLink>,
) -> Result<Projection, serde_json::Error> {
    let artifact = serde_json::to_vec(doc.plan())?;
    let pruned = PrunedPlan::from_normalized(doc);

    let key = ArtifactKey {
        project_id: identity.project_id.clone(),
        component_id: identity.component_id.clone(),
        environment: identity.environment.clone(),
        plan_id: identity.plan_id.clone(),
    };

    let document = PlanDocument {
        id: identity.plan_id,
        project_id: identity.project_id,
        project_name: identity.project_name,
        component_id: identity.component_id,
        component_name: identity.component_name,
        environment: identity.environment,
        branch: identity.branch,
        timestamp: doc.timestamp().to_string(),
        terraform_version: doc.terraform_version().map(str::to_string),
        providers: doc.providers().clone(),
        cloud_platform: doc.cloud_platform(),
        dependencies,
        resource_graph: graph,
        drift: pruned.drift(),
        artifact_key: key.to_string(),
        artifact_location: None,
        pending_approval: identity.pending_approval,
        terraform_plan: pruned,
    };

    Ok(Projection {
        key,
        artifact,
        document,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{extract_resource_changes, normalize_plan};
    use chrono::Utc;
    use serde_json::json;

    fn identity() -> PlanIdentity {
        PlanIdentity {
            plan_id: "plan-1".into(),
            project_id: "proj".into(),
            project_name: "Platform".into(),
            component_id: "comp".into(),
            component_name: "network".into(),
            environment: "prod".into(),
            branch: Some("main".into()),
            pending_approval: false,
        }
    }

    fn sample_plan() -> serde_json::Value {
        json!({
            "format_version": "1.2",
            "terraform_version": "1.6.0",
            "timestamp": "2024-03-01T10:00:00Z",
            "variables": {"password": {"value": "hunter2"}},
            "resource_changes": [
                {
                    "address": "azurerm_key_vault_secret.s",
                    "type": "azurerm_key_vault_secret",
                    "name": "s",
                    "change": {
                        "actions": ["update"],
                        "before": {"value": "old-secret", "resource_group_name": "rg"},
                        "after": {"value": "new-secret", "resource_group_name": "rg"}
                    }
                },
                {
                    "address": "azurerm_resource_group.rg",
                    "type": "azurerm_resource_group",
                    "name": "rg",
                    "change": {"actions": ["delete", "create"]}
                },
                {
                    "address": "data.azurerm_client_config.c",
                    "type": "azurerm_client_config",
                    "name": "c",
                    "change": {"actions": ["read"]}
                },
                {
                    "address": "azurerm_dns_zone.z",
                    "type": "azurerm_dns_zone",
                    "name": "z",
                    "change": {"actions": ["no-op", "import"]}
                }
            ]
        })
    }

    #[test]
    fn test_artifact_key_layout() {
        let key = ArtifactKey {
            project_id: "p".into(),
            component_id: "c".into(),
            environment: "dev".into(),
            plan_id: "id".into(),
        };
        assert_eq!(key.to_string(), "p/c/dev/id.json");
    }

    #[test]
    fn test_projection_drops_state() {
        let doc = normalize_plan(sample_plan(), Utc::now()).unwrap();
        let projection = project(identity(), &doc, ResourceGraph::default(), BTreeSet::new()).unwrap();

        let encoded = serde_json::to_string(&projection.document).unwrap();
        assert!(!encoded.contains("new-secret"));
        assert!(!encoded.contains("hunter2"));
        assert_eq!(projection.document.artifact_key, "proj/comp/prod/plan-1.json");

        let artifact: serde_json::Value = serde_json::from_slice(&projection.artifact).unwrap();
        assert_eq!(artifact, sample_plan());

        let first = &projection.document.terraform_plan.resource_changes[0];
        assert_eq!(first.resource_group.as_deref(), Some("rg"));
        assert_eq!(projection.document.terraform_plan.format_version.as_deref(), Some("1.2"));
    }

    #[test]
    fn test_projection_recomputes_same_drift() {
        let raw = sample_plan();
        let full = drift::summarize(&extract_resource_changes(&raw));

        let doc = normalize_plan(raw, Utc::now()).unwrap();
        let projection = project(identity(), &doc, ResourceGraph::default(), BTreeSet::new()).unwrap();

        let encoded = serde_json::to_vec(&projection.document.terraform_plan).unwrap();
        let decoded: PrunedPlan = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded.drift(), full);
        assert_eq!(projection.document.drift, full);
        assert_eq!(full.update, 1);
        assert_eq!(full.replace, 1);
        assert_eq!(full.read, 1);
        assert_eq!(full.import, 1);
    }

    #[test]
    fn test_missing_metadata_not_invented() {
        let doc = normalize_plan(json!({}), Utc::now()).unwrap();
        let pruned = PrunedPlan::from_normalized(&doc);
        assert_eq!(pruned.timestamp, None);
        assert!(pruned.resource_changes.is_empty());
        let encoded = serde_json::to_value(&pruned).unwrap();
        assert_eq!(encoded, json!({"resource_changes": []}));
    }
}
