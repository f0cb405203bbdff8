//! Core data types shared across the analysis pipeline.
//!
//! Graph types live in [`graph`](crate::graph), drift counters in
//! [`drift`](crate::drift), and the persisted shapes in
//! [`projection`](crate::projection).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cloud platform inferred from resource type prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CloudPlatform {
    Azure,
    #[serde(rename = "AWS")]
    Aws,
    #[serde(rename = "GCP")]
    Gcp,
    #[default]
    Unknown,
}

impl CloudPlatform {
    /// Platform for a resource type such as `azurerm_resource_group`.
    ///
    /// Returns `None` for types without a recognised provider prefix.
    pub fn from_resource_type(resource_type: &str) -> Option<Self> {
        if resource_type.starts_with("azurerm_") {
            Some(CloudPlatform::Azure)
        } else if resource_type.starts_with("aws_") {
            Some(CloudPlatform::Aws)
        } else if resource_type.starts_with("google_") {
            Some(CloudPlatform::Gcp)
        } else {
            None
        }
    }

    pub fn is_known(self) -> bool {
        self != CloudPlatform::Unknown
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CloudPlatform::Azure => "Azure",
            CloudPlatform::Aws => "AWS",
            CloudPlatform::Gcp => "GCP",
            CloudPlatform::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for CloudPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudPlatform {
    type Err = std::convert::Infallible;

    /// Unrecognised names parse as [`CloudPlatform::Unknown`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Azure" => CloudPlatform::Azure,
            "AWS" => CloudPlatform::Aws,
            "GCP" => CloudPlatform::Gcp,
            _ => CloudPlatform::Unknown,
        })
    }
}

/// A single planned action on a resource, as Terraform spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Create,
    Update,
    Delete,
    Read,
    NoOp,
    Import,
}

impl Action {
    /// Parse a Terraform action string. Unknown actions yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Action::Create),
            "update" => Some(Action::Update),
            "delete" => Some(Action::Delete),
            "read" => Some(Action::Read),
            "no-op" => Some(Action::NoOp),
            "import" => Some(Action::Import),
            _ => None,
        }
    }
}

/// One entry of a plan's `resource_changes`, reduced to what the index keeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChangeSummary {
    pub address: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    pub resource_group: Option<String>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// The granularity at which plan timestamps must increase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StalenessKey {
    pub component_id: String,
    pub environment: String,
}

impl StalenessKey {
    pub fn new(component_id: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            environment: environment.into(),
        }
    }
}

impl fmt::Display for StalenessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component_id, self.environment)
    }
}

/// A project: a named set of components sharing environments and a platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cloud_platform: CloudPlatform,
    #[serde(default)]
    pub environments: Vec<String>,
    /// Slack incoming-webhook URL for drift alerts.
    #[serde(default)]
    pub slack_webhook: Option<String>,
}

impl Project {
    pub fn has_environment(&self, environment: &str) -> bool {
        self.environments.iter().any(|e| e == environment)
    }
}

/// A deployable unit within a project; plans are submitted per component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    pub name: String,
    pub project_id: String,
    /// Environments this component is never deployed to.
    #[serde(default)]
    pub excluded_environments: Vec<String>,
}

impl Component {
    pub fn is_excluded(&self, environment: &str) -> bool {
        self.excluded_environments.iter().any(|e| e == environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_prefixes() {
        assert_eq!(
            CloudPlatform::from_resource_type("azurerm_resource_group"),
            Some(CloudPlatform::Azure)
        );
        assert_eq!(
            CloudPlatform::from_resource_type("aws_s3_bucket"),
            Some(CloudPlatform::Aws)
        );
        assert_eq!(
            CloudPlatform::from_resource_type("google_compute_instance"),
            Some(CloudPlatform::Gcp)
        );
        assert_eq!(CloudPlatform::from_resource_type("random_id"), None);
    }

    #[test]
    fn test_platform_serde_names() {
        assert_eq!(serde_json::to_string(&CloudPlatform::Aws).unwrap(), "\"AWS\"");
        assert_eq!("GCP".parse::<CloudPlatform>().unwrap(), CloudPlatform::Gcp);
        assert_eq!("aws".parse::<CloudPlatform>().unwrap(), CloudPlatform::Unknown);
    }

    #[test]
    fn test_action_spelling() {
        assert_eq!(serde_json::to_string(&Action::NoOp).unwrap(), "\"no-op\"");
        assert_eq!(Action::parse("no-op"), Some(Action::NoOp));
        assert_eq!(Action::parse("forget"), None);
    }
}
