//! Plan normalization.
//!
//! Turns a raw Terraform plan (`terraform show -json` output) into a
//! [`NormalizedPlanDocument`] carrying the metadata the rest of the
//! pipeline keys on: Terraform version, provider set, cloud platform,
//! and the plan timestamp.
//!
//! # Rules
//!
//! - **providers**: keys of `configuration.provider_config`.
//! - **cloud_platform**: first `resource_changes[*].type` with a known
//!   prefix (`azurerm_`, `aws_`, `google_`) wins; later entries never
//!   override it.
//! - **timestamp**: the plan's own `timestamp` when present and
//!   non-empty, otherwise the injected wall clock. Caller-supplied
//!   timestamps are trusted verbatim so plans can be replayed or
//!   backfilled.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::error::MalformedPlanError;
use crate::models::{Action, CloudPlatform, ResourceChangeSummary};
use crate::probe::{self, Probe};

/// Canonical metadata extracted from a raw plan. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPlanDocument {
    format_version: Option<String>,
    terraform_version: Option<String>,
    providers: BTreeSet<String>,
    cloud_platform: CloudPlatform,
    timestamp: String,
    plan: Value,
}

impl NormalizedPlanDocument {
    pub fn format_version(&self) -> Option<&str> {
        self.format_version.as_deref()
    }

    pub fn terraform_version(&self) -> Option<&str> {
        self.terraform_version.as_deref()
    }

    pub fn providers(&self) -> &BTreeSet<String> {
        &self.providers
    }

    pub fn cloud_platform(&self) -> CloudPlatform {
        self.cloud_platform
    }

    /// ISO-8601 timestamp used for staleness ordering.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Whether the timestamp came from the plan rather than the clock.
    pub fn has_plan_timestamp(&self) -> bool {
        probe::non_empty_string(&self.plan, "timestamp").is_some()
    }

    /// The untouched raw plan.
    pub fn plan(&self) -> &Value {
        &self.plan
    }

    /// Resource changes in declaration order.
    pub fn resource_changes(&self) -> Vec<ResourceChangeSummary> {
        extract_resource_changes(&self.plan)
    }
}

/// Format an instant the way Terraform writes plan timestamps.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Normalize a raw plan.
///
/// `now` is used only when the plan carries no timestamp of its own, so
/// normalizing the same plan twice with the same `now` is deterministic.
pub fn normalize_plan(
    plan: Value,
    now: DateTime<Utc>,
) -> Result<NormalizedPlanDocument, MalformedPlanError> {
    if !plan.is_object() {
        return Err(MalformedPlanError {
            found: probe::kind(&plan),
        });
    }

    let format_version = probe::non_empty_string(&plan, "format_version").map(str::to_string);
    let terraform_version =
        probe::non_empty_string(&plan, "terraform_version").map(str::to_string);
    let providers = extract_providers(&plan);
    let cloud_platform = detect_platform(&plan);
    let timestamp = probe::non_empty_string(&plan, "timestamp")
        .map(str::to_string)
        .unwrap_or_else(|| format_timestamp(now));

    Ok(NormalizedPlanDocument {
        format_version,
        terraform_version,
        providers,
        cloud_platform,
        timestamp,
        plan,
    })
}

fn extract_providers(plan: &Value) -> BTreeSet<String> {
    match probe::path(plan, &["configuration", "provider_config"]) {
        Probe::Found(Value::Object(map)) => map.keys().cloned().collect(),
        Probe::Found(other) => {
            tracing::debug!(
                found = probe::kind(other),
                "configuration.provider_config is not an object; no providers recorded"
            );
            BTreeSet::new()
        }
        _ => BTreeSet::new(),
    }
}

fn detect_platform(plan: &Value) -> CloudPlatform {
    let Some(changes) = probe::array(plan, "resource_changes").found() else {
        return CloudPlatform::Unknown;
    };
    changes
        .iter()
        .filter_map(|rc| probe::string(rc, "type").found())
        .find_map(CloudPlatform::from_resource_type)
        .unwrap_or_default()
}

/// Reduce `resource_changes` to [`ResourceChangeSummary`] entries.
///
/// Entries that are not objects are skipped. `resource_group` is read from
/// `change.after.resource_group_name`, falling back to `change.before`.
/// Action strings Terraform may add in future versions are dropped.
pub fn extract_resource_changes(plan: &Value) -> Vec<ResourceChangeSummary> {
    let Some(changes) = probe::array(plan, "resource_changes").found() else {
        return Vec::new();
    };

    changes
        .iter()
        .filter(|rc| rc.is_object())
        .map(|rc| {
            let change = probe::any(rc, "change").found();
            let actions: Vec<Action> = change
                .and_then(|c| probe::array(c, "actions").found())
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .filter_map(|a| {
                            let parsed = Action::parse(a);
                            if parsed.is_none() {
                                tracing::debug!(action = a, "ignoring unrecognised plan action");
                            }
                            parsed
                        })
                        .collect()
                })
                .unwrap_or_default();

            let resource_group = change.and_then(|c| {
                ["after", "before"].iter().find_map(|state| {
                    probe::path(c, &[*state, "resource_group_name"])
                        .found()
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                })
            });

            ResourceChangeSummary {
                address: owned_field(rc, "address"),
                resource_type: owned_field(rc, "type"),
                name: owned_field(rc, "name"),
                resource_group,
                actions,
            }
        })
        .collect()
}

fn owned_field(value: &Value, key: &str) -> String {
    probe::string(value, key).found().unwrap_or_default().to_string()
}
