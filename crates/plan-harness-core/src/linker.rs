//! Heuristic cross-component linking.
//!
//! Guesses which other components of the same project a plan depends on
//! by looking for their names inside the plan's text: variable values,
//! resource names, and literal (`constant_value`) expression arguments.
//!
//! Matching is a case-insensitive substring test. A component called
//! `db` therefore links to any plan mentioning `dbadmin`; these false
//! positives are accepted in exchange for catching names embedded in
//! connection strings, resource-group names, and similar values.
//! Components with an empty name never match.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GraphError;
use crate::models::Component;
use crate::probe::{self, Probe};

/// A guessed dependency on another component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyLink {
    pub component_id: String,
}

/// Lowercase component name → component ids, scoped to one project.
///
/// Names that collide after lowercasing keep every id.
#[derive(Debug, Clone, Default)]
pub struct ComponentNameIndex {
    names: BTreeMap<String, BTreeSet<String>>,
}

impl ComponentNameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from a project's components.
    pub fn from_components<'a>(components: impl IntoIterator<Item = &'a Component>) -> Self {
        let mut index = Self::new();
        for c in components {
            index.insert(&c.name, &c.id);
        }
        index
    }

    pub fn insert(&mut self, name: &str, component_id: &str) {
        self.names
            .entry(name.to_lowercase())
            .or_default()
            .insert(component_id.to_string());
    }

    /// Number of indexed component ids.
    pub fn len(&self) -> usize {
        self.names.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names
            .iter()
            .flat_map(|(name, ids)| ids.iter().map(move |id| (name.as_str(), id.as_str())))
    }
}

/// Scans plan text for mentions of other components.
pub struct HeuristicLinker<'a> {
    index: &'a ComponentNameIndex,
    own_component_id: Option<&'a str>,
    max_depth: usize,
}

impl<'a> HeuristicLinker<'a> {
    pub fn new(
        index: &'a ComponentNameIndex,
        own_component_id: Option<&'a str>,
        max_depth: usize,
    ) -> Self {
        Self {
            index,
            own_component_id,
            max_depth,
        }
    }

    /// Links found in `plan`. Never contains the plan's own component.
    pub fn link(&self, plan: &Value) -> Result<BTreeSet<DependencyLink>, GraphError> {
        if self.index.is_empty() {
            return Ok(BTreeSet::new());
        }

        let texts: Vec<String> = self
            .scan_texts(plan)?
            .into_iter()
            .map(str::to_lowercase)
            .collect();

        let links = self
            .index
            .iter()
            .filter(|(name, _)| !name.is_empty())
            .filter(|(_, id)| Some(*id) != self.own_component_id)
            .filter(|(name, _)| texts.iter().any(|t| t.contains(name)))
            .map(|(_, id)| DependencyLink {
                component_id: id.to_string(),
            })
            .collect();

        Ok(links)
    }

    fn scan_texts<'v>(&self, plan: &'v Value) -> Result<Vec<&'v str>, GraphError> {
        let mut texts = Vec::new();

        if let Some(variables) = probe::object(plan, "variables").found() {
            for variable in variables.values() {
                if let Probe::Found(value) = probe::any(variable, "value") {
                    if !probe::collect_strings(value, self.max_depth, &mut texts) {
                        return Err(GraphError::DepthExceeded(self.max_depth));
                    }
                }
            }
        }

        if let Probe::Found(root) = probe::path(plan, &["configuration", "root_module"]) {
            self.scan_module(root, 0, &mut texts)?;
        }

        Ok(texts)
    }

    fn scan_module<'v>(
        &self,
        module: &'v Value,
        depth: usize,
        texts: &mut Vec<&'v str>,
    ) -> Result<(), GraphError> {
        if depth > self.max_depth {
            return Err(GraphError::DepthExceeded(self.max_depth));
        }

        if let Some(resources) = probe::array(module, "resources").found() {
            for resource in resources {
                if let Some(name) = probe::string(resource, "name").found() {
                    texts.push(name);
                }
                if let Some(expressions) = probe::any(resource, "expressions").found() {
                    self.scan_constants(expressions, depth + 1, texts)?;
                }
            }
        }

        if let Some(children) = probe::array(module, "child_modules").found() {
            for child in children {
                self.scan_module(child, depth + 1, texts)?;
            }
        }

        if let Some(calls) = probe::object(module, "module_calls").found() {
            for call in calls.values() {
                if let Some(inner) = probe::any(call, "module").found() {
                    self.scan_module(inner, depth + 1, texts)?;
                }
            }
        }

        Ok(())
    }

    fn scan_constants<'v>(
        &self,
        value: &'v Value,
        depth: usize,
        texts: &mut Vec<&'v str>,
    ) -> Result<(), GraphError> {
        if depth > self.max_depth {
            return Err(GraphError::DepthExceeded(self.max_depth));
        }
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    if key == "constant_value" {
                        let remaining = self.max_depth.saturating_sub(depth);
                        if !probe::collect_strings(child, remaining, texts) {
                            return Err(GraphError::DepthExceeded(self.max_depth));
                        }
                    } else {
                        self.scan_constants(child, depth + 1, texts)?;
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.scan_constants(item, depth + 1, texts)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DEFAULT_MAX_DEPTH;
    use serde_json::json;

    fn index(pairs: &[(&str, &str)]) -> ComponentNameIndex {
        let mut idx = ComponentNameIndex::new();
        for (name, id) in pairs {
            idx.insert(name, id);
        }
        idx
    }

    fn ids(links: &BTreeSet<DependencyLink>) -> Vec<&str> {
        links.iter().map(|l| l.component_id.as_str()).collect()
    }

    #[test]
    fn test_variable_value_substring() {
        let idx = index(&[("database", "comp-db-id")]);
        let plan = json!({"variables": {"conn": {"value": "database-conn-string"}}});
        let links = HeuristicLinker::new(&idx, Some("comp-app-id"), DEFAULT_MAX_DEPTH)
            .link(&plan)
            .unwrap();
        assert_eq!(ids(&links), vec!["comp-db-id"]);
    }

    #[test]
    fn test_colliding_names_link_every_component() {
        let idx = index(&[("Database", "comp-db-a"), ("database", "comp-db-b")]);
        assert_eq!(idx.len(), 2);
        let plan = json!({"variables": {"conn": {"value": "database-conn-string"}}});
        let links = HeuristicLinker::new(&idx, Some("comp-db-a"), DEFAULT_MAX_DEPTH)
            .link(&plan)
            .unwrap();
        assert_eq!(ids(&links), vec!["comp-db-b"]);

        let links = HeuristicLinker::new(&idx, None, DEFAULT_MAX_DEPTH)
            .link(&plan)
            .unwrap();
        assert_eq!(ids(&links), vec!["comp-db-a", "comp-db-b"]);
    }

    #[test]
    fn test_self_link_excluded() {
        let idx = index(&[("database", "comp-db-id")]);
        let plan = json!({"variables": {"conn": {"value": "database-conn-string"}}});
        let links = HeuristicLinker::new(&idx, Some("comp-db-id"), DEFAULT_MAX_DEPTH)
            .link(&plan)
            .unwrap();
        assert!(links.is_empty());
    }

    #[test]
    fn test_case_insensitive_names_and_constants() {
        let idx = index(&[("Network", "comp-net"), ("Storage", "comp-sto"), ("absent", "comp-x")]);
        let plan = json!({
            "configuration": {
                "root_module": {
                    "resources": [{
                        "name": "app",
                        "expressions": {
                            "vnet_name": {"constant_value": "shared-NETWORK-vnet"},
                            "tags": {"constant_value": {"owner": "storage-team"}}
                        }
                    }]
                }
            }
        });
        let links = HeuristicLinker::new(&idx, None, DEFAULT_MAX_DEPTH)
            .link(&plan)
            .unwrap();
        assert_eq!(ids(&links), vec!["comp-net", "comp-sto"]);
    }

    #[test]
    fn test_resource_names_in_module_calls() {
        let idx = index(&[("cache", "comp-cache")]);
        let plan = json!({
            "configuration": {
                "root_module": {
                    "module_calls": {
                        "m": {"module": {"resources": [{"name": "redis_cache_primary"}]}}
                    }
                }
            }
        });
        let links = HeuristicLinker::new(&idx, None, DEFAULT_MAX_DEPTH)
            .link(&plan)
            .unwrap();
        assert_eq!(ids(&links), vec!["comp-cache"]);
    }

    #[test]
    fn test_short_names_over_match() {
        let idx = index(&[("db", "comp-db")]);
        let plan = json!({"variables": {"x": {"value": "mongodb-cluster"}}});
        let links = HeuristicLinker::new(&idx, None, DEFAULT_MAX_DEPTH)
            .link(&plan)
            .unwrap();
        assert_eq!(ids(&links), vec!["comp-db"]);
    }

    #[test]
    fn test_references_are_not_scanned() {
        let idx = index(&[("api", "comp-api")]);
        let plan = json!({
            "variables": {"n": {"value": 3}},
            "configuration": {"root_module": {"resources": [{
                "name": "web",
                "expressions": {"x": {"references": ["var.api_url"]}}
            }]}}
        });
        let links = HeuristicLinker::new(&idx, None, DEFAULT_MAX_DEPTH)
            .link(&plan)
            .unwrap();
        assert!(links.is_empty());
    }

    #[test]
    fn test_depth_guard_reports_error() {
        let mut value = json!("database");
        for _ in 0..10 {
            value = json!([value]);
        }
        let idx = index(&[("database", "comp-db")]);
        let plan = json!({"variables": {"deep": {"value": value}}});
        assert!(HeuristicLinker::new(&idx, None, 4).link(&plan).is_err());
    }
}
