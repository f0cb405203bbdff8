//! Resource dependency graph from a plan's declarative configuration.
//!
//! Walks `configuration.root_module` depth-first and emits one [`Node`] per
//! declared resource plus two kinds of [`Edge`]:
//!
//! - **explicit**: one per `depends_on` entry, `dependency → resource`.
//! - **implicit**: one per entry of any `references` list found in the
//!   resource's `expressions` (including nested blocks), `reference → resource`.
//!
//! Both `child_modules` (planned-values shape, addresses already
//! qualified) and `module_calls.<name>.module` (configuration shape,
//! addresses relative to the module) are followed. Addresses found under
//! `module_calls` are qualified with `module.<name>.`.
//!
//! # Edge resolution
//!
//! References name attributes (`azurerm_resource_group.rg.name`) while
//! node ids are bare addresses (`azurerm_resource_group.rg`). Each edge
//! source is resolved by testing it against the node-id set and, on a
//! miss, stripping the last dot-separated segment and testing again. The
//! first hit wins. A source with no matching prefix is dropped, so every
//! edge in the returned graph starts and ends at a node.
//!
//! Resource names containing literal dots can resolve to the wrong node;
//! addresses are assumed to use dots only as separators.
//!
//! The graph is an arena of string ids and may contain cycles.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GraphError;
use crate::probe::{self, Probe};

/// Default nesting limit for modules and expression blocks.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Group assigned to resources declared in the root module.
pub const ROOT_GROUP: &str = "root";

/// A declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Declarative address; unique within a graph.
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub group: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Explicit,
    Implicit,
}

/// `source` is depended on by `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl ResourceGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges pointing at `id`.
    pub fn dependencies_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == id)
    }
}

/// Group for a node id: `module.<name>` for module resources, else `root`.
///
/// This is the outermost module call, not the first dot-separated segment
/// of the address. Nested modules fold into their outermost call.
pub fn group_for(address: &str) -> String {
    let mut segments = address.split('.');
    match (segments.next(), segments.next()) {
        (Some("module"), Some(name)) => format!("module.{}", name),
        _ => ROOT_GROUP.to_string(),
    }
}

/// Resolve a reference to a node id by stripping trailing segments.
pub fn resolve_reference<'a>(reference: &'a str, ids: &HashSet<String>) -> Option<&'a str> {
    let mut candidate = reference;
    loop {
        if ids.contains(candidate) {
            return Some(candidate);
        }
        match candidate.rfind('.') {
            Some(i) => candidate = &candidate[..i],
            None => return None,
        }
    }
}

/// Build the resource graph of a raw plan.
///
/// A plan without `configuration.root_module` yields an empty graph.
pub fn build_graph(plan: &Value, max_depth: usize) -> Result<ResourceGraph, GraphError> {
    match probe::path(plan, &["configuration", "root_module"]) {
        Probe::Found(root) => GraphBuilder::new(max_depth).build(root),
        _ => Ok(ResourceGraph::default()),
    }
}

struct PendingEdge {
    source: String,
    target: String,
    kind: EdgeKind,
}

/// Depth-limited builder over a `root_module` subtree.
pub struct GraphBuilder {
    max_depth: usize,
    nodes: Vec<Node>,
    ids: HashSet<String>,
    pending: Vec<PendingEdge>,
}

impl GraphBuilder {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            nodes: Vec::new(),
            ids: HashSet::new(),
            pending: Vec::new(),
        }
    }

    pub fn build(mut self, root_module: &Value) -> Result<ResourceGraph, GraphError> {
        self.walk_module(root_module, "", 0)?;

        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        let mut dropped = 0usize;
        for edge in &self.pending {
            let Some(source) = resolve_reference(&edge.source, &self.ids) else {
                dropped += 1;
                continue;
            };
            let resolved = Edge {
                source: source.to_string(),
                target: edge.target.clone(),
                kind: edge.kind,
            };
            if seen.insert(resolved.clone()) {
                edges.push(resolved);
            }
        }

        tracing::debug!(
            nodes = self.nodes.len(),
            edges = edges.len(),
            dropped,
            "resource graph built"
        );

        Ok(ResourceGraph {
            nodes: self.nodes,
            edges,
        })
    }

    fn walk_module(&mut self, module: &Value, prefix: &str, depth: usize) -> Result<(), GraphError> {
        if depth > self.max_depth {
            return Err(GraphError::DepthExceeded(self.max_depth));
        }

        if let Some(resources) = probe::array(module, "resources").found() {
            for resource in resources.iter().filter(|r| r.is_object()) {
                self.add_resource(resource, prefix, depth)?;
            }
        }

        if let Some(children) = probe::array(module, "child_modules").found() {
            for child in children {
                self.walk_module(child, prefix, depth + 1)?;
            }
        }

        if let Some(calls) = probe::object(module, "module_calls").found() {
            for (name, call) in calls {
                if let Some(inner) = probe::any(call, "module").found() {
                    let child_prefix = format!("{}module.{}.", prefix, name);
                    self.walk_module(inner, &child_prefix, depth + 1)?;
                }
            }
        }

        Ok(())
    }

    fn add_resource(&mut self, resource: &Value, prefix: &str, depth: usize) -> Result<(), GraphError> {
        let Some(address) = resource_address(resource) else {
            tracing::debug!("skipping resource without address or type/name");
            return Ok(());
        };
        let id = format!("{}{}", prefix, address);

        if self.ids.insert(id.clone()) {
            let label = probe::non_empty_string(resource, "name")
                .unwrap_or(id.as_str())
                .to_string();
            self.nodes.push(Node {
                label,
                node_type: probe::string(resource, "type")
                    .found()
                    .unwrap_or_default()
                    .to_string(),
                group: group_for(&id),
                id: id.clone(),
            });
        }

        if let Some(deps) = probe::array(resource, "depends_on").found() {
            for dep in deps.iter().filter_map(Value::as_str) {
                self.pending.push(PendingEdge {
                    source: format!("{}{}", prefix, dep),
                    target: id.clone(),
                    kind: EdgeKind::Explicit,
                });
            }
        }

        if let Some(expressions) = probe::any(resource, "expressions").found() {
            let mut references = Vec::new();
            collect_references(expressions, depth + 1, self.max_depth, &mut references)?;
            for reference in references {
                self.pending.push(PendingEdge {
                    source: format!("{}{}", prefix, reference),
                    target: id.clone(),
                    kind: EdgeKind::Implicit,
                });
            }
        }

        Ok(())
    }
}

/// `address` if present, else `[data.]<type>.<name>`.
fn resource_address(resource: &Value) -> Option<String> {
    if let Some(address) = probe::non_empty_string(resource, "address") {
        return Some(address.to_string());
    }
    let resource_type = probe::non_empty_string(resource, "type")?;
    let name = probe::non_empty_string(resource, "name")?;
    match probe::string(resource, "mode").found() {
        Some("data") => Some(format!("data.{}.{}", resource_type, name)),
        _ => Some(format!("{}.{}", resource_type, name)),
    }
}

/// Gather every string in every `references` list under `value`.
///
/// `constant_value` subtrees are literal data and are not searched.
fn collect_references<'a>(
    value: &'a Value,
    depth: usize,
    max_depth: usize,
    out: &mut Vec<&'a str>,
) -> Result<(), GraphError> {
    if depth > max_depth {
        return Err(GraphError::DepthExceeded(max_depth));
    }
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(refs)) = map.get("references") {
                out.extend(refs.iter().filter_map(Value::as_str));
            }
            for (key, child) in map {
                if key == "references" || key == "constant_value" {
                    continue;
                }
                collect_references(child, depth + 1, max_depth, out)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, depth + 1, max_depth, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}
