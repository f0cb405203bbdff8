//! In-memory store implementations for testing and embedding.
//!
//! [`InMemoryStore`] implements both [`PlanIndex`] and [`Registry`] over
//! `HashMap`s behind `std::sync::RwLock`. [`InMemoryArtifacts`] is a
//! key → bytes map implementing [`ArtifactStore`]. [`RecordingNotifier`]
//! keeps every alert it is sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{CloudPlatform, Component, Project, StalenessKey};
use crate::projection::PlanDocument;

use super::{ArtifactStore, DriftAlert, Notifier, PlanFilter, PlanIndex, Registry};

/// In-memory plan index and registry.
pub struct InMemoryStore {
    plans: RwLock<HashMap<String, PlanDocument>>,
    projects: RwLock<HashMap<String, Project>>,
    components: RwLock<HashMap<String, Component>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            plans: RwLock::new(HashMap::new()),
            projects: RwLock::new(HashMap::new()),
            components: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert_project(&self, project: Project) {
        self.projects
            .write()
            .unwrap()
            .insert(project.id.clone(), project);
    }

    pub fn insert_component(&self, component: Component) {
        self.components
            .write()
            .unwrap()
            .insert(component.id.clone(), component);
    }

    pub fn plan_count(&self) -> usize {
        self.plans.read().unwrap().len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(docs: &mut [PlanDocument]) {
    docs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
}

#[async_trait]
impl PlanIndex for InMemoryStore {
    async fn latest_accepted(&self, key: &StalenessKey) -> Result<Option<PlanDocument>> {
        let plans = self.plans.read().unwrap();
        Ok(plans
            .values()
            .filter(|p| {
                !p.pending_approval
                    && p.component_id == key.component_id
                    && p.environment == key.environment
            })
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp))
            .cloned())
    }

    async fn put_plan(&self, doc: &PlanDocument) -> Result<()> {
        self.plans
            .write()
            .unwrap()
            .insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_plan(&self, id: &str) -> Result<Option<PlanDocument>> {
        Ok(self.plans.read().unwrap().get(id).cloned())
    }

    async fn list_plans(&self, filter: &PlanFilter) -> Result<Vec<PlanDocument>> {
        let plans = self.plans.read().unwrap();
        let matches = |want: &Option<String>, have: &str| want.as_deref().map_or(true, |w| w == have);
        let mut docs: Vec<PlanDocument> = plans
            .values()
            .filter(|p| {
                matches(&filter.project_id, &p.project_id)
                    && matches(&filter.component_id, &p.component_id)
                    && matches(&filter.environment, &p.environment)
            })
            .cloned()
            .collect();
        newest_first(&mut docs);
        if let Some(limit) = filter.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn delete_plan(&self, id: &str) -> Result<Option<PlanDocument>> {
        Ok(self.plans.write().unwrap().remove(id))
    }

    async fn delete_component_plans(&self, component_id: &str) -> Result<Vec<PlanDocument>> {
        let mut plans = self.plans.write().unwrap();
        let ids: Vec<String> = plans
            .values()
            .filter(|p| p.component_id == component_id)
            .map(|p| p.id.clone())
            .collect();
        Ok(ids.iter().filter_map(|id| plans.remove(id)).collect())
    }

    async fn delete_environment_plans(
        &self,
        project_id: &str,
        environment: &str,
    ) -> Result<Vec<PlanDocument>> {
        let mut plans = self.plans.write().unwrap();
        let ids: Vec<String> = plans
            .values()
            .filter(|p| p.project_id == project_id && p.environment == environment)
            .map(|p| p.id.clone())
            .collect();
        Ok(ids.iter().filter_map(|id| plans.remove(id)).collect())
    }
}

#[async_trait]
impl Registry for InMemoryStore {
    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        Ok(self.projects.read().unwrap().get(id).cloned())
    }

    async fn get_component(&self, id: &str) -> Result<Option<Component>> {
        Ok(self.components.read().unwrap().get(id).cloned())
    }

    async fn find_components(&self, project_id: &str, name: &str) -> Result<Vec<Component>> {
        Ok(self
            .components
            .read()
            .unwrap()
            .values()
            .filter(|c| c.project_id == project_id && c.name == name)
            .cloned()
            .collect())
    }

    async fn list_components(&self, project_id: &str) -> Result<Vec<Component>> {
        let mut components: Vec<Component> = self
            .components
            .read()
            .unwrap()
            .values()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect();
        components.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(components)
    }

    async fn set_project_platform(&self, project_id: &str, platform: CloudPlatform) -> Result<()> {
        let mut projects = self.projects.write().unwrap();
        match projects.get_mut(project_id) {
            Some(p) => {
                p.cloud_platform = platform;
                Ok(())
            }
            None => bail!("project not found: {}", project_id),
        }
    }
}

/// In-memory artifact store.
#[derive(Default)]
pub struct InMemoryArtifacts {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl InMemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose writes always fail, for exercising error paths.
    pub fn failing() -> Self {
        let store = Self::default();
        store.fail_writes.store(true, Ordering::SeqCst);
        store
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifacts {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("artifact store unavailable");
        }
        self.objects
            .write()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(format!("memory://{}", key))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.read().unwrap().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.objects.write().unwrap().remove(key).is_some())
    }
}

/// Notifier that records alerts instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<DriftAlert>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<DriftAlert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn drift_detected(&self, alert: &DriftAlert) -> Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_document(id: &str) -> PlanDocument {
    PlanDocument {
        id: id.to_string(),
        project_id: "proj".into(),
        project_name: "Project".into(),
        component_id: "comp".into(),
        component_name: "component".into(),
        environment: "dev".into(),
        branch: None,
        timestamp: "2024-01-01T00:00:00Z".into(),
        terraform_version: None,
        providers: Default::default(),
        cloud_platform: CloudPlatform::Unknown,
        dependencies: Default::default(),
        resource_graph: Default::default(),
        drift: Default::default(),
        artifact_key: format!("proj/comp/dev/{}.json", id),
        artifact_location: None,
        pending_approval: false,
        terraform_plan: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let store = InMemoryStore::new();
        for (id, env, ts) in [
            ("a", "dev", "2024-01-01T00:00:00Z"),
            ("b", "dev", "2024-03-01T00:00:00Z"),
            ("c", "prod", "2024-02-01T00:00:00Z"),
        ] {
            let mut doc = sample_document(id);
            doc.environment = env.into();
            doc.timestamp = ts.into();
            store.put_plan(&doc).await.unwrap();
        }

        let all = store.list_plans(&PlanFilter::default()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let dev = store
            .list_plans(&PlanFilter {
                environment: Some("dev".into()),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(dev.len(), 1);
        assert_eq!(dev[0].id, "b");
    }

    #[tokio::test]
    async fn test_environment_cascade() {
        let store = InMemoryStore::new();
        for (id, env) in [("a", "dev"), ("b", "prod"), ("c", "dev")] {
            let mut doc = sample_document(id);
            doc.environment = env.into();
            store.put_plan(&doc).await.unwrap();
        }
        let removed = store.delete_environment_plans("proj", "dev").await.unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.plan_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_artifacts() {
        let store = InMemoryArtifacts::failing();
        assert!(store.put("k", b"{}").await.is_err());
        assert!(store.keys().is_empty());
    }
}
