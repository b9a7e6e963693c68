// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Targeting engine
//!
//! Turns a target expression into concrete nodes for the current scope:
//! syntax check, cached region inventory, login rules, cluster
//! reconciliation (with an active cluster only), indexing, then expression
//! resolution. Resolution never mutates anything in the cloud; lifecycle and
//! tag changes go through `apply` and `tag`, which invalidate the region
//! afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::cache::RegionCache;
use super::cluster::ClusterSpec;
use super::filter;
use super::login::{self, LoginRule};
use super::node::{InstanceState, Node};
use super::ops::{self, Plan};
use super::provider::CloudProvider;
use super::registry;
use crate::error::FleetError;

/// Region and optional cluster the session is working in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub region: String,
    pub cluster: Option<String>,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cluster {
            Some(cluster) => write!(f, "{}/{}", self.region, cluster),
            None => f.write_str(&self.region),
        }
    }
}

pub struct TargetingEngine {
    provider: Arc<dyn CloudProvider>,
    cache: RegionCache,
    rules: Vec<LoginRule>,
    clusters: Vec<ClusterSpec>,
    scope: Option<Scope>,
    absent_count: usize,
}

impl TargetingEngine {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        rules: Vec<LoginRule>,
        clusters: Vec<ClusterSpec>,
    ) -> Self {
        Self {
            provider,
            cache: RegionCache::new(),
            rules,
            clusters,
            scope: None,
            absent_count: 0,
        }
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    pub fn rules(&self) -> &[LoginRule] {
        &self.rules
    }

    pub fn clusters(&self) -> &[ClusterSpec] {
        &self.clusters
    }

    pub fn cluster(&self, name: &str) -> Result<&ClusterSpec, FleetError> {
        self.clusters
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| FleetError::UnknownCluster(name.to_string()))
    }

    /// Add a cluster, replacing any existing one with the same name
    pub fn add_cluster(&mut self, spec: ClusterSpec) {
        self.clusters.retain(|c| c.name != spec.name);
        self.clusters.push(spec);
    }

    /// Work on a whole region, dropping any active cluster
    pub fn use_region(&mut self, region: &str) {
        info!(region = %region, "Scope changed");
        self.scope = Some(Scope {
            region: region.to_string(),
            cluster: None,
        });
    }

    /// Work on one cluster in its region
    pub fn use_cluster(&mut self, name: &str) -> Result<(), FleetError> {
        let region = self.cluster(name)?.region.clone();
        info!(region = %region, cluster = %name, "Scope changed");
        self.scope = Some(Scope {
            region,
            cluster: Some(name.to_string()),
        });
        Ok(())
    }

    fn require_scope(&self) -> Result<Scope, FleetError> {
        self.scope.clone().ok_or(FleetError::NoCloudScope)
    }

    /// True when the next resolution has to list the region
    pub fn needs_fetch(&self) -> bool {
        self.scope
            .as_ref()
            .is_some_and(|s| !self.cache.is_cached(&s.region))
    }

    pub fn inventory_age(&self) -> Option<Duration> {
        self.scope.as_ref().and_then(|s| self.cache.age(&s.region))
    }

    /// Configured nodes with no live instance in the last resolution
    pub fn absent_count(&self) -> usize {
        self.absent_count
    }

    /// Drop the cached inventory of the current region
    pub fn invalidate(&mut self) {
        if let Some(scope) = &self.scope {
            self.cache.invalidate(&scope.region);
        }
    }

    /// Every node in scope, with rules applied, reconciled and indexed
    pub async fn working_set(&mut self) -> Result<Vec<Node>, FleetError> {
        let scope = self.require_scope()?;

        let mut nodes = self
            .cache
            .get_or_fetch(&scope.region, self.provider.as_ref())
            .await?
            .to_vec();

        login::assign(&mut nodes, &self.rules)?;

        self.absent_count = 0;
        if let Some(name) = &scope.cluster {
            let spec = self
                .clusters
                .iter()
                .find(|c| &c.name == name)
                .ok_or_else(|| FleetError::UnknownCluster(name.clone()))?;
            let (reconciled, absent) = registry::reconcile(nodes, spec)?;
            nodes = reconciled;
            self.absent_count = absent;
        }

        registry::index(&mut nodes);
        Ok(nodes)
    }

    /// Resolve a target expression in the current scope
    ///
    /// The expression is checked before anything is fetched, so a malformed
    /// target never reaches the provider. `search` enables the free-text
    /// fallback.
    pub async fn resolve_targets(
        &mut self,
        target: &str,
        search: bool,
    ) -> Result<Vec<Node>, FleetError> {
        self.require_scope()?;
        filter::validate(target)?;

        let nodes = self.working_set().await?;
        let selected = filter::resolve(&nodes, target, search)?;
        debug!(target = %target, selected = selected.len(), total = nodes.len(), "Resolved targets");
        Ok(selected)
    }

    /// Running nodes matching `target`; empty (and logged) when there are none
    pub async fn running_nodes_from_target(&mut self, target: &str) -> Result<Vec<Node>, FleetError> {
        let nodes: Vec<Node> = self
            .resolve_targets(target, false)
            .await?
            .into_iter()
            .filter(|n| n.lifecycle() == InstanceState::Running)
            .collect();
        if nodes.is_empty() {
            info!(target = %target, "no running nodes");
        }
        Ok(nodes)
    }

    /// Nodes in any state matching `target`; empty (and logged) when there are none
    pub async fn any_nodes_from_target(&mut self, target: &str) -> Result<Vec<Node>, FleetError> {
        let nodes = self.resolve_targets(target, false).await?;
        if nodes.is_empty() {
            info!(target = %target, "no nodes matched");
        }
        Ok(nodes)
    }

    /// Execute a lifecycle plan and invalidate the region
    pub async fn apply(&mut self, plan: &Plan) -> Result<Vec<String>, FleetError> {
        let scope = self.require_scope()?;
        if plan.is_empty() {
            ops::execute(plan, &scope.region, self.provider.as_ref()).await?;
            return Ok(Vec::new());
        }

        let result = ops::execute(plan, &scope.region, self.provider.as_ref()).await;
        // Part of the batch may have gone through even when the call failed
        self.cache.invalidate(&scope.region);
        result
    }

    /// Add (`remove = false`) or delete tags on nodes and invalidate the region
    pub async fn tag(
        &mut self,
        nodes: &[Node],
        tags: &BTreeMap<String, String>,
        remove: bool,
    ) -> Result<usize, FleetError> {
        let scope = self.require_scope()?;
        let ids = ops::taggable_ids(nodes);
        if ids.is_empty() {
            return Ok(0);
        }

        let result = if remove {
            self.provider.delete_tags(&scope.region, &ids, tags).await
        } else {
            self.provider.create_tags(&scope.region, &ids, tags).await
        };
        self.cache.invalidate(&scope.region);
        result.map_err(|e| FleetError::provider(&scope.region, &e))?;

        info!(region = %scope.region, count = ids.len(), remove, "Tags updated");
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::cluster::NodeSpec;
    use crate::fleet::ops::Operation;
    use crate::fleet::testing::{Call, MockProvider, instance};

    const REGION: &str = "eu-west-1";

    fn scenario() -> Arc<MockProvider> {
        Arc::new(MockProvider::with_region(
            REGION,
            vec![
                instance("i-1", "master", "running", &[("cluster", "nano1")]),
                instance("i-2", "worker1", "stopped", &[]),
            ],
        ))
    }

    fn engine(provider: &Arc<MockProvider>) -> TargetingEngine {
        let mut engine = TargetingEngine::new(provider.clone(), Vec::new(), Vec::new());
        engine.use_region(REGION);
        engine
    }

    fn names(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    fn nano1() -> ClusterSpec {
        let spec = |name: &str| NodeSpec {
            nodename: name.to_string(),
            instance_type: "t2.nano".to_string(),
            image: "ami-1".to_string(),
            username: "ec2-user".to_string(),
            ..Default::default()
        };
        ClusterSpec {
            name: "nano1".to_string(),
            region: REGION.to_string(),
            filter: None,
            nodes: vec![spec("master"), spec("worker2")],
        }
    }

    #[tokio::test]
    async fn test_scenario() {
        let provider = scenario();
        let mut engine = engine(&provider);

        let all = engine.resolve_targets("*", false).await.unwrap();
        assert_eq!(all.iter().map(|n| (n.name.as_str(), n.index)).collect::<Vec<_>>(), vec![("master", 1), ("worker1", 2)]);

        assert_eq!(names(&engine.resolve_targets("worker*", false).await.unwrap()), vec!["worker1"]);
        assert_eq!(names(&engine.resolve_targets("1,2", false).await.unwrap()), vec!["master", "worker1"]);
        assert_eq!(names(&engine.resolve_targets("state=stop*", false).await.unwrap()), vec!["worker1"]);
        assert_eq!(names(&engine.resolve_targets("tags=cluster:nano1", false).await.unwrap()), vec!["master"]);
        assert_eq!(provider.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_target_makes_no_calls() {
        let provider = scenario();
        let mut engine = engine(&provider);

        let err = engine.resolve_targets("a=b=c", false).await.unwrap_err();
        assert!(matches!(err, FleetError::InvalidFilterSyntax { .. }));
        assert_eq!(provider.list_calls(), 0);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_attribute_selects_nothing() {
        let provider = scenario();
        let mut engine = engine(&provider);

        let nodes = engine.resolve_targets("platform=windows", true).await.unwrap();
        assert!(nodes.is_empty());
        assert_eq!(provider.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_no_scope() {
        let provider = scenario();
        let mut engine = TargetingEngine::new(provider.clone(), Vec::new(), Vec::new());

        let err = engine.resolve_targets("*", false).await.unwrap_err();
        assert!(matches!(err, FleetError::NoCloudScope));
        assert_eq!(provider.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_idempotent_identity() {
        let provider = scenario();
        let rules = vec![LoginRule {
            selector: "tags=cluster:nano1".to_string(),
            member_of: "nano1".to_string(),
            ..Default::default()
        }];
        let mut engine = TargetingEngine::new(provider.clone(), rules, vec![nano1()]);
        engine.use_cluster("nano1").unwrap();

        let first = engine.resolve_targets("*", false).await.unwrap();
        let second = engine.resolve_targets("*", false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_cluster_scope_synthesizes_absent_nodes() {
        let provider = scenario();
        let mut engine = TargetingEngine::new(provider.clone(), Vec::new(), vec![nano1()]);
        engine.use_cluster("nano1").unwrap();

        let nodes = engine.resolve_targets("*", false).await.unwrap();
        assert_eq!(engine.absent_count(), 1);

        let worker2 = nodes.iter().find(|n| n.name == "worker2").unwrap();
        assert!(!worker2.is_hydrated());
        assert_eq!(worker2.id(), "");
        assert_eq!(worker2.cluster, "nano1");

        // Cluster members are indexed before unassigned nodes
        assert_eq!(nodes.last().unwrap().name, "worker1");
        assert_eq!(nodes.last().unwrap().index, 3);

        // Cluster name as a target term
        assert_eq!(names(&engine.resolve_targets("nano1", false).await.unwrap()), vec!["master", "worker2"]);
    }

    #[tokio::test]
    async fn test_malformed_cluster_filter_is_reported() {
        let provider = scenario();
        let mut spec = nano1();
        spec.filter = Some("tags=cluster:nano1=x".to_string());
        let mut engine = TargetingEngine::new(provider.clone(), Vec::new(), vec![spec]);
        engine.use_cluster("nano1").unwrap();

        let err = engine.resolve_targets("*", false).await.unwrap_err();
        assert!(matches!(err, FleetError::InvalidFilterSyntax { .. }));
        assert_eq!(engine.absent_count(), 0);
        assert!(engine.any_nodes_from_target("*").await.is_err());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_node_selector_is_reported() {
        let provider = scenario();
        let mut spec = nano1();
        spec.nodes[0].selector = Some("name==master".to_string());
        let mut engine = TargetingEngine::new(provider.clone(), Vec::new(), vec![spec]);
        engine.use_cluster("nano1").unwrap();

        let err = engine.resolve_targets("master", false).await.unwrap_err();
        assert!(matches!(err, FleetError::InvalidFilterSyntax { .. }));
        assert!(!provider.calls().iter().any(|c| matches!(c, Call::Launch(_))));
    }

    #[tokio::test]
    async fn test_region_scope_skips_reconciliation() {
        let provider = scenario();
        let mut engine = TargetingEngine::new(provider.clone(), Vec::new(), vec![nano1()]);
        engine.use_region(REGION);

        let nodes = engine.resolve_targets("*", false).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(engine.absent_count(), 0);
    }

    #[tokio::test]
    async fn test_rules_apply_first_match() {
        let provider = Arc::new(MockProvider::with_region(
            REGION,
            vec![
                instance("i-1", "api", "running", &[("env", "prod")]),
                instance("i-2", "dev", "running", &[]),
            ],
        ));
        let rules = vec![
            LoginRule {
                selector: "tags=env:prod".to_string(),
                member_of: "P".to_string(),
                ..Default::default()
            },
            LoginRule {
                selector: "*".to_string(),
                member_of: "C".to_string(),
                ..Default::default()
            },
        ];
        let mut engine = TargetingEngine::new(provider.clone(), rules, Vec::new());
        engine.use_region(REGION);

        let nodes = engine.resolve_targets("*", false).await.unwrap();
        let api = nodes.iter().find(|n| n.name == "api").unwrap();
        assert_eq!(api.cluster, "P");
        assert_eq!(names(&engine.resolve_targets("C", false).await.unwrap()), vec!["dev"]);
    }

    #[tokio::test]
    async fn test_unknown_cluster() {
        let provider = scenario();
        let mut engine = engine(&provider);
        let err = engine.use_cluster("nope").unwrap_err();
        assert!(matches!(err, FleetError::UnknownCluster(_)));
        // Scope is unchanged
        assert_eq!(engine.scope().unwrap().cluster, None);
    }

    #[tokio::test]
    async fn test_running_nodes_filter() {
        let provider = scenario();
        let mut engine = engine(&provider);

        assert_eq!(names(&engine.running_nodes_from_target("*").await.unwrap()), vec!["master"]);
        assert!(engine.running_nodes_from_target("worker1").await.unwrap().is_empty());
        assert_eq!(engine.any_nodes_from_target("worker1").await.unwrap().len(), 1);
        assert!(engine.any_nodes_from_target("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let provider = scenario();
        provider.fail_next_list();
        let mut engine = engine(&provider);

        let err = engine.resolve_targets("*", false).await.unwrap_err();
        assert!(matches!(err, FleetError::Provider { .. }));
        assert!(engine.needs_fetch());
    }

    #[tokio::test]
    async fn test_apply_invalidates_region() {
        let provider = scenario();
        let mut engine = engine(&provider);

        let nodes = engine.resolve_targets("worker1", false).await.unwrap();
        let plan = ops::plan(Operation::Start, &nodes, None);
        engine.apply(&plan).await.unwrap();

        assert_eq!(provider.calls(), vec![Call::Start(vec!["i-2".to_string()])]);
        assert!(engine.needs_fetch());
        engine.resolve_targets("*", false).await.unwrap();
        assert_eq!(provider.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_tag_invalidates_region() {
        let provider = scenario();
        let mut engine = engine(&provider);

        let nodes = engine.resolve_targets("*", false).await.unwrap();
        let tags = BTreeMap::from([("owner".to_string(), "ops".to_string())]);
        assert_eq!(engine.tag(&nodes, &tags, false).await.unwrap(), 2);

        assert!(matches!(provider.calls()[0], Call::CreateTags(ref ids, _) if ids.len() == 2));
        assert!(engine.needs_fetch());
    }
}
