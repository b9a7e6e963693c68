// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Cluster reconciliation and display indexing
//!
//! Reconciliation lines the live inventory up against a cluster document:
//! every configured node claims the live instances its selector matches, and
//! configured nodes that claim nothing show up as absent placeholders.

use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

use super::cluster::ClusterSpec;
use super::filter;
use super::node::Node;
use crate::error::FleetError;

/// Reconcile live nodes against one cluster
///
/// Returns every live node (claimed or not) followed by one absent node per
/// configured entry that matched nothing, plus the number of absent nodes.
/// Unclaimed live nodes are returned unchanged. A malformed cluster filter or
/// node selector fails the whole reconciliation.
pub fn reconcile(live: Vec<Node>, spec: &ClusterSpec) -> Result<(Vec<Node>, usize), FleetError> {
    let mut nodes = live;

    let scoped: HashSet<usize> = filter::select_positions(&nodes, &spec.filter())?
        .into_iter()
        .collect();

    let mut claimed: HashSet<usize> = HashSet::new();
    let mut absent = Vec::new();

    for node_spec in &spec.nodes {
        let selector = node_spec.selector();
        let matches: Vec<usize> = filter::select_positions(&nodes, &selector)?
            .into_iter()
            .filter(|pos| scoped.contains(pos) && !claimed.contains(pos))
            .collect();

        if matches.is_empty() {
            debug!(cluster = %spec.name, node = %node_spec.nodename, "Configured node not found, adding placeholder");
            absent.push(Node::absent(node_spec.clone(), &spec.name));
            continue;
        }

        for pos in matches {
            let node = &mut nodes[pos];
            node.name = node_spec.nodename.clone();
            if !node_spec.username.is_empty() {
                node.username = node_spec.username.clone();
            }
            if let Some(keyfile) = node_spec.keyfile.as_ref().filter(|k| !k.is_empty()) {
                node.keyfile = keyfile.clone();
            }
            node.cluster = spec.name.clone();
            claimed.insert(pos);
        }
    }

    let absent_count = absent.len();
    debug!(
        cluster = %spec.name,
        live = nodes.len(),
        claimed = claimed.len(),
        absent = absent_count,
        "Reconciled cluster"
    );
    nodes.extend(absent);
    Ok((nodes, absent_count))
}

/// Sort by (cluster, vpc) with unassigned nodes last, then number from 1
pub fn index(nodes: &mut [Node]) {
    nodes.sort_by(compare);
    for (pos, node) in nodes.iter_mut().enumerate() {
        node.index = pos + 1;
    }
}

fn compare(a: &Node, b: &Node) -> Ordering {
    a.cluster
        .is_empty()
        .cmp(&b.cluster.is_empty())
        .then_with(|| a.cluster.cmp(&b.cluster))
        .then_with(|| a.vpc_id().cmp(b.vpc_id()))
}
