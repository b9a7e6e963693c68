// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Target expression resolution
//!
//! A target expression is a comma-separated list of selector terms joined
//! with OR semantics. Empty and `*` select the whole working set. When no
//! structured term matches, commands that opt in fall back to a
//! case-insensitive substring search over every tag value and attribute.

use std::collections::HashSet;
use tracing::debug;

use super::node::{Attribute, Node};
use super::selector::FilterTerm;
use crate::error::FleetError;

/// True for expressions that select everything
pub fn is_identity(target: &str) -> bool {
    let target = target.trim();
    target.is_empty() || target == "*"
}

/// Non-empty, trimmed terms of an expression
pub fn split_terms(target: &str) -> impl Iterator<Item = &str> {
    target.split(',').map(str::trim).filter(|t| !t.is_empty())
}

/// Cluster labels present in a working set
pub fn known_clusters(nodes: &[Node]) -> HashSet<String> {
    nodes
        .iter()
        .filter(|n| !n.cluster.is_empty())
        .map(|n| n.cluster.clone())
        .collect()
}

/// Parse every term; any malformed term fails the whole expression
pub fn parse_expression(
    target: &str,
    clusters: &HashSet<String>,
) -> Result<Vec<FilterTerm>, FleetError> {
    split_terms(target)
        .map(|term| FilterTerm::parse(term, clusters))
        .collect()
}

/// Syntax check that needs no inventory, run before anything is fetched
pub fn validate(target: &str) -> Result<(), FleetError> {
    if is_identity(target) {
        return Ok(());
    }
    parse_expression(target, &HashSet::new()).map(|_| ())
}

/// Positions in `nodes` selected by the structured terms of `target`
pub fn select_positions(nodes: &[Node], target: &str) -> Result<Vec<usize>, FleetError> {
    if is_identity(target) {
        return Ok((0..nodes.len()).collect());
    }

    let terms = parse_expression(target, &known_clusters(nodes))?;
    Ok(nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| terms.iter().any(|term| term.matches(node)))
        .map(|(pos, _)| pos)
        .collect())
}

/// Resolve `target` against `nodes`
///
/// Each node appears at most once, ordered by display index. An empty result
/// is not an error.
pub fn resolve(nodes: &[Node], target: &str, allow_search: bool) -> Result<Vec<Node>, FleetError> {
    if is_identity(target) {
        return Ok(nodes.to_vec());
    }

    let mut positions = select_positions(nodes, target)?;

    if positions.is_empty() && allow_search {
        let needles: Vec<String> = split_terms(target).map(|t| t.to_lowercase()).collect();
        debug!(target = %target, "No structured match, falling back to free-text search");
        positions = nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| needles.iter().any(|needle| search_node(node, needle)))
            .map(|(pos, _)| pos)
            .collect();
    }

    let mut selected: Vec<Node> = positions.into_iter().map(|pos| nodes[pos].clone()).collect();
    selected.sort_by_key(|n| n.index);
    Ok(selected)
}

/// Substring search over tag values and the full attribute catalogue
fn search_node(node: &Node, needle: &str) -> bool {
    node.tags()
        .any(|(_, value)| value.to_lowercase().contains(needle))
        || Attribute::ALL
            .iter()
            .any(|attr| node.attribute(*attr).to_lowercase().contains(needle))
}
