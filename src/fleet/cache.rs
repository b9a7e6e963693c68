// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Per-region inventory cache
//!
//! A region is either cached or absent. A lookup on an absent region lists the
//! region through the provider and stores the result; nothing expires on its
//! own. Callers invalidate a region after any operation that may have changed
//! its instances, or when the operator asks for a refresh.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::node::Node;
use super::provider::CloudProvider;
use crate::error::FleetError;

/// Node list of one region with the time it was listed
struct CachedInventory {
    nodes: Vec<Node>,
    fetched_at: Instant,
}

#[derive(Default)]
pub struct RegionCache {
    entries: HashMap<String, CachedInventory>,
}

impl RegionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cached(&self, region: &str) -> bool {
        self.entries.contains_key(region)
    }

    /// Time since the region was listed, None when not cached
    pub fn age(&self, region: &str) -> Option<Duration> {
        self.entries.get(region).map(|c| c.fetched_at.elapsed())
    }

    /// Cached nodes for `region`, listing them from the provider on a miss
    ///
    /// A provider failure leaves the region absent and is returned as
    /// `FleetError::Provider`; there is no retry.
    pub async fn get_or_fetch(
        &mut self,
        region: &str,
        provider: &dyn CloudProvider,
    ) -> Result<&[Node], FleetError> {
        let cached = match self.entries.entry(region.to_string()) {
            Entry::Occupied(entry) => {
                debug!(region = %region, "Inventory cache hit");
                entry.into_mut()
            }
            Entry::Vacant(entry) => {
                let start = Instant::now();
                let records = provider
                    .list_instances(region)
                    .await
                    .map_err(|e| FleetError::provider(region, &e))?;

                let nodes: Vec<Node> = records
                    .into_iter()
                    .enumerate()
                    .map(|(pos, record)| Node::hydrated(record, pos))
                    .collect();

                info!(
                    region = %region,
                    count = nodes.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Fetched inventory"
                );

                entry.insert(CachedInventory {
                    nodes,
                    fetched_at: Instant::now(),
                })
            }
        };

        Ok(&cached.nodes)
    }

    /// Drop the cached list for one region; returns whether anything was cached
    pub fn invalidate(&mut self, region: &str) -> bool {
        let removed = self.entries.remove(region).is_some();
        if removed {
            debug!(region = %region, "Invalidated inventory cache");
        }
        removed
    }
}
