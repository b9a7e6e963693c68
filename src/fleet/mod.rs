// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Fleet targeting: node model, filter language, inventory cache, login
//! rules, cluster reconciliation and the operations built on top of them

pub mod cache;
pub mod cluster;
pub mod filter;
pub mod login;
pub mod node;
pub mod ops;
pub mod provider;
pub mod registry;
pub mod selector;
pub mod ssh;
pub mod targeting;

#[cfg(test)]
pub mod testing;

pub use cluster::{ClusterDocument, ClusterSpec, NodeSpec};
pub use login::LoginRule;
pub use node::{Attribute, InstanceState, Node};
pub use ops::Operation;
pub use provider::{CloudProvider, InventoryFileProvider};
pub use ssh::{OpenSsh, RemoteShell};
pub use targeting::{Scope, TargetingEngine};
