// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Error kinds surfaced by the targeting engine
//!
//! None of these terminate the shell: the REPL logs them and moves on to the
//! next command. "No matches" is deliberately absent here, an empty node list
//! is a normal result.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    /// No region (and therefore no inventory) has been selected
    #[error("no cloud scope selected, see 'use region <region>' or 'use cluster <name>'")]
    NoCloudScope,

    /// A target expression term could not be parsed
    #[error("invalid filter '{term}': {reason}")]
    InvalidFilterSyntax { term: String, reason: String },

    /// The cloud provider rejected or failed a call; the cache is left untouched
    #[error("provider error in {region}: {detail}")]
    Provider { region: String, detail: String },

    /// Neither a login rule nor a key mapping yields a keyfile for this node
    #[error("no login keyfile for node '{node}' (key '{key}'), add a login rule or a keyfile mapping")]
    AmbiguousLogin { node: String, key: String },

    /// Node is running but exposes no address to connect to
    #[error("node '{node}' has no public or private address")]
    NoAddress { node: String },

    /// A cluster name that is not in any loaded cluster document
    #[error("cluster '{0}' is not defined, see 'clusters'")]
    UnknownCluster(String),
}

impl FleetError {
    pub fn invalid_filter(term: impl Into<String>, reason: impl Into<String>) -> Self {
        FleetError::InvalidFilterSyntax {
            term: term.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a provider failure, keeping the full error chain as detail
    pub fn provider(region: &str, err: &anyhow::Error) -> Self {
        FleetError::Provider {
            region: region.to_string(),
            detail: format!("{:#}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};

    #[test]
    fn test_invalid_filter_message() {
        let err = FleetError::invalid_filter("a=b=c", "more than one '='");
        assert_eq!(err.to_string(), "invalid filter 'a=b=c': more than one '='");
    }

    #[test]
    fn test_provider_keeps_error_chain() {
        let inner: anyhow::Result<()> = Err(anyhow!("connection reset"));
        let err = inner.context("listing instances").unwrap_err();

        let fleet_err = FleetError::provider("eu-west-1", &err);
        let msg = fleet_err.to_string();
        assert!(msg.contains("eu-west-1"));
        assert!(msg.contains("listing instances"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_converts_into_anyhow() {
        let err: anyhow::Error = FleetError::NoCloudScope.into();
        assert!(err.downcast_ref::<FleetError>().is_some());
    }
}
