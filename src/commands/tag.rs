// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{Command, Session};
use crate::fleet::ops::parse_tags;

pub(super) fn commands() -> Vec<Arc<dyn Command>> {
    vec![Arc::new(Tag { remove: false }), Arc::new(Tag { remove: true })]
}

/// tag / untag
struct Tag {
    remove: bool,
}

#[async_trait]
impl Command for Tag {
    fn name(&self) -> &'static str {
        if self.remove { "untag" } else { "tag" }
    }

    fn usage(&self) -> &'static str {
        if self.remove {
            "untag filter key[=value][,key[=value]...] - remove tags from nodes"
        } else {
            "tag filter key=value[,key=value...] - add tags to nodes"
        }
    }

    fn help(&self) -> &'static str {
        if self.remove {
            "A key without a value removes the tag whatever its value.\n\n\
             Examples:\n  untag worker* env=dev\n  untag state=running env"
        } else {
            "Keys starting with 'aws' are reserved.\n\n\
             Examples:\n  tag worker* env=dev\n  tag 1,2 owner=ops,tier=web"
        }
    }

    async fn run(&self, args: &str, session: &mut Session) -> Result<()> {
        let mut parts = args.split_whitespace();
        let (Some(target), Some(tag_spec), None) = (parts.next(), parts.next(), parts.next())
        else {
            bail!("usage: {}", self.usage());
        };

        let tags = parse_tags(tag_spec, self.remove)?;
        let nodes = session.any_nodes(target).await?;
        if nodes.is_empty() {
            return Ok(());
        }

        let count = session.engine.tag(&nodes, &tags, self.remove).await?;
        info!(count, "Tagged nodes");
        session.ok();
        Ok(())
    }
}
