// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Single-term selectors and shell-style glob matching
//!
//! Term classification:
//! - contains `=`: attribute predicate (`state=stop*`) or tag predicate
//!   (`tags=env:prod`, `tags="aws:cloudformation:stack-name":web*`)
//! - all digits: display index (`3`)
//! - equal to a known cluster label: cluster name (`nano1`)
//! - anything else: name glob (`worker[0-2]`)

use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use tracing::debug;

use super::node::{Attribute, Node};
use crate::error::FleetError;

/// Case-insensitive shell glob (`*`, `?`, `[...]`, `[!...]`) anchored on both ends
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    pub fn new(pattern: &str) -> Result<Self, FleetError> {
        let regex = RegexBuilder::new(&translate(pattern))
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
            .map_err(|e| FleetError::invalid_filter(pattern, format!("bad pattern: {}", e)))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// An empty value only ever matches an empty pattern
    pub fn matches(&self, text: &str) -> bool {
        if text.is_empty() {
            return self.pattern.is_empty();
        }
        self.regex.is_match(text)
    }
}

/// Translate a glob into a full-match regex, fnmatch style
fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // Find the closing bracket; a leading '!' and a leading ']' are literal members
                let mut j = i + 1;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }

                if j >= chars.len() {
                    out.push_str(r"\[");
                } else {
                    let mut body = &chars[i + 1..j];
                    out.push('[');
                    if body.first() == Some(&'!') {
                        out.push('^');
                        body = &body[1..];
                    }
                    for &c in body {
                        if matches!(c, '\\' | '[' | ']' | '^' | '&' | '~') {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push(']');
                    i = j;
                }
            }
            c => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
            }
        }
        i += 1;
    }

    out.push('$');
    out
}

/// One parsed clause of a target expression
#[derive(Debug, Clone)]
pub enum FilterTerm {
    Index(usize),
    ClusterName(String),
    NameGlob(Glob),
    /// `None` for an attribute nodes do not have; never matches
    AttrGlob(Option<Attribute>, Glob),
    TagGlob(Glob, Glob),
}

impl FilterTerm {
    /// Classify and compile one raw term
    ///
    /// `clusters` holds the cluster labels known in the working set; a bare
    /// term equal to one of them selects that cluster instead of a name glob.
    pub fn parse(raw: &str, clusters: &HashSet<String>) -> Result<Self, FleetError> {
        let term = raw.trim();
        if term.is_empty() {
            return Err(FleetError::invalid_filter(raw, "empty term"));
        }

        if let Some((key, value)) = term.split_once('=') {
            if value.contains('=') {
                return Err(FleetError::invalid_filter(term, "more than one '='"));
            }
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                return Err(FleetError::invalid_filter(
                    term,
                    "expected <attr>=<pattern> with both sides present",
                ));
            }

            if key.eq_ignore_ascii_case("tags") || key.eq_ignore_ascii_case("tag") {
                return parse_tag(term, value);
            }

            let attr = Attribute::lookup(key);
            if attr.is_none() {
                debug!(term = %term, "Unknown attribute, term matches no node");
            }
            return Ok(FilterTerm::AttrGlob(attr, Glob::new(value)?));
        }

        if term.chars().all(|c| c.is_ascii_digit()) {
            let index = term
                .parse::<usize>()
                .map_err(|e| FleetError::invalid_filter(term, e.to_string()))?;
            return Ok(FilterTerm::Index(index));
        }

        if clusters.contains(term) {
            return Ok(FilterTerm::ClusterName(term.to_string()));
        }

        Ok(FilterTerm::NameGlob(Glob::new(term)?))
    }

    pub fn matches(&self, node: &Node) -> bool {
        match self {
            FilterTerm::Index(index) => node.index == *index,
            FilterTerm::ClusterName(cluster) => node.cluster == *cluster,
            FilterTerm::NameGlob(glob) => glob.matches(&node.name),
            FilterTerm::AttrGlob(Some(attr), glob) => glob.matches(&node.attribute(*attr)),
            FilterTerm::AttrGlob(None, _) => false,
            FilterTerm::TagGlob(key, value) => node
                .tags()
                .any(|(k, v)| key.matches(k) && value.matches(v)),
        }
    }
}

/// `key:value`, split at the last colon; a quote pair around the key is dropped
fn parse_tag(term: &str, spec: &str) -> Result<FilterTerm, FleetError> {
    let (key, value) = spec
        .rsplit_once(':')
        .ok_or_else(|| FleetError::invalid_filter(term, "tag filters look like tags=<key>:<value>"))?;

    let key = strip_quotes(key.trim());
    let value = value.trim();
    if key.is_empty() || value.is_empty() {
        return Err(FleetError::invalid_filter(
            term,
            "tag filter needs both a key and a value pattern",
        ));
    }

    Ok(FilterTerm::TagGlob(Glob::new(key)?, Glob::new(value)?))
}

fn strip_quotes(s: &str) -> &str {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}
