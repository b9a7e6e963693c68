// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::borrow::Cow;
use std::collections::HashSet;

use comfy_table::{Table, presets::ASCII_BORDERS_ONLY_CONDENSED};

use super::NodeTable;

/// Maximum width for list-valued columns
const MAX_LIST_COLUMN_WIDTH: usize = 60;

/// Columns that should have width limits in table mode
const WIDE_COLUMNS: &[&str] = &["tags", "security_groups", "public_dns"];

/// Truncate a string to max_len chars, adding "..." if truncated
fn truncate_value(s: &str, max_len: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_len {
        Cow::Borrowed(s)
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        Cow::Owned(format!("{}...", truncated))
    }
}

pub struct TableFormatter;

impl TableFormatter {
    pub fn format(result: &NodeTable) -> String {
        if result.rows.is_empty() {
            return "(0 nodes)".to_string();
        }

        let mut table = Table::new();
        table.load_preset(ASCII_BORDERS_ONLY_CONDENSED);

        let truncate_cols: HashSet<usize> = result
            .columns
            .iter()
            .enumerate()
            .filter(|(_, col)| WIDE_COLUMNS.contains(&col.as_str()))
            .map(|(idx, _)| idx)
            .collect();

        table.set_header(&result.columns);

        for row in &result.rows {
            let cells: Vec<Cow<'_, str>> = row
                .iter()
                .enumerate()
                .map(|(idx, val)| {
                    if truncate_cols.contains(&idx) {
                        truncate_value(val, MAX_LIST_COLUMN_WIDTH)
                    } else {
                        Cow::Borrowed(val.as_str())
                    }
                })
                .collect();
            table.add_row(cells);
        }

        let count = result.rows.len();
        format!(
            "{}\n({} node{})",
            table,
            count,
            if count == 1 { "" } else { "s" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_value_short() {
        let result = truncate_value("hello", 10);
        assert_eq!(result, "hello");
        assert!(matches!(result, Cow::Borrowed(_)));
    }

    #[test]
    fn test_truncate_value_too_long() {
        let result = truncate_value("this is a very long string that needs truncation", 20);
        assert!(result.ends_with("..."));
        assert_eq!(result.chars().count(), 20);
        assert!(matches!(result, Cow::Owned(_)));
    }

    #[test]
    fn test_truncate_tags_column() {
        let result = NodeTable {
            columns: vec!["name".to_string(), "tags".to_string()],
            rows: vec![vec!["web1".to_string(), "a".repeat(80)]],
        };

        let output = TableFormatter::format(&result);
        assert!(!output.contains(&"a".repeat(80)));
        assert!(output.contains("..."));
        assert!(output.ends_with("(1 node)"));
    }

    #[test]
    fn test_no_truncate_normal_column() {
        let result = NodeTable {
            columns: vec!["name".to_string(), "id".to_string()],
            rows: vec![vec!["web1".to_string(), "a".repeat(80)]],
        };

        let output = TableFormatter::format(&result);
        assert!(output.contains(&"a".repeat(80)));
    }

    #[test]
    fn test_empty() {
        let result = NodeTable {
            columns: vec!["name".to_string()],
            rows: vec![],
        };
        assert_eq!(TableFormatter::format(&result), "(0 nodes)");
    }
}
