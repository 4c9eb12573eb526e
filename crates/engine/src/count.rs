//! Per-tag totals, recomputed from the live forest on every call.

use std::collections::BTreeMap;

use tagtree_settings::TreeSettings;

use crate::engine::{TreeEngine, DEFAULT_TAG};
use crate::node::Node;

/// Which hide list applies to a counting pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CountScope {
    StatusBar,
    ActivityBar,
}

impl TreeEngine {
    /// Per-tag totals for the status bar, optionally narrowed to one file.
    /// 狀態列的各標籤統計，可限定單一檔案。
    pub fn tag_counts_for_status_bar(&self, file_filter: Option<&str>) -> BTreeMap<String, usize> {
        tag_counts(
            self.roots(),
            self.settings(),
            CountScope::StatusBar,
            file_filter,
        )
    }

    /// Per-tag totals for the activity bar badge.
    /// 活動列徽章的各標籤統計。
    pub fn tag_counts_for_activity_bar(&self) -> BTreeMap<String, usize> {
        tag_counts(self.roots(), self.settings(), CountScope::ActivityBar, None)
    }
}

pub(crate) fn tag_counts(
    nodes: &[Node],
    settings: &TreeSettings,
    scope: CountScope,
    file_filter: Option<&str>,
) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    accumulate(nodes, settings, scope, file_filter, &mut counts);
    counts
}

fn accumulate(
    nodes: &[Node],
    settings: &TreeSettings,
    scope: CountScope,
    file_filter: Option<&str>,
    counts: &mut BTreeMap<String, usize>,
) {
    for node in nodes {
        if let Some(detail) = node.match_detail() {
            if detail.is_extra_line || !node.is_visible() {
                continue;
            }
            if file_filter.is_some_and(|file| node.fs_path != file) {
                continue;
            }
            let tag = detail.tag.clone().unwrap_or_else(|| DEFAULT_TAG.to_string());
            let hidden = match scope {
                CountScope::StatusBar => settings.should_hide_from_status_bar(&tag),
                CountScope::ActivityBar => settings.should_hide_from_activity_bar(&tag),
            };
            if !hidden {
                *counts.entry(tag).or_insert(0) += 1;
            }
            continue;
        }
        accumulate(&node.children, settings, scope, file_filter, counts);
    }
}

/// Total visible matches beneath `node`, shown next to container labels.
pub(crate) fn visible_matches(node: &Node) -> usize {
    let mut total = 0;
    for child in &node.children {
        if child.is_match() {
            if child.is_visible() {
                total += 1;
            }
        } else {
            total += visible_matches(child);
        }
    }
    total
}
