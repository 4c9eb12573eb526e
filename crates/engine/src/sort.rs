//! Ordering for the match forest. Folders lead, tag heads follow the
//! configured tag order, and everything else falls back to path, line,
//! column, then allocation order.

use std::cmp::Ordering;

use tagtree_settings::TreeSettings;

use crate::node::{Node, NodeKind};

pub(crate) fn sort_forest(roots: &mut [Node], settings: &TreeSettings) {
    if !settings.sort_tree {
        return;
    }
    if settings.tags_only {
        if settings.sort_tags_only_alphabetically {
            roots.sort_by(compare_labels);
        } else {
            roots.sort_by(|a, b| compare_tag_order(a, b, settings));
        }
    } else {
        roots.sort_by(|a, b| compare_path_view(a, b, settings));
    }
    for root in roots.iter_mut() {
        sort_children(root, settings);
    }
}

fn sort_children(node: &mut Node, settings: &TreeSettings) {
    node.children
        .sort_by(|a, b| compare_path_view(a, b, settings));
    for child in &mut node.children {
        sort_children(child, settings);
    }
}

fn compare_path_view(a: &Node, b: &Node, settings: &TreeSettings) -> Ordering {
    let ordering = folders_first(a, b);
    if ordering != Ordering::Equal {
        return ordering;
    }
    if a.is_root_tag_node() && b.is_root_tag_node() {
        let ordering = tag_order_index(a, settings).cmp(&tag_order_index(b, settings));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.fs_path
        .cmp(&b.fs_path)
        .then_with(|| a.line().cmp(&b.line()))
        .then_with(|| a.column().cmp(&b.column()))
        .then_with(|| allocation_order(a, b))
}

fn compare_tag_order(a: &Node, b: &Node, settings: &TreeSettings) -> Ordering {
    sub_tag_heads_first(a, b)
        .then_with(|| tag_order_index(a, settings).cmp(&tag_order_index(b, settings)))
        .then_with(|| compare_path_view(a, b, settings))
}

/// Sub-tag groups keep their lead position through re-sorts.
fn sub_tag_heads_first(a: &Node, b: &Node) -> Ordering {
    let a_head = matches!(a.kind, NodeKind::SubTag { .. });
    let b_head = matches!(b.kind, NodeKind::SubTag { .. });
    b_head.cmp(&a_head)
}

fn compare_labels(a: &Node, b: &Node) -> Ordering {
    a.label
        .to_lowercase()
        .cmp(&b.label.to_lowercase())
        .then_with(|| a.label.cmp(&b.label))
        .then_with(|| allocation_order(a, b))
}

/// Tags absent from the configured order sort after all ordered tags.
fn tag_order_index(node: &Node, settings: &TreeSettings) -> usize {
    node.tag()
        .and_then(|tag| settings.tag_index(tag))
        .unwrap_or(usize::MAX)
}

fn folders_first(a: &Node, b: &Node) -> Ordering {
    b.is_folder().cmp(&a.is_folder())
}

fn allocation_order(a: &Node, b: &Node) -> Ordering {
    a.id.ordering_key().cmp(&b.id.ordering_key())
}
