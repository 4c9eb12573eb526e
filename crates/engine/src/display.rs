//! Read surface of the engine: child listing with status entries and
//! folder compaction, plus per-node display records for a host view.
//! 引擎的唯讀介面：含狀態列項與資料夾壓縮的子節點列表，以及供宿主
//! 檢視使用的節點顯示資料。

use crate::engine::{TreeEngine, DEFAULT_TAG};
use crate::node::{MatchDetail, Node, NodeId, NodeKind};
use crate::{count, format};

/// An ephemeral status row shown above the tree, never part of the forest.
/// 顯示於樹頂端的暫時狀態列，不屬於樹本身。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusNode {
    pub label: String,
    pub tooltip: Option<String>,
    pub icon: String,
    /// Set when the forest holds no content at all, filtered or not.
    pub empty: bool,
}

/// One row handed to the host: either a forest node or a status entry.
#[derive(Clone, Debug)]
pub enum TreeEntry<'a> {
    Node(&'a Node),
    Status(StatusNode),
}

impl<'a> TreeEntry<'a> {
    pub fn node(&self) -> Option<&'a Node> {
        match self {
            TreeEntry::Node(node) => Some(node),
            TreeEntry::Status(_) => None,
        }
    }

    pub fn status(&self) -> Option<&StatusNode> {
        match self {
            TreeEntry::Node(_) => None,
            TreeEntry::Status(status) => Some(status),
        }
    }

    pub fn is_status(&self) -> bool {
        matches!(self, TreeEntry::Status(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Collapsible {
    None,
    Collapsed,
    Expanded,
}

/// Abstract icon selector; the host maps keys to its own art.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IconKey {
    Tag(String),
    Window,
    Folder,
    File,
    Status(String),
    NoIcon,
}

/// Menu/behaviour class of an item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemContext {
    Folder,
    File,
}

/// Where activating a match should land, zero-based for the host editor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NavigationTarget {
    pub fs_path: String,
    pub line: u32,
    pub column: u32,
}

/// Everything a host needs to render one row.
/// 宿主繪製單列所需的全部資料。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayItem {
    pub id: Option<NodeId>,
    pub label: String,
    pub description: Option<String>,
    pub tooltip: Option<String>,
    pub icon: IconKey,
    pub collapsible: Collapsible,
    pub navigation: Option<NavigationTarget>,
    pub context: Option<ItemContext>,
    pub fs_path: Option<String>,
}

impl TreeEngine {
    /// Lists the rows under `node`, or the top level when `node` is `None`.
    /// 列出 `node` 之下的列；`node` 為 `None` 時列出最上層。
    ///
    /// The top-level call primes the refresh countdown and may prepend
    /// status entries; child calls never do.
    pub fn children<'a>(&'a self, node: Option<&'a Node>) -> Vec<TreeEntry<'a>> {
        match node {
            None => self.root_entries(),
            Some(node) => self.node_children(node),
        }
    }

    /// Builds the display record for one row.
    /// 建立單列的顯示資料。
    pub fn display_item(&self, entry: &TreeEntry<'_>) -> DisplayItem {
        match entry {
            TreeEntry::Status(status) => DisplayItem {
                id: None,
                label: String::new(),
                description: Some(status.label.clone()),
                tooltip: status.tooltip.clone(),
                icon: IconKey::Status(status.icon.clone()),
                collapsible: Collapsible::None,
                navigation: None,
                context: None,
                fs_path: None,
            },
            TreeEntry::Node(node) => self.node_item(node),
        }
    }

    fn root_entries(&self) -> Vec<TreeEntry<'_>> {
        let available: Vec<&Node> = self
            .roots()
            .iter()
            .filter(|node| node.is_available())
            .collect();
        let visible: Vec<&Node> = available
            .iter()
            .copied()
            .filter(|node| node.is_visible())
            .collect();
        self.nodes_to_get.set(visible.len() as i64);

        let mut entries = Vec::new();
        if let Some(status) = self.status_entry(available.is_empty(), visible.is_empty()) {
            entries.push(TreeEntry::Status(status));
        }
        for node in visible {
            entries.push(TreeEntry::Node(compact_root(node)));
        }
        entries
    }

    fn node_children<'a>(&'a self, node: &'a Node) -> Vec<TreeEntry<'a>> {
        if let Some(detail) = node.match_detail() {
            return detail
                .extra_lines
                .iter()
                .filter(|extra| extra.is_visible())
                .map(TreeEntry::Node)
                .collect();
        }
        let mut target = node;
        if self.settings().compact_folders && node.tag().is_none() {
            target = compaction_tail(node);
        }
        target
            .children
            .iter()
            .filter(|child| child.is_visible())
            .map(TreeEntry::Node)
            .collect()
    }

    fn status_entry(&self, no_available: bool, no_visible: bool) -> Option<StatusNode> {
        let settings = self.settings();
        let mut filters = Vec::new();
        if let Some(text) = self.current_filter() {
            filters.push(format!("Filter: {text}"));
        }
        for glob in &settings.include_globs {
            filters.push(format!("Include: {glob}"));
        }
        for glob in &settings.exclude_globs {
            filters.push(format!("Exclude: {glob}"));
        }

        let mut status = if filters.is_empty() {
            None
        } else {
            let plural = if filters.len() == 1 { "" } else { "s" };
            Some(StatusNode {
                label: format!("{} filter{plural} active", filters.len()),
                tooltip: Some(filters.join("\n")),
                icon: "filter".to_string(),
                empty: false,
            })
        };
        if no_visible {
            match &mut status {
                Some(status) => {
                    status.label.push_str(", Nothing found");
                    status.empty = no_available;
                }
                None => {
                    status = Some(StatusNode {
                        label: "Nothing found".to_string(),
                        tooltip: None,
                        icon: "issues".to_string(),
                        empty: no_available,
                    });
                }
            }
        }
        status
    }

    fn node_item(&self, node: &Node) -> DisplayItem {
        let settings = self.settings();
        let mut item = DisplayItem {
            id: Some(node.id),
            label: node.label.clone(),
            description: None,
            tooltip: None,
            icon: self.icon_for(node),
            collapsible: self.collapsible_for(node),
            navigation: None,
            context: context_for(node),
            fs_path: Some(node.fs_path.clone()),
        };

        if let Some(detail) = node.match_detail() {
            item.label = self.match_label(node, detail);
            if !settings.tooltip_format.is_empty() {
                item.tooltip = Some(format::format_label(&settings.tooltip_format, node, detail));
            }
            item.navigation = Some(NavigationTarget {
                fs_path: node.fs_path.clone(),
                line: detail.line,
                column: detail.column.saturating_sub(1),
            });
        } else {
            if settings.compact_folders && node.tag().is_none() {
                item.label = compacted_label(node);
            }
            if let NodeKind::Path {
                path_label: Some(path_label),
                ..
            } = &node.kind
            {
                item.label = format!("{} {path_label}", item.label);
            }
            if settings.show_counts && !node.is_workspace() {
                item.description = Some(format!("({})", count::visible_matches(node)));
            }
        }

        self.note_materialized(node, item.collapsible == Collapsible::Expanded);
        item
    }

    pub(crate) fn match_label(&self, node: &Node, detail: &MatchDetail) -> String {
        let settings = self.settings();
        if !settings.label_format.is_empty() && detail.extra_lines.is_empty() {
            return format::format_label(&settings.label_format, node, detail);
        }
        let grouped = settings.group_by_tag || settings.tags_only;
        if !grouped && !detail.is_extra_line {
            if let Some(tag) = &detail.tag {
                if detail.extra_lines.is_empty() {
                    return format!("{tag} {}", node.label);
                }
                // Multi-line matches show the tag alone above their extras.
                return tag.clone();
            }
        }
        node.label.clone()
    }

    fn icon_for(&self, node: &Node) -> IconKey {
        let settings = self.settings();
        match &node.kind {
            NodeKind::Workspace => IconKey::Window,
            NodeKind::Tag { tag } => IconKey::Tag(tag.clone()),
            NodeKind::SubTag { .. } => IconKey::NoIcon,
            NodeKind::Path { tag: Some(tag), .. } => IconKey::Tag(tag.clone()),
            NodeKind::Path {
                sub_tag: Some(_), ..
            } => IconKey::NoIcon,
            NodeKind::Path {
                is_folder: true, ..
            } => IconKey::Folder,
            NodeKind::Path { .. } => IconKey::File,
            NodeKind::Match(detail) => {
                if detail.is_extra_line {
                    return IconKey::NoIcon;
                }
                if settings.hide_icons_when_grouped
                    && (settings.group_by_tag || settings.tags_only)
                {
                    return IconKey::NoIcon;
                }
                IconKey::Tag(
                    detail
                        .tag
                        .clone()
                        .unwrap_or_else(|| DEFAULT_TAG.to_string()),
                )
            }
        }
    }

    fn collapsible_for(&self, node: &Node) -> Collapsible {
        if let Some(detail) = node.match_detail() {
            return if detail.extra_lines.is_empty() {
                Collapsible::None
            } else {
                Collapsible::Expanded
            };
        }
        match self.expanded_override(&node.fs_path) {
            Some(true) => Collapsible::Expanded,
            Some(false) => Collapsible::Collapsed,
            None => {
                if self.settings().expanded {
                    Collapsible::Expanded
                } else {
                    Collapsible::Collapsed
                }
            }
        }
    }

    /// Counts the row against the refresh countdown, firing the listener
    /// when the last expected row of a fresh snapshot materialises.
    fn note_materialized(&self, node: &Node, expanded: bool) {
        let mut pending = self.nodes_to_get.get();
        if expanded {
            pending += self.children(Some(node)).len() as i64;
        }
        pending -= 1;
        self.nodes_to_get.set(pending);
        if pending == 0 {
            if let Some(listener) = &self.on_tree_refreshed {
                listener();
            }
        }
    }
}

fn context_for(node: &Node) -> Option<ItemContext> {
    match &node.kind {
        NodeKind::Workspace => Some(ItemContext::Folder),
        NodeKind::Path {
            tag: None,
            sub_tag: None,
            is_folder,
            ..
        } => Some(if *is_folder {
            ItemContext::Folder
        } else {
            ItemContext::File
        }),
        _ => None,
    }
}

/// Root-level tag nodes owning exactly one child hand the row to that child.
fn compact_root(node: &Node) -> &Node {
    if node.is_root_tag_node() && node.children.len() == 1 {
        &node.children[0]
    } else {
        node
    }
}

fn compaction_step(node: &Node) -> Option<&Node> {
    if node.children.len() != 1 {
        return None;
    }
    let only = &node.children[0];
    (only.is_plain_path() && only.is_folder() && !only.children.is_empty()).then_some(only)
}

fn compaction_tail(node: &Node) -> &Node {
    let mut current = node;
    while let Some(next) = compaction_step(current) {
        current = next;
    }
    current
}

fn compacted_label(node: &Node) -> String {
    let mut label = node.label.clone();
    let mut current = node;
    while let Some(next) = compaction_step(current) {
        current = next;
        label.push('/');
        label.push_str(&current.label);
    }
    label
}
