use std::fmt;

use serde::{Deserialize, Serialize};

const EPOCH_SPAN: u64 = 1_000_000;

/// Unique identifier assigned to each node in the match tree.
/// 比對樹中每個節點的唯一識別碼。
///
/// The embedded epoch is the build counter at allocation time; raw values are
/// only comparable across rebuilds through [`NodeId::ordering_key`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The build counter embedded when the id was issued.
    /// 發出識別碼時嵌入的重建計數器。
    pub fn epoch(&self) -> u32 {
        (self.0 / EPOCH_SPAN) as u32
    }

    /// The per-epoch allocation counter.
    /// 單一重建週期內的配置計數。
    pub fn counter(&self) -> u64 {
        self.0 % EPOCH_SPAN
    }

    /// Key ordering ids by epoch first, then allocation order.
    /// 先依重建週期、再依配置順序排序的鍵值。
    pub fn ordering_key(&self) -> (u32, u64) {
        (self.epoch(), self.counter())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issues node ids for one engine instance.
/// 為單一引擎實例發出節點識別碼。
#[derive(Debug)]
pub(crate) struct IdAllocator {
    epoch: u32,
    counter: u64,
}

impl IdAllocator {
    pub(crate) fn new(epoch: u32) -> Self {
        Self { epoch, counter: 1 }
    }

    pub(crate) fn set_epoch(&mut self, epoch: u32) {
        self.epoch = epoch;
    }

    pub(crate) fn reset_counter(&mut self) {
        self.counter = 1;
    }

    pub(crate) fn next_id(&mut self) -> NodeId {
        let id = NodeId(self.epoch as u64 * EPOCH_SPAN + self.counter);
        self.counter += 1;
        id
    }
}

/// Everything known about one located match.
/// 單一比對結果的完整資訊。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchDetail {
    /// Tag after tag-group mapping, `None` for untagged matches.
    pub tag: Option<String>,
    /// Tag exactly as it appeared in the text.
    pub actual_tag: Option<String>,
    pub sub_tag: Option<String>,
    /// Zero-based line (input records carry 1-based lines).
    pub line: u32,
    /// 1-based column of the match start.
    pub column: u32,
    /// Column one past the end of the matched text.
    pub end_column: u32,
    pub before: String,
    pub after: String,
    pub is_extra_line: bool,
    /// Continuation-line matches, in document order.
    pub extra_lines: Vec<Node>,
}

/// The kind of tree node.
/// 樹節點的類型。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// One per workspace folder; never pruned.
    Workspace,
    /// A path component, a flattened file, or an interposed grouping node.
    Path {
        is_folder: bool,
        /// `(relative dir)` annotation carried by flattened file nodes.
        path_label: Option<String>,
        tag: Option<String>,
        sub_tag: Option<String>,
        is_root_tag_node: bool,
    },
    /// Top-level grouping head of the tags-only view.
    Tag { tag: String },
    /// Sub-tag grouping head nested under a tag head.
    SubTag { sub_tag: String },
    Match(MatchDetail),
}

/// A node owned by the match tree.
/// 比對樹持有的節點。
///
/// Children are owned by strong containment; `parent` is a lookup key
/// resolved through the owning engine, never a pointer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub label: String,
    /// Canonical path/URI identity key, stable across rebuilds.
    pub fs_path: String,
    pub visible: bool,
    pub hidden: bool,
    pub show_count: bool,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
    pub children: Vec<Node>,
}

impl Node {
    fn base(id: NodeId, label: String, fs_path: String, kind: NodeKind) -> Self {
        Self {
            id,
            label,
            fs_path,
            visible: true,
            hidden: false,
            show_count: false,
            parent: None,
            kind,
            children: Vec::new(),
        }
    }

    pub(crate) fn workspace(id: NodeId, label: impl Into<String>, fs_path: impl Into<String>) -> Self {
        Self::base(id, label.into(), fs_path.into(), NodeKind::Workspace)
    }

    pub(crate) fn path_component(
        id: NodeId,
        label: impl Into<String>,
        fs_path: impl Into<String>,
        is_folder: bool,
    ) -> Self {
        Self::base(
            id,
            label.into(),
            fs_path.into(),
            NodeKind::Path {
                is_folder,
                path_label: None,
                tag: None,
                sub_tag: None,
                is_root_tag_node: false,
            },
        )
    }

    pub(crate) fn flat_file(
        id: NodeId,
        label: impl Into<String>,
        fs_path: impl Into<String>,
        path_label: Option<String>,
    ) -> Self {
        Self::base(
            id,
            label.into(),
            fs_path.into(),
            NodeKind::Path {
                is_folder: false,
                path_label,
                tag: None,
                sub_tag: None,
                is_root_tag_node: false,
            },
        )
    }

    pub(crate) fn tag_grouping(id: NodeId, tag: impl Into<String>, fs_path: impl Into<String>) -> Self {
        let tag = tag.into();
        Self::base(
            id,
            tag.clone(),
            fs_path.into(),
            NodeKind::Path {
                is_folder: true,
                path_label: None,
                tag: Some(tag),
                sub_tag: None,
                is_root_tag_node: true,
            },
        )
    }

    pub(crate) fn sub_tag_grouping(
        id: NodeId,
        sub_tag: impl Into<String>,
        fs_path: impl Into<String>,
        is_folder: bool,
    ) -> Self {
        let sub_tag = sub_tag.into();
        Self::base(
            id,
            sub_tag.clone(),
            fs_path.into(),
            NodeKind::Path {
                is_folder,
                path_label: None,
                tag: None,
                sub_tag: Some(sub_tag),
                is_root_tag_node: false,
            },
        )
    }

    pub(crate) fn tag_head(id: NodeId, key: impl Into<String>) -> Self {
        let key = key.into();
        Self::base(id, key.clone(), key.clone(), NodeKind::Tag { tag: key })
    }

    pub(crate) fn sub_tag_head(id: NodeId, sub_tag: impl Into<String>) -> Self {
        let sub_tag = sub_tag.into();
        Self::base(
            id,
            sub_tag.clone(),
            sub_tag.clone(),
            NodeKind::SubTag { sub_tag },
        )
    }

    pub(crate) fn match_node(
        id: NodeId,
        label: impl Into<String>,
        fs_path: impl Into<String>,
        detail: MatchDetail,
    ) -> Self {
        Self::base(id, label.into(), fs_path.into(), NodeKind::Match(detail))
    }

    pub fn is_workspace(&self) -> bool {
        matches!(self.kind, NodeKind::Workspace)
    }

    pub fn is_match(&self) -> bool {
        matches!(self.kind, NodeKind::Match(_))
    }

    pub fn is_folder(&self) -> bool {
        match &self.kind {
            NodeKind::Workspace | NodeKind::Tag { .. } | NodeKind::SubTag { .. } => true,
            NodeKind::Path { is_folder, .. } => *is_folder,
            NodeKind::Match(_) => false,
        }
    }

    /// A path component that is neither a grouping node nor a flattened file.
    pub(crate) fn is_plain_path(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Path {
                tag: None,
                sub_tag: None,
                is_root_tag_node: false,
                ..
            }
        )
    }

    /// Grouping heads ordered by the configured tag order when sorting.
    pub fn is_root_tag_node(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Path {
                is_root_tag_node: true,
                ..
            } | NodeKind::Tag { .. }
        )
    }

    /// Effective visibility: filtered in and not hidden by configuration.
    /// 實際可見性：通過篩選且未被設定隱藏。
    pub fn is_visible(&self) -> bool {
        self.visible && !self.hidden
    }

    /// Containers only count when they still hold children.
    pub(crate) fn is_available(&self) -> bool {
        self.is_match() || !self.children.is_empty()
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Path { tag, .. } => tag.as_deref(),
            NodeKind::Tag { tag } => Some(tag),
            NodeKind::Match(detail) => detail.tag.as_deref(),
            _ => None,
        }
    }

    pub fn sub_tag(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Path { sub_tag, .. } => sub_tag.as_deref(),
            NodeKind::SubTag { sub_tag } => Some(sub_tag),
            NodeKind::Match(detail) => detail.sub_tag.as_deref(),
            _ => None,
        }
    }

    pub fn match_detail(&self) -> Option<&MatchDetail> {
        match &self.kind {
            NodeKind::Match(detail) => Some(detail),
            _ => None,
        }
    }

    pub(crate) fn match_detail_mut(&mut self) -> Option<&mut MatchDetail> {
        match &mut self.kind {
            NodeKind::Match(detail) => Some(detail),
            _ => None,
        }
    }

    pub fn line(&self) -> Option<u32> {
        self.match_detail().map(|detail| detail.line)
    }

    pub fn column(&self) -> Option<u32> {
        self.match_detail().map(|detail| detail.column)
    }

    /// Match identity is the (label, fsPath, line) triple.
    /// 比對節點的識別依據為（標籤、路徑、行號）三元組。
    pub fn same_match(&self, other: &Node) -> bool {
        match (self.match_detail(), other.match_detail()) {
            (Some(mine), Some(theirs)) => {
                self.label == other.label
                    && self.fs_path == other.fs_path
                    && mine.line == theirs.line
            }
            _ => false,
        }
    }
}

/// Last path component of an identity key.
pub(crate) fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
