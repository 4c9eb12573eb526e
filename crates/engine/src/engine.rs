use std::cell::Cell;

use thiserror::Error;

use tagtree_scan::{strip_block_comment_end, ExtractOptions, Extractor, MatchRecord, RecordUri, ScanError};
use tagtree_settings::{TreeSettings, WorkspaceState, WorkspaceStateError, WorkspaceStateStore};

use crate::node::{base_name, IdAllocator, MatchDetail, Node, NodeId, NodeKind};
use crate::{filter, sort};

/// Tag charged for matches that carry no tag of their own.
pub const DEFAULT_TAG: &str = "TODO";

/// Errors surfaced by engine operations that touch collaborators.
/// 引擎操作觸及協作元件時回報的錯誤。
///
/// Pure tree mutations never fail; only persistence and pattern
/// compilation can.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workspace state error: {0}")]
    State(#[from] WorkspaceStateError),
    #[error("scan configuration error: {0}")]
    Scan(#[from] ScanError),
}

/// A root folder the tree aggregates matches under.
/// 樹狀檢視彙整比對結果的根資料夾。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkspaceFolder {
    pub name: String,
    pub uri: RecordUri,
}

impl WorkspaceFolder {
    pub fn new(name: impl Into<String>, uri: RecordUri) -> Self {
        Self {
            name: name.into(),
            uri,
        }
    }
}

/// Aggregates match records into a navigable forest.
/// 將比對紀錄彙整為可瀏覽的樹狀結構。
///
/// Mutations take `&mut self`; the read surface is `&self` throughout, so a
/// fully built engine can be shared for concurrent reads.
pub struct TreeEngine {
    settings: TreeSettings,
    extractor: Extractor,
    store: Box<dyn WorkspaceStateStore>,
    state: WorkspaceState,
    allocator: IdAllocator,
    roots: Vec<Node>,
    folders: Vec<WorkspaceFolder>,
    current_filter: Option<String>,
    pub(crate) nodes_to_get: Cell<i64>,
    pub(crate) on_tree_refreshed: Option<Box<dyn Fn()>>,
}

impl TreeEngine {
    /// Creates an engine over the given settings and state store.
    /// 以指定設定與狀態儲存建立引擎。
    pub fn new(settings: TreeSettings, store: Box<dyn WorkspaceStateStore>) -> Result<Self, EngineError> {
        let extractor = Extractor::new(&extract_options(&settings))?;
        let state = store.load()?;
        let allocator = IdAllocator::new(state.build_counter);
        Ok(Self {
            settings,
            extractor,
            store,
            state,
            allocator,
            roots: Vec::new(),
            folders: Vec::new(),
            current_filter: None,
            nodes_to_get: Cell::new(0),
            on_tree_refreshed: None,
        })
    }

    pub fn settings(&self) -> &TreeSettings {
        &self.settings
    }

    /// Replaces the settings and recompiles the tag extractor.
    /// 替換設定並重新編譯標籤擷取器。
    pub fn set_settings(&mut self, settings: TreeSettings) -> Result<(), EngineError> {
        self.extractor = Extractor::new(&extract_options(&settings))?;
        self.settings = settings;
        Ok(())
    }

    /// Called once every node of a fresh snapshot has been displayed.
    pub fn set_refresh_listener(&mut self, listener: impl Fn() + 'static) {
        self.on_tree_refreshed = Some(Box::new(listener));
    }

    pub fn build_counter(&self) -> u32 {
        self.state.build_counter
    }

    pub fn current_filter(&self) -> Option<&str> {
        self.current_filter.as_deref()
    }

    /// An id issued before the most recent rebuild no longer resolves.
    /// 最近一次重建之前發出的識別碼不再有效。
    pub fn is_stale(&self, id: NodeId) -> bool {
        id.epoch() != self.state.build_counter
    }

    /// Drops the forest and reseeds workspace roots for `folders`.
    /// 清空樹並依 `folders` 重新建立工作區根節點。
    pub fn clear(&mut self, folders: Vec<WorkspaceFolder>) {
        self.folders = folders;
        self.roots.clear();
        self.allocator.reset_counter();
        self.seed_workspace_folders();
    }

    /// Advances the build counter and persists it.
    /// 遞增重建計數器並寫入儲存。
    ///
    /// Ids issued afterwards carry the new epoch, which is how lookups
    /// recognise leftovers from the previous build.
    pub fn rebuild(&mut self) -> Result<(), EngineError> {
        self.state.advance_build_counter();
        self.allocator.set_epoch(self.state.build_counter);
        self.store.save(&self.state)?;
        Ok(())
    }

    /// Inserts one match record at its location in the forest.
    /// 將單筆比對紀錄插入樹中對應位置。
    ///
    /// Records outside every workspace folder, and duplicates of an
    /// already-present match, are silently dropped.
    pub fn add(&mut self, record: MatchRecord) {
        if self.roots.is_empty() {
            self.seed_workspace_folders();
        }
        let todo = self.build_match_node(&record);
        if self.settings.tags_only {
            self.add_tags_only(todo);
            return;
        }

        let full_path = record.uri.full_path();
        let Some(root_index) = self.locate_workspace(&full_path) else {
            return;
        };

        let tag = todo.match_detail().and_then(|detail| detail.tag.clone());
        let sub_tag = todo.match_detail().and_then(|detail| detail.sub_tag.clone());
        let root_fs_path = self.roots[root_index].fs_path.clone();
        let elements = relative_elements(&root_fs_path, &full_path);

        let Self {
            allocator,
            settings,
            roots,
            ..
        } = self;
        let root = &mut roots[root_index];
        let parent = if settings.flatten {
            locate_flat_child(
                allocator,
                settings,
                root,
                &full_path,
                tag.as_deref(),
                sub_tag.as_deref(),
            )
        } else {
            locate_tree_child(
                allocator,
                settings,
                root,
                &elements,
                tag.as_deref(),
                sub_tag.as_deref(),
            )
        };
        attach_match(parent, todo);
    }

    /// Removes every match of `uri` while keeping its containers in place.
    /// 移除 `uri` 的所有比對結果，但保留其容器節點。
    pub fn reset(&mut self, uri: &RecordUri) {
        let full_path = uri.full_path();
        remove_file_matches(&mut self.roots, &full_path);
    }

    /// Removes `uri` and any containers left empty by its departure.
    /// 移除 `uri` 及因此成為空殼的容器節點。
    ///
    /// `on_removed` is invoked once per pruned container with its identity
    /// key; recorded expansion state for those keys is purged and persisted.
    pub fn remove(
        &mut self,
        uri: &RecordUri,
        mut on_removed: impl FnMut(&str),
    ) -> Result<(), EngineError> {
        let full_path = uri.full_path();
        let mut removed_paths = Vec::new();
        remove_file_nodes(&mut self.roots, &full_path, &mut removed_paths);

        let mut state_changed = false;
        for path in &removed_paths {
            if self.state.expanded.remove(path).is_some() {
                state_changed = true;
            }
            on_removed(path);
        }
        if state_changed {
            self.store.save(&self.state)?;
        }
        Ok(())
    }

    /// Re-applies the configured ordering to the whole forest.
    pub fn refresh(&mut self) {
        sort::sort_forest(&mut self.roots, &self.settings);
    }

    /// Hides nodes whose labels do not match `text`.
    /// 隱藏標籤不符合 `text` 的節點。
    pub fn filter(&mut self, text: impl Into<String>) {
        let text = text.into();
        filter::apply(&mut self.roots, &text, self.settings.filter_case_sensitive);
        self.current_filter = Some(text);
    }

    /// Restores full visibility.
    pub fn clear_filter(&mut self) {
        filter::clear(&mut self.roots);
        self.current_filter = None;
    }

    /// Records whether the node keyed by `fs_path` is expanded.
    /// 記錄 `fs_path` 對應節點的展開狀態。
    pub fn set_expanded(&mut self, fs_path: impl Into<String>, expanded: bool) -> Result<(), EngineError> {
        self.state.expanded.insert(fs_path.into(), expanded);
        self.store.save(&self.state)?;
        Ok(())
    }

    /// Forgets all recorded expansion state.
    pub fn clear_expansion_state(&mut self) -> Result<(), EngineError> {
        self.state.expanded.clear();
        self.store.save(&self.state)?;
        Ok(())
    }

    pub fn expanded_override(&self, fs_path: &str) -> Option<bool> {
        self.state.expanded.get(fs_path).copied()
    }

    /// First visible node holding content, in current order.
    pub fn first_node(&self) -> Option<&Node> {
        self.roots
            .iter()
            .find(|node| node.is_available() && node.is_visible())
    }

    /// Finds the first node whose identity key equals `fs_path`.
    pub fn node_at_path(&self, fs_path: &str) -> Option<&Node> {
        find_by_path(&self.roots, fs_path)
    }

    /// Resolves an id, skipping ids from a previous build.
    /// 解析識別碼，略過前一次建置的殘留值。
    pub fn node_by_id(&self, id: NodeId) -> Option<&Node> {
        if self.is_stale(id) {
            return None;
        }
        find_by_id(&self.roots, id)
    }

    pub fn parent_of(&self, node: &Node) -> Option<&Node> {
        node.parent.and_then(|id| self.node_by_id(id))
    }

    /// Whether any match in the forest carries a sub-tag.
    pub fn has_sub_tags(&self) -> bool {
        any_sub_tag(&self.roots)
    }

    pub(crate) fn roots(&self) -> &[Node] {
        &self.roots
    }

    fn seed_workspace_folders(&mut self) {
        if self.settings.tags_only {
            return;
        }
        let folders = self.folders.clone();
        for folder in folders {
            let label = if folder.uri.is_file() {
                folder.name.clone()
            } else {
                folder.uri.authority.clone()
            };
            let fs_path = folder.uri.full_path();
            let id = self.allocator.next_id();
            self.roots.push(Node::workspace(id, label, fs_path));
        }
    }

    fn locate_workspace(&self, full_path: &str) -> Option<usize> {
        self.roots
            .iter()
            .position(|node| node.is_workspace() && path_within(&node.fs_path, full_path))
    }

    /// Builds a match node, its continuation-line children included.
    fn build_match_node(&mut self, record: &MatchRecord) -> Node {
        let full_path = record.uri.full_path();
        let mut node = self.match_node_from(&full_path, record.line, record.column, &record.text, false);

        let hide_key = node
            .match_detail()
            .and_then(|detail| detail.tag.clone())
            .unwrap_or_else(|| node.label.clone());
        node.hidden = self.settings.should_hide_from_tree(&hide_key);

        let exclusion_tag = node.match_detail().and_then(|detail| detail.tag.clone());
        let parent_id = node.id;
        let mut extras = Vec::new();
        for extra in &record.extra_lines {
            let stripped = strip_block_comment_end(&extra.text, &full_path).trim();
            if stripped.is_empty() {
                continue;
            }
            // A continuation that is nothing but the tag keyword adds no content.
            if exclusion_tag
                .as_deref()
                .is_some_and(|tag| self.settings.keys_equal(stripped, tag))
            {
                continue;
            }
            let mut extra_node =
                self.match_node_from(&full_path, extra.line, extra.column, &extra.text, true);
            extra_node.parent = Some(parent_id);
            extras.push(extra_node);
        }
        if let Some(detail) = node.match_detail_mut() {
            detail.extra_lines = extras;
        }
        node
    }

    fn match_node_from(
        &mut self,
        full_path: &str,
        line: u32,
        column: u32,
        text: &str,
        is_extra_line: bool,
    ) -> Node {
        let end_column = column + text.chars().count() as u32;
        let stripped = strip_block_comment_end(text, full_path);
        let extract = self.extractor.extract(stripped);

        let label = if extract.text.is_empty() {
            format!("line {line}")
        } else {
            extract.text
        };
        let tag = extract.tag.as_ref().map(|tag| {
            self.settings
                .tag_group(tag)
                .map(str::to_string)
                .unwrap_or_else(|| tag.clone())
        });

        let detail = MatchDetail {
            tag,
            actual_tag: extract.tag,
            sub_tag: extract.sub_tag,
            line: line.saturating_sub(1),
            column,
            end_column,
            before: extract.before,
            after: extract.after,
            is_extra_line,
            extra_lines: Vec::new(),
        };
        let id = self.allocator.next_id();
        Node::match_node(id, label, full_path, detail)
    }

    fn add_tags_only(&mut self, todo: Node) {
        let Some(tag) = todo.match_detail().and_then(|detail| detail.tag.clone()) else {
            // Untagged matches sit directly at the top level.
            if !self.roots.iter().any(|existing| existing.same_match(&todo)) {
                self.roots.push(todo);
            }
            return;
        };
        let sub_tag = todo.match_detail().and_then(|detail| detail.sub_tag.clone());

        let Self {
            allocator,
            settings,
            roots,
            ..
        } = self;
        let parent = if settings.group_by_sub_tag && !settings.group_by_tag {
            match sub_tag.as_deref() {
                Some(sub) => sub_tag_head(allocator, settings, roots, sub),
                None => tag_head(allocator, settings, roots, &tag),
            }
        } else {
            // Tag grouping takes priority; the sub-tag only widens the key.
            let key = match sub_tag.as_deref() {
                Some(sub) => format!("{tag} ({sub})"),
                None => tag.clone(),
            };
            tag_head(allocator, settings, roots, &key)
        };
        attach_match(parent, todo);
    }
}

fn extract_options(settings: &TreeSettings) -> ExtractOptions {
    ExtractOptions {
        tags: settings.tags.clone(),
        case_sensitive: settings.case_sensitive,
        sub_tag_pattern: settings.sub_tag_regex.clone(),
    }
}

/// `full` is `root` itself or sits beneath it.
fn path_within(root: &str, full: &str) -> bool {
    if full == root {
        return true;
    }
    if !full.starts_with(root) {
        return false;
    }
    if root.ends_with('/') || root.ends_with('\\') {
        return true;
    }
    matches!(full.as_bytes().get(root.len()), Some(b'/') | Some(b'\\'))
}

fn relative_elements(root: &str, full: &str) -> Vec<String> {
    let remainder = full.strip_prefix(root).unwrap_or(full);
    remainder
        .split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_key(root: &str, elements: &[String]) -> String {
    let mut key = root.trim_end_matches(['/', '\\']).to_string();
    for element in elements {
        key.push('/');
        key.push_str(element);
    }
    key
}

fn join_one(root: &str, element: &str) -> String {
    format!("{}/{}", root.trim_end_matches(['/', '\\']), element)
}

/// `(relative dir)` annotation for flattened file nodes.
fn flat_path_label(root: &str, full: &str) -> Option<String> {
    let mut elements = relative_elements(root, full);
    if elements.len() <= 1 {
        return None;
    }
    elements.pop();
    Some(format!("({})", elements.join("/")))
}

/// Walks or grows the hierarchy under `root` down to the match's container.
///
/// Grouping is mutually exclusive: tag wins over sub-tag. With sub-tag
/// grouping off, the sub-tag becomes a trailing component under the file
/// instead.
fn locate_tree_child<'a>(
    allocator: &mut IdAllocator,
    settings: &TreeSettings,
    root: &'a mut Node,
    elements: &[String],
    tag: Option<&str>,
    sub_tag: Option<&str>,
) -> &'a mut Node {
    let root_fs_path = root.fs_path.clone();
    let mut head: &mut Node = root;
    if let (true, Some(tag)) = (settings.group_by_tag, tag) {
        head = tag_grouping_child(allocator, settings, head, tag, &root_fs_path);
    } else if let (true, Some(sub)) = (settings.group_by_sub_tag, sub_tag) {
        head = sub_tag_grouping_child(allocator, settings, head, sub, true);
    }

    let parent = descend_elements(allocator, settings, head, &root_fs_path, elements, 0);
    if settings.group_by_sub_tag {
        return parent;
    }
    match sub_tag {
        Some(sub) => sub_tag_grouping_child(allocator, settings, parent, sub, false),
        None => parent,
    }
}

fn descend_elements<'a>(
    allocator: &mut IdAllocator,
    settings: &TreeSettings,
    parent: &'a mut Node,
    root_fs_path: &str,
    elements: &[String],
    level: usize,
) -> &'a mut Node {
    if level >= elements.len() {
        return parent;
    }
    let element = &elements[level];
    let is_folder = level + 1 < elements.len();
    let index = match parent
        .children
        .iter()
        .position(|child| child.is_plain_path() && settings.keys_equal(&child.label, element))
    {
        Some(index) => index,
        None => {
            let fs_path = join_key(root_fs_path, &elements[..=level]);
            let mut node = Node::path_component(allocator.next_id(), element.clone(), fs_path, is_folder);
            node.parent = Some(parent.id);
            parent.children.push(node);
            parent.children.len() - 1
        }
    };
    descend_elements(
        allocator,
        settings,
        &mut parent.children[index],
        root_fs_path,
        elements,
        level + 1,
    )
}

fn locate_flat_child<'a>(
    allocator: &mut IdAllocator,
    settings: &TreeSettings,
    root: &'a mut Node,
    full_path: &str,
    tag: Option<&str>,
    sub_tag: Option<&str>,
) -> &'a mut Node {
    let root_fs_path = root.fs_path.clone();
    let mut head: &mut Node = root;
    if let (true, Some(tag)) = (settings.group_by_tag, tag) {
        head = tag_grouping_child(allocator, settings, head, tag, &root_fs_path);
    } else if let (true, Some(sub)) = (settings.group_by_sub_tag, sub_tag) {
        head = sub_tag_grouping_child(allocator, settings, head, sub, true);
    }

    // A sub-tag extends the key, so one file can hold several flat rows.
    let node_path = match sub_tag {
        Some(sub) => join_one(full_path, sub),
        None => full_path.to_string(),
    };
    let index = match head
        .children
        .iter()
        .position(|child| !child.is_match() && child.fs_path == node_path)
    {
        Some(index) => index,
        None => {
            let label = base_name(&node_path).to_string();
            let path_label = flat_path_label(&root_fs_path, &node_path);
            let mut node = Node::flat_file(allocator.next_id(), label, &node_path, path_label);
            node.parent = Some(head.id);
            head.children.push(node);
            head.children.len() - 1
        }
    };
    &mut head.children[index]
}

fn tag_grouping_child<'a>(
    allocator: &mut IdAllocator,
    settings: &TreeSettings,
    parent: &'a mut Node,
    tag: &str,
    root_fs_path: &str,
) -> &'a mut Node {
    let index = match parent.children.iter().position(|child| {
        child.is_root_tag_node()
            && child
                .tag()
                .is_some_and(|existing| settings.keys_equal(existing, tag))
    }) {
        Some(index) => index,
        None => {
            let fs_path = join_one(root_fs_path, tag);
            let mut node = Node::tag_grouping(allocator.next_id(), tag, fs_path);
            node.parent = Some(parent.id);
            parent.children.push(node);
            parent.children.len() - 1
        }
    };
    &mut parent.children[index]
}

fn sub_tag_grouping_child<'a>(
    allocator: &mut IdAllocator,
    settings: &TreeSettings,
    parent: &'a mut Node,
    sub_tag: &str,
    is_folder: bool,
) -> &'a mut Node {
    let index = match parent.children.iter().position(|child| {
        !child.is_match()
            && child
                .sub_tag()
                .is_some_and(|existing| settings.keys_equal(existing, sub_tag))
    }) {
        Some(index) => index,
        None => {
            let fs_path = join_one(&parent.fs_path, sub_tag);
            let mut node = Node::sub_tag_grouping(allocator.next_id(), sub_tag, fs_path, is_folder);
            node.parent = Some(parent.id);
            parent.children.push(node);
            parent.children.len() - 1
        }
    };
    &mut parent.children[index]
}

fn tag_head<'a>(
    allocator: &mut IdAllocator,
    settings: &TreeSettings,
    roots: &'a mut Vec<Node>,
    key: &str,
) -> &'a mut Node {
    let index = match roots.iter().position(|node| {
        matches!(node.kind, NodeKind::Tag { .. })
            && node
                .tag()
                .is_some_and(|existing| settings.keys_equal(existing, key))
    }) {
        Some(index) => index,
        None => {
            roots.push(Node::tag_head(allocator.next_id(), key));
            roots.len() - 1
        }
    };
    &mut roots[index]
}

fn sub_tag_head<'a>(
    allocator: &mut IdAllocator,
    settings: &TreeSettings,
    roots: &'a mut Vec<Node>,
    sub_tag: &str,
) -> &'a mut Node {
    let index = match roots.iter().position(|node| {
        matches!(node.kind, NodeKind::SubTag { .. })
            && node
                .sub_tag()
                .is_some_and(|existing| settings.keys_equal(existing, sub_tag))
    }) {
        Some(index) => index,
        None => {
            // Sub-tag groups lead their siblings.
            roots.insert(0, Node::sub_tag_head(allocator.next_id(), sub_tag));
            0
        }
    };
    &mut roots[index]
}

fn attach_match(parent: &mut Node, mut todo: Node) {
    if parent.children.iter().any(|child| child.same_match(&todo)) {
        return;
    }
    todo.parent = Some(parent.id);
    parent.show_count = true;
    parent.children.push(todo);
}

fn remove_file_matches(nodes: &mut Vec<Node>, full_path: &str) {
    for node in nodes.iter_mut() {
        remove_file_matches(&mut node.children, full_path);
    }
    // Containers stay put for the follow-up rescan; only matches go.
    nodes.retain(|node| !(node.is_match() && node.fs_path == full_path));
}

fn remove_file_nodes(nodes: &mut Vec<Node>, full_path: &str, removed: &mut Vec<String>) {
    for node in nodes.iter_mut() {
        remove_file_nodes(&mut node.children, full_path, removed);
    }
    nodes.retain(|node| {
        let prune = node.fs_path == full_path
            || (!node.is_workspace() && !node.is_match() && node.children.is_empty());
        // Containers only: matches share their file's key and would
        // otherwise report it twice.
        if prune && !node.is_match() {
            removed.push(node.fs_path.clone());
        }
        !prune
    });
}

fn find_by_path<'a>(nodes: &'a [Node], fs_path: &str) -> Option<&'a Node> {
    for node in nodes {
        if node.fs_path == fs_path {
            return Some(node);
        }
        if let Some(found) = find_by_path(&node.children, fs_path) {
            return Some(found);
        }
    }
    None
}

fn find_by_id<'a>(nodes: &'a [Node], id: NodeId) -> Option<&'a Node> {
    for node in nodes {
        if node.id == id {
            return Some(node);
        }
        if let Some(detail) = node.match_detail() {
            if let Some(found) = find_by_id(&detail.extra_lines, id) {
                return Some(found);
            }
        }
        if let Some(found) = find_by_id(&node.children, id) {
            return Some(found);
        }
    }
    None
}

fn any_sub_tag(nodes: &[Node]) -> bool {
    nodes.iter().any(|node| {
        node.sub_tag().is_some() || any_sub_tag(&node.children)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagtree_scan::ExtraLine;
    use tagtree_settings::MemoryWorkspaceState;

    fn engine_with(mut settings: TreeSettings) -> TreeEngine {
        settings.sanitize();
        TreeEngine::new(settings, Box::new(MemoryWorkspaceState::default()))
            .unwrap_or_else(|err| panic!("engine construction failed: {err}"))
    }

    fn project_engine(settings: TreeSettings) -> TreeEngine {
        let mut engine = engine_with(settings);
        engine.clear(vec![WorkspaceFolder::new("proj", RecordUri::file("/proj"))]);
        engine
    }

    fn record(path: &str, line: u32, column: u32, text: &str) -> MatchRecord {
        MatchRecord::new(RecordUri::file(path), line, column, text)
    }

    #[test]
    fn add_places_match_under_workspace_and_path() {
        let mut engine = project_engine(TreeSettings::default());
        engine.add(record("/proj/a.ts", 2, 5, "TODO fix this"));

        let roots = engine.roots();
        assert_eq!(roots.len(), 1);
        assert!(roots[0].is_workspace());
        assert_eq!(roots[0].label, "proj");

        let file = &roots[0].children[0];
        assert_eq!(file.label, "a.ts");
        assert_eq!(file.fs_path, "/proj/a.ts");
        assert!(!file.is_folder());
        assert!(file.show_count);

        let todo = &file.children[0];
        assert_eq!(todo.label, "fix this");
        let detail = todo.match_detail().unwrap();
        assert_eq!(detail.tag.as_deref(), Some("TODO"));
        assert_eq!(detail.line, 1);
        assert_eq!(detail.column, 5);
        assert_eq!(detail.end_column, 5 + "TODO fix this".chars().count() as u32);
        assert_eq!(engine.parent_of(todo).map(|n| n.id), Some(file.id));
    }

    #[test]
    fn nested_paths_reuse_existing_components() {
        let mut engine = project_engine(TreeSettings::default());
        engine.add(record("/proj/src/deep/a.ts", 1, 1, "TODO one"));
        engine.add(record("/proj/src/deep/b.ts", 1, 1, "TODO two"));
        engine.add(record("/proj/src/other.ts", 1, 1, "TODO three"));

        let src = &engine.roots()[0].children[0];
        assert_eq!(src.label, "src");
        assert!(src.is_folder());
        assert_eq!(src.fs_path, "/proj/src");
        assert_eq!(src.children.len(), 2);

        let deep = &src.children[0];
        assert_eq!(deep.children.len(), 2);
        assert_eq!(deep.children[0].fs_path, "/proj/src/deep/a.ts");
    }

    #[test]
    fn duplicate_matches_are_dropped() {
        let mut engine = project_engine(TreeSettings::default());
        engine.add(record("/proj/a.ts", 2, 5, "TODO fix this"));
        engine.add(record("/proj/a.ts", 2, 5, "TODO fix this"));

        let file = &engine.roots()[0].children[0];
        assert_eq!(file.children.len(), 1);
    }

    #[test]
    fn records_outside_every_workspace_are_ignored() {
        let mut engine = project_engine(TreeSettings::default());
        engine.add(record("/elsewhere/a.ts", 1, 1, "TODO nope"));
        engine.add(record("/project-sibling/a.ts", 1, 1, "TODO nope"));

        assert_eq!(engine.roots().len(), 1);
        assert!(engine.roots()[0].children.is_empty());
    }

    #[test]
    fn match_at_workspace_root_attaches_to_workspace() {
        let mut engine = project_engine(TreeSettings::default());
        engine.add(record("/proj", 3, 1, "TODO at root"));

        let root = &engine.roots()[0];
        assert_eq!(root.children.len(), 1);
        assert!(root.children[0].is_match());
    }

    #[test]
    fn empty_remainder_label_falls_back_to_line() {
        let mut engine = project_engine(TreeSettings::default());
        engine.add(record("/proj/a.ts", 7, 1, "TODO"));

        let todo = &engine.roots()[0].children[0].children[0];
        assert_eq!(todo.label, "line 7");
    }

    #[test]
    fn tag_group_mapping_rewrites_the_tag() {
        let mut settings = TreeSettings::default();
        settings
            .tag_groups
            .insert("ISSUES".into(), vec!["FIXME".into(), "BUG".into()]);
        let mut engine = project_engine(settings);
        engine.add(record("/proj/a.ts", 1, 1, "FIXME broken"));

        let todo = &engine.roots()[0].children[0].children[0];
        let detail = todo.match_detail().unwrap();
        assert_eq!(detail.tag.as_deref(), Some("ISSUES"));
        assert_eq!(detail.actual_tag.as_deref(), Some("FIXME"));
    }

    #[test]
    fn hidden_tags_keep_their_nodes_but_mark_them() {
        let mut settings = TreeSettings::default();
        settings.hidden_tree_tags = vec!["HACK".into()];
        let mut engine = project_engine(settings);
        engine.add(record("/proj/a.ts", 1, 1, "HACK workaround"));

        let todo = &engine.roots()[0].children[0].children[0];
        assert!(todo.hidden);
        assert!(!todo.is_visible());
    }

    #[test]
    fn extra_lines_skip_blank_and_keyword_only_continuations() {
        let mut engine = project_engine(TreeSettings::default());
        let mut rec = record("/proj/a.ts", 1, 1, "TODO first");
        rec.extra_lines = vec![
            ExtraLine {
                line: 2,
                column: 1,
                text: "   ".into(),
            },
            ExtraLine {
                line: 3,
                column: 1,
                text: "  TODO  ".into(),
            },
            ExtraLine {
                line: 4,
                column: 3,
                text: "and more detail".into(),
            },
        ];
        engine.add(rec);

        let todo = &engine.roots()[0].children[0].children[0];
        let detail = todo.match_detail().unwrap();
        assert_eq!(detail.extra_lines.len(), 1);
        assert_eq!(detail.extra_lines[0].label, "and more detail");
        assert!(detail.extra_lines[0].match_detail().unwrap().is_extra_line);
        assert_eq!(detail.extra_lines[0].parent, Some(todo.id));
    }

    #[test]
    fn grouping_by_tag_interposes_a_tag_node() {
        let mut settings = TreeSettings::default();
        settings.group_by_tag = true;
        let mut engine = project_engine(settings);
        engine.add(record("/proj/a.ts", 1, 1, "TODO alpha"));
        engine.add(record("/proj/b.ts", 1, 1, "FIXME beta"));
        engine.add(record("/proj/c.ts", 1, 1, "TODO gamma"));

        let root = &engine.roots()[0];
        assert_eq!(root.children.len(), 2);
        let todo_group = &root.children[0];
        assert!(todo_group.is_root_tag_node());
        assert_eq!(todo_group.tag(), Some("TODO"));
        assert_eq!(todo_group.fs_path, "/proj/TODO");
        assert_eq!(todo_group.children.len(), 2);
    }

    #[test]
    fn sub_tag_becomes_trailing_component_when_not_grouped() {
        let mut settings = TreeSettings::default();
        settings.sub_tag_regex = r"^\(([^)]*)\)".into();
        let mut engine = project_engine(settings);
        engine.add(record("/proj/a.ts", 1, 1, "TODO (api) tighten checks"));
        engine.add(record("/proj/a.ts", 5, 1, "TODO (api) more of the same"));

        let file = &engine.roots()[0].children[0];
        assert_eq!(file.label, "a.ts");
        assert!(!file.is_folder());
        let sub = &file.children[0];
        assert_eq!(sub.sub_tag(), Some("api"));
        assert_eq!(sub.label, "api");
        assert!(!sub.is_folder());
        assert_eq!(sub.children.len(), 2);
        assert_eq!(sub.children[0].label, "tighten checks");
    }

    #[test]
    fn sub_tag_grouping_interposes_a_head_below_the_root() {
        let mut settings = TreeSettings::default();
        settings.group_by_sub_tag = true;
        settings.sub_tag_regex = r"^\(([^)]*)\)".into();
        let mut engine = project_engine(settings);
        engine.add(record("/proj/src/a.ts", 1, 1, "TODO (api) tighten checks"));
        engine.add(record("/proj/src/b.ts", 2, 1, "FIXME (api) same bucket"));

        let head = &engine.roots()[0].children[0];
        assert_eq!(head.sub_tag(), Some("api"));
        assert!(head.is_folder());
        // Path decomposition continues beneath the head, sub untouched.
        let src = &head.children[0];
        assert_eq!(src.label, "src");
        assert_eq!(src.children.len(), 2);
        assert_eq!(src.children[0].children[0].label, "tighten checks");
    }

    #[test]
    fn tag_grouping_wins_when_both_grouping_modes_are_on() {
        let mut settings = TreeSettings::default();
        settings.group_by_tag = true;
        settings.group_by_sub_tag = true;
        settings.sub_tag_regex = r"^\(([^)]*)\)".into();
        let mut engine = project_engine(settings);
        engine.add(record("/proj/a.ts", 1, 1, "TODO (api) tighten checks"));

        let tag_node = &engine.roots()[0].children[0];
        assert!(tag_node.is_root_tag_node());
        assert_eq!(tag_node.tag(), Some("TODO"));
        let file = &tag_node.children[0];
        assert_eq!(file.label, "a.ts");
        assert_eq!(file.children[0].label, "tighten checks");
    }

    #[test]
    fn flat_view_uses_file_nodes_with_path_labels() {
        let mut settings = TreeSettings::default();
        settings.flatten = true;
        let mut engine = project_engine(settings);
        engine.add(record("/proj/src/deep/a.ts", 1, 1, "TODO one"));
        engine.add(record("/proj/src/deep/a.ts", 5, 1, "TODO two"));
        engine.add(record("/proj/b.ts", 1, 1, "TODO three"));

        let root = &engine.roots()[0];
        assert_eq!(root.children.len(), 2);
        let deep_file = &root.children[0];
        assert_eq!(deep_file.label, "a.ts");
        assert_eq!(deep_file.fs_path, "/proj/src/deep/a.ts");
        assert_eq!(deep_file.children.len(), 2);
        match &deep_file.kind {
            NodeKind::Path { path_label, .. } => {
                assert_eq!(path_label.as_deref(), Some("(src/deep)"));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        match &root.children[1].kind {
            NodeKind::Path { path_label, .. } => assert!(path_label.is_none()),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn flat_view_extends_the_key_with_the_sub_tag() {
        let mut settings = TreeSettings::default();
        settings.flatten = true;
        settings.sub_tag_regex = r"^\(([^)]*)\)".into();
        let mut engine = project_engine(settings);
        engine.add(record("/proj/src/app.ts", 1, 1, "TODO (api) tighten checks"));
        engine.add(record("/proj/src/app.ts", 4, 1, "TODO (api) and again"));
        engine.add(record("/proj/src/app.ts", 9, 1, "TODO no sub here"));

        let root = &engine.roots()[0];
        // One row per (file, sub-tag) pair.
        assert_eq!(root.children.len(), 2);
        let sub_row = &root.children[0];
        assert_eq!(sub_row.label, "api");
        assert_eq!(sub_row.fs_path, "/proj/src/app.ts/api");
        assert_eq!(sub_row.children.len(), 2);
        match &sub_row.kind {
            NodeKind::Path { path_label, .. } => {
                assert_eq!(path_label.as_deref(), Some("(src/app.ts)"));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        let plain_row = &root.children[1];
        assert_eq!(plain_row.label, "app.ts");
        assert_eq!(plain_row.fs_path, "/proj/src/app.ts");
    }

    #[test]
    fn tags_only_groups_under_tag_heads() {
        let mut settings = TreeSettings::default();
        settings.tags_only = true;
        let mut engine = project_engine(settings);
        engine.add(record("/proj/a.ts", 1, 1, "TODO alpha"));
        engine.add(record("/proj/b.ts", 2, 1, "TODO beta"));
        engine.add(record("/proj/c.ts", 3, 1, "FIXME gamma"));

        let roots = engine.roots();
        assert_eq!(roots.len(), 2);
        assert!(matches!(roots[0].kind, NodeKind::Tag { .. }));
        assert_eq!(roots[0].label, "TODO");
        assert_eq!(roots[0].children.len(), 2);
        assert_eq!(roots[1].label, "FIXME");
    }

    #[test]
    fn tags_only_composite_key_when_sub_tags_not_grouped() {
        let mut settings = TreeSettings::default();
        settings.tags_only = true;
        settings.sub_tag_regex = r"^\(([^)]*)\)".into();
        let mut engine = project_engine(settings);
        engine.add(record("/proj/a.ts", 1, 1, "TODO (api) tighten checks"));

        let roots = engine.roots();
        assert_eq!(roots[0].label, "TODO (api)");
        assert_eq!(roots[0].children[0].label, "tighten checks");
    }

    #[test]
    fn tags_only_sub_tag_heads_lead_when_grouped() {
        let mut settings = TreeSettings::default();
        settings.tags_only = true;
        settings.group_by_sub_tag = true;
        settings.sub_tag_regex = r"^\(([^)]*)\)".into();
        let mut engine = project_engine(settings);
        engine.add(record("/proj/a.ts", 1, 1, "TODO plain first"));
        engine.add(record("/proj/a.ts", 2, 1, "TODO (api) grouped later"));

        let roots = engine.roots();
        assert_eq!(roots.len(), 2);
        // The sub-tag head is inserted ahead of existing tag heads.
        assert!(matches!(roots[0].kind, NodeKind::SubTag { .. }));
        assert_eq!(roots[0].sub_tag(), Some("api"));
        assert_eq!(roots[0].children[0].label, "grouped later");
        assert_eq!(roots[1].label, "TODO");
        assert_eq!(roots[1].children[0].label, "plain first");
    }

    #[test]
    fn tags_only_tag_heads_win_over_sub_tag_heads() {
        let mut settings = TreeSettings::default();
        settings.tags_only = true;
        settings.group_by_tag = true;
        settings.group_by_sub_tag = true;
        settings.sub_tag_regex = r"^\(([^)]*)\)".into();
        let mut engine = project_engine(settings);
        engine.add(record("/proj/a.ts", 1, 1, "TODO (api) tighten checks"));

        let roots = engine.roots();
        assert_eq!(roots.len(), 1);
        assert!(matches!(roots[0].kind, NodeKind::Tag { .. }));
        assert_eq!(roots[0].label, "TODO (api)");
    }

    #[test]
    fn tags_only_untagged_matches_sit_at_top_level() {
        let mut settings = TreeSettings::default();
        settings.tags_only = true;
        let mut engine = project_engine(settings);
        engine.add(record("/proj/a.ts", 1, 1, "plain note"));
        engine.add(record("/proj/a.ts", 1, 1, "plain note"));

        let roots = engine.roots();
        assert_eq!(roots.len(), 1);
        assert!(roots[0].is_match());
        assert_eq!(roots[0].label, "plain note");
    }

    #[test]
    fn reset_empties_matches_but_keeps_containers() {
        let mut engine = project_engine(TreeSettings::default());
        engine.add(record("/proj/src/a.ts", 1, 1, "TODO one"));
        engine.add(record("/proj/src/a.ts", 2, 1, "TODO two"));
        engine.add(record("/proj/src/b.ts", 1, 1, "TODO three"));

        engine.reset(&RecordUri::file("/proj/src/a.ts"));

        let src = &engine.roots()[0].children[0];
        let file_a = &src.children[0];
        assert_eq!(file_a.fs_path, "/proj/src/a.ts");
        assert!(file_a.children.is_empty());
        assert_eq!(src.children[1].children.len(), 1);
    }

    #[test]
    fn remove_prunes_file_and_empty_ancestors() {
        let mut engine = project_engine(TreeSettings::default());
        engine.add(record("/proj/src/deep/a.ts", 1, 1, "TODO one"));
        engine.add(record("/proj/b.ts", 1, 1, "TODO keep"));

        let mut removed = Vec::new();
        engine
            .remove(&RecordUri::file("/proj/src/deep/a.ts"), |path| {
                removed.push(path.to_string())
            })
            .unwrap();

        let root = &engine.roots()[0];
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].fs_path, "/proj/b.ts");
        assert!(removed.contains(&"/proj/src/deep/a.ts".to_string()));
        assert!(removed.contains(&"/proj/src/deep".to_string()));
        assert!(removed.contains(&"/proj/src".to_string()));
    }

    #[test]
    fn remove_keeps_workspace_roots_even_when_empty() {
        let mut engine = project_engine(TreeSettings::default());
        engine.add(record("/proj/a.ts", 1, 1, "TODO only"));
        engine
            .remove(&RecordUri::file("/proj/a.ts"), |_| {})
            .unwrap();

        assert_eq!(engine.roots().len(), 1);
        assert!(engine.roots()[0].is_workspace());
        assert!(engine.roots()[0].children.is_empty());
    }

    #[test]
    fn remove_purges_expansion_state_for_pruned_nodes() {
        let mut engine = project_engine(TreeSettings::default());
        engine.add(record("/proj/src/a.ts", 1, 1, "TODO one"));
        engine.set_expanded("/proj/src", true).unwrap();
        engine.set_expanded("/proj/other", false).unwrap();

        engine
            .remove(&RecordUri::file("/proj/src/a.ts"), |_| {})
            .unwrap();

        assert_eq!(engine.expanded_override("/proj/src"), None);
        assert_eq!(engine.expanded_override("/proj/other"), Some(false));
    }

    #[test]
    fn clear_resets_counter_and_reseeds_roots() {
        let mut engine = project_engine(TreeSettings::default());
        engine.add(record("/proj/a.ts", 1, 1, "TODO one"));
        let first_run_id = engine.roots()[0].id;

        engine.clear(vec![WorkspaceFolder::new("proj", RecordUri::file("/proj"))]);
        let reseeded = engine.roots();
        assert_eq!(reseeded.len(), 1);
        assert!(reseeded[0].children.is_empty());
        // Same epoch, counter restarted.
        assert_eq!(reseeded[0].id, first_run_id);
    }

    #[test]
    fn rebuild_advances_epoch_and_invalidates_old_ids() {
        let mut engine = project_engine(TreeSettings::default());
        engine.add(record("/proj/a.ts", 1, 1, "TODO one"));
        let old_id = engine.roots()[0].children[0].children[0].id;
        assert_eq!(old_id.epoch(), 1);
        assert!(engine.node_by_id(old_id).is_some());

        engine.rebuild().unwrap();
        assert_eq!(engine.build_counter(), 2);
        assert!(engine.is_stale(old_id));
        assert!(engine.node_by_id(old_id).is_none());

        engine.clear(vec![WorkspaceFolder::new("proj", RecordUri::file("/proj"))]);
        engine.add(record("/proj/a.ts", 1, 1, "TODO one"));
        let new_id = engine.roots()[0].children[0].children[0].id;
        assert_eq!(new_id.epoch(), 2);
        assert!(new_id.ordering_key() > old_id.ordering_key());
    }

    #[test]
    fn build_counter_wraps_back_to_one() {
        let mut engine = project_engine(TreeSettings::default());
        for _ in 0..98 {
            engine.rebuild().unwrap();
        }
        assert_eq!(engine.build_counter(), 99);
        engine.rebuild().unwrap();
        assert_eq!(engine.build_counter(), 1);
    }

    #[test]
    fn remote_uris_key_by_authority_and_path() {
        let mut engine = engine_with(TreeSettings::default());
        engine.clear(vec![WorkspaceFolder::new(
            "remote",
            RecordUri::remote("ssh", "build-box", "/srv/app"),
        )]);
        let root = &engine.roots()[0];
        assert_eq!(root.label, "build-box");
        assert_eq!(root.fs_path, "build-box/srv/app");

        engine.add(MatchRecord::new(
            RecordUri::remote("ssh", "build-box", "/srv/app/main.c"),
            1,
            1,
            "TODO remote work",
        ));
        assert_eq!(engine.roots()[0].children[0].fs_path, "build-box/srv/app/main.c");
    }

    #[test]
    fn first_node_skips_empty_and_invisible_roots() {
        let mut engine = project_engine(TreeSettings::default());
        assert!(engine.first_node().is_none());

        engine.add(record("/proj/a.ts", 1, 1, "TODO one"));
        assert_eq!(engine.first_node().map(|n| n.label.as_str()), Some("proj"));

        engine.filter("no-such-text");
        assert!(engine.first_node().is_none());
        engine.clear_filter();
        assert!(engine.first_node().is_some());
    }

    #[test]
    fn node_lookups_by_path_and_id() {
        let mut engine = project_engine(TreeSettings::default());
        engine.add(record("/proj/src/a.ts", 4, 1, "TODO here"));

        let file = engine.node_at_path("/proj/src/a.ts").unwrap();
        assert_eq!(file.label, "a.ts");
        let todo = &file.children[0];
        assert_eq!(engine.node_by_id(todo.id).map(|n| n.label.as_str()), Some("here"));
        assert_eq!(engine.parent_of(todo).map(|n| n.fs_path.as_str()), Some("/proj/src/a.ts"));
        assert!(engine.node_at_path("/proj/missing.ts").is_none());
    }

    #[test]
    fn has_sub_tags_reflects_forest_content() {
        let mut settings = TreeSettings::default();
        settings.sub_tag_regex = r"^\(([^)]*)\)".into();
        let mut engine = project_engine(settings);
        assert!(!engine.has_sub_tags());

        engine.add(record("/proj/a.ts", 1, 1, "TODO plain"));
        assert!(!engine.has_sub_tags());

        engine.add(record("/proj/a.ts", 2, 1, "TODO (api) scoped"));
        assert!(engine.has_sub_tags());
    }

    #[test]
    fn set_settings_recompiles_the_extractor() {
        let mut engine = project_engine(TreeSettings::default());
        let mut narrowed = TreeSettings::default();
        narrowed.tags = vec!["NOTE".into()];
        narrowed.sanitize();
        engine.set_settings(narrowed).unwrap();

        engine.add(record("/proj/a.ts", 1, 1, "NOTE narrowed"));
        engine.add(record("/proj/b.ts", 1, 1, "TODO ignored tag"));

        let root = &engine.roots()[0];
        let tagged: Vec<_> = root
            .children
            .iter()
            .flat_map(|file| file.children.iter())
            .filter_map(|todo| todo.match_detail().and_then(|d| d.tag.clone()))
            .collect();
        assert_eq!(tagged, vec!["NOTE".to_string()]);
    }

    #[test]
    fn invalid_sub_tag_pattern_is_reported_on_construction() {
        let mut settings = TreeSettings::default();
        settings.sub_tag_regex = "(".into();
        let result = TreeEngine::new(settings, Box::new(MemoryWorkspaceState::default()));
        assert!(matches!(result, Err(EngineError::Scan(_))));
    }
}
