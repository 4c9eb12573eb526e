//! Serialisable snapshot of the visible tree, in display order.

use indexmap::IndexMap;
use serde::Serialize;

use crate::display::TreeEntry;
use crate::engine::TreeEngine;

/// Insertion-ordered map mirroring the tree; keys are labels, leaves are
/// match texts.
pub type ExportMap = IndexMap<String, ExportValue>;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExportValue {
    Leaf(String),
    Branch(ExportMap),
}

impl TreeEngine {
    /// Snapshots the visible tree as nested maps.
    /// 將可見的樹狀結構快照為巢狀映射。
    ///
    /// Mirrors exactly what a host shows: sorted, compacted, filtered, with
    /// status rows and continuation lines left out.
    pub fn export(&self) -> ExportMap {
        let entries = self.children(None);
        self.export_entries(&entries)
    }

    fn export_entries(&self, entries: &[TreeEntry<'_>]) -> ExportMap {
        let mut map = ExportMap::new();
        for entry in entries {
            let Some(node) = entry.node() else {
                continue;
            };
            if let Some(detail) = node.match_detail() {
                let line_key = format!("line {}", detail.line + 1);
                let key = if self.settings().tags_only {
                    format!("{} {line_key}", node.fs_path)
                } else {
                    line_key
                };
                // Leaves carry the same label a host would render.
                map.insert(key, ExportValue::Leaf(self.match_label(node, detail)));
            } else {
                let children = self.children(Some(node));
                map.insert(
                    node.label.clone(),
                    ExportValue::Branch(self.export_entries(&children)),
                );
            }
        }
        map
    }
}
