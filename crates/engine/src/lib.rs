//! Aggregates tagged-comment matches into a navigable tree.
//! 將標籤註解的比對結果彙整為可瀏覽的樹狀結構。
//!
//! Records produced by a scanner are inserted one at a time and land in a
//! forest of workspace, path, tag and match nodes shaped by the view
//! settings. The read surface hands a host everything it needs to render:
//! ordered child listings, display records, per-tag counts and a
//! serialisable snapshot of the visible tree.

mod count;
mod filter;
mod format;
mod sort;

pub mod display;
pub mod engine;
pub mod export;
pub mod node;

pub use display::{
    Collapsible, DisplayItem, IconKey, ItemContext, NavigationTarget, StatusNode, TreeEntry,
};
pub use engine::{EngineError, TreeEngine, WorkspaceFolder, DEFAULT_TAG};
pub use export::{ExportMap, ExportValue};
pub use node::{MatchDetail, Node, NodeId, NodeKind};
