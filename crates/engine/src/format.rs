//! `${placeholder}` substitution for match labels and tooltips.

use crate::node::{base_name, MatchDetail, Node};

/// Replaces known `${name}` placeholders; unknown ones are left verbatim.
pub(crate) fn format_label(format: &str, node: &Node, detail: &MatchDetail) -> String {
    let mut out = String::with_capacity(format.len());
    let mut rest = format;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match placeholder(name, node, detail) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

fn placeholder(name: &str, node: &Node, detail: &MatchDetail) -> Option<String> {
    match name {
        "tag" => Some(detail.tag.clone().unwrap_or_default()),
        "sub_tag" => Some(detail.sub_tag.clone().unwrap_or_default()),
        "before" => Some(detail.before.clone()),
        "after" => Some(detail.after.clone()),
        "text" => Some(node.label.clone()),
        // Lines are stored zero-based; placeholders read one-based.
        "line" => Some((detail.line + 1).to_string()),
        "column" => Some(detail.column.to_string()),
        "filename" => Some(base_name(&node.fs_path).to_string()),
        "filepath" => Some(node.fs_path.clone()),
        _ => None,
    }
}
