//! Label filtering. Matches stay visible when their label matches the
//! filter; containers stay visible while any descendant does.

use regex::{Regex, RegexBuilder};

use crate::node::Node;

enum FilterMatcher {
    Pattern(Regex),
    /// Fallback when the filter text is not a valid pattern.
    Literal { needle: String, fold_case: bool },
}

impl FilterMatcher {
    fn new(text: &str, case_sensitive: bool) -> Self {
        let compiled = RegexBuilder::new(text)
            .case_insensitive(!case_sensitive)
            .build();
        match compiled {
            Ok(pattern) => Self::Pattern(pattern),
            Err(_) => Self::Literal {
                needle: if case_sensitive {
                    text.to_string()
                } else {
                    text.to_lowercase()
                },
                fold_case: !case_sensitive,
            },
        }
    }

    fn is_match(&self, label: &str) -> bool {
        match self {
            Self::Pattern(pattern) => pattern.is_match(label),
            Self::Literal { needle, fold_case } => {
                if *fold_case {
                    label.to_lowercase().contains(needle)
                } else {
                    label.contains(needle)
                }
            }
        }
    }
}

pub(crate) fn apply(roots: &mut [Node], text: &str, case_sensitive: bool) {
    let matcher = FilterMatcher::new(text, case_sensitive);
    for node in roots {
        apply_node(node, &matcher);
    }
}

fn apply_node(node: &mut Node, matcher: &FilterMatcher) {
    if node.is_match() {
        let mut visible = matcher.is_match(&node.label);
        if let Some(detail) = node.match_detail_mut() {
            if !detail.extra_lines.is_empty() {
                for extra in &mut detail.extra_lines {
                    extra.visible = matcher.is_match(&extra.label);
                }
                // A multi-line match acts as a container for its extras.
                visible = detail.extra_lines.iter().any(Node::is_visible);
            }
        }
        node.visible = visible;
        return;
    }
    for child in &mut node.children {
        apply_node(child, matcher);
    }
    node.visible = node.children.iter().any(Node::is_visible);
}

pub(crate) fn clear(roots: &mut [Node]) {
    for node in roots {
        clear_node(node);
    }
}

fn clear_node(node: &mut Node) {
    node.visible = true;
    if let Some(detail) = node.match_detail_mut() {
        for extra in &mut detail.extra_lines {
            extra.visible = true;
        }
    }
    for child in &mut node.children {
        clear_node(child);
    }
}
