use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSettings {
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tag_groups: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
    #[serde(default)]
    pub group_by_tag: bool,
    #[serde(default)]
    pub group_by_sub_tag: bool,
    #[serde(default)]
    pub tags_only: bool,
    #[serde(default)]
    pub flatten: bool,
    #[serde(default = "default_true")]
    pub sort_tree: bool,
    #[serde(default)]
    pub sort_tags_only_alphabetically: bool,
    #[serde(default)]
    pub expanded: bool,
    #[serde(default = "default_true")]
    pub compact_folders: bool,
    #[serde(default)]
    pub show_counts: bool,
    #[serde(default)]
    pub hide_icons_when_grouped: bool,
    #[serde(default)]
    pub filter_case_sensitive: bool,
    #[serde(default)]
    pub label_format: String,
    #[serde(default = "default_tooltip_format")]
    pub tooltip_format: String,
    #[serde(default)]
    pub sub_tag_regex: String,
    #[serde(default)]
    pub hidden_tree_tags: Vec<String>,
    #[serde(default)]
    pub hidden_status_bar_tags: Vec<String>,
    #[serde(default)]
    pub hidden_activity_bar_tags: Vec<String>,
    #[serde(default)]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_tags() -> Vec<String> {
    ["TODO", "FIXME", "HACK", "BUG", "XXX"]
        .iter()
        .map(|tag| tag.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_tooltip_format() -> String {
    "${filepath}, line ${line}".to_string()
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self {
            tags: default_tags(),
            tag_groups: BTreeMap::new(),
            case_sensitive: true,
            group_by_tag: false,
            group_by_sub_tag: false,
            tags_only: false,
            flatten: false,
            sort_tree: true,
            sort_tags_only_alphabetically: false,
            expanded: false,
            compact_folders: true,
            show_counts: false,
            hide_icons_when_grouped: false,
            filter_case_sensitive: false,
            label_format: String::new(),
            tooltip_format: default_tooltip_format(),
            sub_tag_regex: String::new(),
            hidden_tree_tags: Vec::new(),
            hidden_status_bar_tags: Vec::new(),
            hidden_activity_bar_tags: Vec::new(),
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
        }
    }
}

impl TreeSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            let mut settings = Self::default();
            settings.sanitize();
            return Ok(settings);
        }

        let contents = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
            path: path.clone(),
            source,
        })?;
        let mut settings: TreeSettings =
            serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
                path: path.clone(),
                source,
            })?;
        settings.sanitize();
        Ok(settings)
    }

    pub fn sanitize(&mut self) {
        sanitize_list(&mut self.tags);
        if self.tags.is_empty() {
            self.tags = default_tags();
        }
        let groups = std::mem::take(&mut self.tag_groups);
        for (group, mut members) in groups {
            let group = group.trim().to_string();
            sanitize_list(&mut members);
            if !group.is_empty() && !members.is_empty() {
                self.tag_groups.insert(group, members);
            }
        }
        sanitize_list(&mut self.hidden_tree_tags);
        sanitize_list(&mut self.hidden_status_bar_tags);
        sanitize_list(&mut self.hidden_activity_bar_tags);
        sanitize_list(&mut self.include_globs);
        sanitize_list(&mut self.exclude_globs);
    }

    pub fn keys_equal(&self, left: &str, right: &str) -> bool {
        if self.case_sensitive {
            left == right
        } else {
            left.to_lowercase() == right.to_lowercase()
        }
    }

    pub fn tag_index(&self, tag: &str) -> Option<usize> {
        self.tags.iter().position(|known| self.keys_equal(known, tag))
    }

    pub fn tag_group(&self, tag: &str) -> Option<&str> {
        self.tag_groups.iter().find_map(|(group, members)| {
            members
                .iter()
                .any(|member| self.keys_equal(member, tag))
                .then_some(group.as_str())
        })
    }

    pub fn should_hide_from_tree(&self, key: &str) -> bool {
        self.hidden_tree_tags.iter().any(|tag| self.keys_equal(tag, key))
    }

    pub fn should_hide_from_status_bar(&self, tag: &str) -> bool {
        self.hidden_status_bar_tags
            .iter()
            .any(|hidden| self.keys_equal(hidden, tag))
    }

    pub fn should_hide_from_activity_bar(&self, tag: &str) -> bool {
        self.hidden_activity_bar_tags
            .iter()
            .any(|hidden| self.keys_equal(hidden, tag))
    }
}

fn sanitize_list(entries: &mut Vec<String>) {
    let mut seen: Vec<String> = Vec::new();
    entries.retain(|entry| {
        let trimmed = entry.trim();
        if trimmed.is_empty() || seen.iter().any(|kept| kept == trimmed) {
            return false;
        }
        seen.push(trimmed.to_string());
        true
    });
    for entry in entries.iter_mut() {
        let trimmed = entry.trim();
        if trimmed.len() != entry.len() {
            *entry = trimmed.to_string();
        }
    }
}
