//! Tag scanning and extraction used across TagTree components.
//!
//! The scanner walks source text line by line looking for configured tag
//! keywords (`TODO`, `FIXME`, ...) behind common comment leaders and produces
//! one `MatchRecord` per hit. The extractor splits a matched text into its
//! tag, optional parenthesised sub-tag, surrounding context, and the
//! remainder used as a display label. Neither touches the filesystem; batch
//! inputs are `(path, contents)` pairs supplied by the caller.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// Error conditions raised when building scanners and extractors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("tag list cannot be empty")]
    NoTags,
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
}

/// Identity of the document a match was found in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordUri {
    pub scheme: String,
    pub fs_path: String,
    pub authority: String,
}

impl RecordUri {
    /// Creates a plain `file` URI for a local path.
    pub fn file(fs_path: impl Into<String>) -> Self {
        Self {
            scheme: "file".to_string(),
            fs_path: fs_path.into(),
            authority: String::new(),
        }
    }

    /// Creates a URI for a non-local scheme (remote filesystems, virtual documents).
    pub fn remote(
        scheme: impl Into<String>,
        authority: impl Into<String>,
        fs_path: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            fs_path: fs_path.into(),
            authority: authority.into(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.scheme == "file"
    }

    /// The identity key used throughout the tree. Non-file schemes prepend the
    /// authority so documents from different hosts never collide.
    pub fn full_path(&self) -> String {
        if self.is_file() || self.authority.is_empty() {
            self.fs_path.clone()
        } else {
            format!("{}{}", self.authority, self.fs_path)
        }
    }
}

/// A continuation line belonging to a multi-line match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtraLine {
    pub line: u32,
    pub column: u32,
    pub text: String,
}

/// One scanner hit. `line` and `column` are 1-based; `text` is the matched
/// text beginning at `column` and running to the end of the line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchRecord {
    pub uri: RecordUri,
    pub line: u32,
    pub column: u32,
    pub text: String,
    pub extra_lines: Vec<ExtraLine>,
}

impl MatchRecord {
    pub fn new(uri: RecordUri, line: u32, column: u32, text: impl Into<String>) -> Self {
        Self {
            uri,
            line,
            column,
            text: text.into(),
            extra_lines: Vec::new(),
        }
    }
}

/// Options shared by the scanner and the extractor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractOptions {
    pub tags: Vec<String>,
    pub case_sensitive: bool,
    /// Regex applied to the text following the tag; capture group 1 (or the
    /// whole match) becomes the sub-tag. Empty disables sub-tag capture.
    pub sub_tag_pattern: String,
}

impl ExtractOptions {
    pub fn new(tags: Vec<String>) -> Self {
        Self {
            tags,
            case_sensitive: true,
            sub_tag_pattern: String::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.tags.iter().all(|tag| tag.trim().is_empty()) {
            return Err(ScanError::NoTags);
        }
        Ok(())
    }
}

/// The pieces of a matched text once the tag has been identified.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagExtract {
    /// The tag as it appears in the text, `None` when no configured tag was found.
    pub tag: Option<String>,
    pub sub_tag: Option<String>,
    /// Trimmed text preceding the tag (typically the comment leader).
    pub before: String,
    /// Trimmed text following the tag, sub-tag included.
    pub after: String,
    /// The remainder with tag, sub-tag and separator punctuation stripped.
    pub text: String,
}

/// Splits matched texts into their tag components.
#[derive(Debug)]
pub struct Extractor {
    tag_regex: Regex,
    sub_tag_regex: Option<Regex>,
}

impl Extractor {
    pub fn new(options: &ExtractOptions) -> Result<Self, ScanError> {
        options.validate()?;
        let tag_regex = build_tag_regex(&options.tags, options.case_sensitive)?;
        let sub_tag_regex = if options.sub_tag_pattern.is_empty() {
            None
        } else {
            Some(
                RegexBuilder::new(&options.sub_tag_pattern)
                    .case_insensitive(!options.case_sensitive)
                    .build()
                    .map_err(|err| ScanError::InvalidPattern(err.to_string()))?,
            )
        };
        Ok(Self {
            tag_regex,
            sub_tag_regex,
        })
    }

    /// Extracts the tag components from a matched text. Always succeeds; a
    /// text without any configured tag comes back with `tag: None` and the
    /// trimmed text as the remainder.
    pub fn extract(&self, text: &str) -> TagExtract {
        let Some((start, end)) = self.find_tag(text) else {
            return TagExtract {
                text: text.trim().to_string(),
                ..TagExtract::default()
            };
        };

        let after_raw = &text[end..];
        let (sub_tag, remainder) = self.strip_sub_tag(after_raw);
        TagExtract {
            tag: Some(text[start..end].to_string()),
            sub_tag,
            before: text[..start].trim().to_string(),
            after: after_raw.trim().to_string(),
            text: trim_label_text(&remainder).to_string(),
        }
    }

    /// Byte range of the first configured tag found on a word boundary.
    pub fn find_tag(&self, text: &str) -> Option<(usize, usize)> {
        self.tag_regex
            .find_iter(text)
            .find(|found| on_word_boundary(text, found.start(), found.end()))
            .map(|found| (found.start(), found.end()))
    }

    fn strip_sub_tag(&self, after: &str) -> (Option<String>, String) {
        let Some(regex) = &self.sub_tag_regex else {
            return (None, after.to_string());
        };
        let Some(caps) = regex.captures(after) else {
            return (None, after.to_string());
        };
        let Some(whole) = caps.get(0) else {
            return (None, after.to_string());
        };

        let mut remainder = String::with_capacity(after.len());
        remainder.push_str(&after[..whole.start()]);
        remainder.push_str(&after[whole.end()..]);
        let sub_tag = caps
            .get(1)
            .map(|group| group.as_str())
            .unwrap_or_else(|| whole.as_str())
            .trim();
        if sub_tag.is_empty() {
            (None, remainder)
        } else {
            (Some(sub_tag.to_string()), remainder)
        }
    }
}

/// A batch scan input (e.g. when scanning a workspace).
#[derive(Clone, Debug)]
pub struct SourceInput<'a> {
    pub path: PathBuf,
    pub contents: Cow<'a, str>,
}

impl<'a> SourceInput<'a> {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<Cow<'a, str>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// Finds tagged comments in source text.
#[derive(Debug)]
pub struct Scanner {
    pattern: Regex,
}

impl Scanner {
    pub fn new(options: &ExtractOptions) -> Result<Self, ScanError> {
        options.validate()?;
        let tags = alternation(&options.tags);
        // An optional comment leader keeps the match anchored at the marker
        // rather than at leading indentation.
        let pattern = format!(r"(?:(?://+|/\*+|<!--|--+|#+|;+|\*+)[ \t]*)?(?:{tags})");
        let pattern = RegexBuilder::new(&pattern)
            .case_insensitive(!options.case_sensitive)
            .build()
            .map_err(|err| ScanError::InvalidPattern(err.to_string()))?;
        Ok(Self { pattern })
    }

    /// Scans a single document, producing one record per matching line.
    pub fn scan_source(&self, uri: &RecordUri, contents: &str) -> Vec<MatchRecord> {
        let mut records = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if let Some(record) = self.scan_line(uri, index as u32 + 1, line) {
                records.push(record);
            }
        }
        records
    }

    /// Scans many documents, concatenating the records in input order.
    pub fn scan_files<'a, I>(&self, inputs: I) -> Vec<MatchRecord>
    where
        I: IntoIterator<Item = SourceInput<'a>>,
    {
        let mut records = Vec::new();
        for input in inputs {
            let uri = RecordUri::file(input.path.to_string_lossy());
            records.extend(self.scan_source(&uri, &input.contents));
        }
        records
    }

    fn scan_line(&self, uri: &RecordUri, line_number: u32, line: &str) -> Option<MatchRecord> {
        for found in self.pattern.find_iter(line) {
            if !on_word_boundary(line, found.start(), found.end()) {
                continue;
            }
            let column = line[..found.start()].chars().count() as u32 + 1;
            return Some(MatchRecord::new(
                uri.clone(),
                line_number,
                column,
                &line[found.start()..],
            ));
        }
        None
    }
}

/// Removes a trailing block-comment terminator for the file's extension and
/// trims trailing whitespace.
pub fn strip_block_comment_end<'t>(text: &'t str, path: &str) -> &'t str {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let trimmed = text.trim_end();
    match block_comment_end(&extension) {
        Some(close) => trimmed
            .strip_suffix(close)
            .map_or(trimmed, |rest| rest.trim_end()),
        None => trimmed,
    }
}

fn block_comment_end(extension: &str) -> Option<&'static str> {
    match extension {
        "c" | "h" | "cpp" | "hpp" | "cc" | "js" | "jsx" | "ts" | "tsx" | "java" | "cs" | "go"
        | "rs" | "swift" | "kt" | "css" | "scss" | "less" | "php" => Some("*/"),
        "html" | "htm" | "xml" | "vue" | "svelte" | "md" | "markdown" => Some("-->"),
        "hs" | "lhs" | "elm" => Some("-}"),
        "ml" | "mli" | "pas" => Some("*)"),
        _ => None,
    }
}

fn build_tag_regex(tags: &[String], case_sensitive: bool) -> Result<Regex, ScanError> {
    RegexBuilder::new(&alternation(tags))
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|err| ScanError::InvalidPattern(err.to_string()))
}

fn alternation(tags: &[String]) -> String {
    // Longest first: alternation is first-match-wins, and a shorter tag that
    // prefixes a longer one would otherwise fail the boundary check.
    let mut escaped: Vec<String> = tags
        .iter()
        .filter(|tag| !tag.trim().is_empty())
        .map(|tag| regex::escape(tag.trim()))
        .collect();
    escaped.sort_by(|a, b| b.len().cmp(&a.len()));
    escaped.join("|")
}

fn on_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let is_word = |byte: u8| byte.is_ascii_alphanumeric() || byte == b'_';
    let bytes = text.as_bytes();
    let left = start > 0 && bytes.get(start - 1).map_or(false, |b| is_word(*b));
    let right = bytes.get(end).map_or(false, |b| is_word(*b));
    !(left || right)
}

fn trim_label_text(text: &str) -> &str {
    text.trim_start_matches(|c: char| c == ':' || c == '-' || c.is_whitespace())
        .trim_end()
}
