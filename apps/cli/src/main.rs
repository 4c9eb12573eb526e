use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chardetng::EncodingDetector;
use clap::{Args, Parser, Subcommand};
use encoding_rs::Encoding as RsEncoding;
use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use tagtree_engine::{TreeEngine, TreeEntry, WorkspaceFolder};
use tagtree_scan::{ExtractOptions, RecordUri, Scanner};
use tagtree_settings::{
    JsonWorkspaceState, MemoryWorkspaceState, TreeSettings, WorkspaceStateStore,
};

#[derive(Parser)]
#[command(
    name = "tagtree-cli",
    about = "Collect tagged comments from a source tree and browse them",
    author,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 掃描資料夾並列印比對結果樹。 / Scan a directory and print the match tree.
    Scan(ScanArgs),
    /// 掃描資料夾並以 JSON 輸出可見樹的快照。 / Scan a directory and print a JSON snapshot of the visible tree.
    Export(ScanArgs),
    /// 掃描資料夾並列印各標籤的數量。 / Scan a directory and print per-tag totals.
    Count(CountArgs),
}

#[derive(Args)]
struct ScanArgs {
    /// 要掃描的資料夾。 / Directory to scan.
    #[arg(value_name = "DIR")]
    root: PathBuf,

    /// 顯示前先套用的樹狀篩選文字。 / Tree filter text applied before rendering.
    #[arg(long, value_name = "TEXT")]
    filter: Option<String>,

    #[command(flatten)]
    view: ViewArgs,
}

#[derive(Args)]
struct CountArgs {
    /// 要掃描的資料夾。 / Directory to scan.
    #[arg(value_name = "DIR")]
    root: PathBuf,

    /// 僅統計指定檔案。 / Restrict totals to one file.
    #[arg(long, value_name = "FILE")]
    file: Option<PathBuf>,

    #[command(flatten)]
    view: ViewArgs,
}

#[derive(Args)]
struct ViewArgs {
    /// 檢視設定 JSON 檔；省略時採用預設值。 / View settings JSON file; defaults apply when omitted.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 工作區狀態 JSON 檔；省略時僅保存在記憶體中。 / Workspace state JSON file; kept in memory when omitted.
    #[arg(long, value_name = "FILE")]
    state: Option<PathBuf>,

    /// 僅以標籤分組顯示，不展開路徑。 / Show tag groups only, no path decomposition.
    #[arg(long)]
    tags_only: bool,

    /// 以攤平的檔案清單顯示。 / Show a flattened file list.
    #[arg(long)]
    flat: bool,

    /// 依標籤分組。 / Group matches by tag.
    #[arg(long)]
    group_by_tag: bool,

    /// 依子標籤分組。 / Group matches by sub-tag.
    #[arg(long)]
    group_by_sub_tag: bool,

    /// 在容器列顯示可見數量。 / Show visible match counts on container rows.
    #[arg(long)]
    show_counts: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    match Cli::parse().command {
        Commands::Scan(args) => execute_scan(args),
        Commands::Export(args) => execute_export(args),
        Commands::Count(args) => execute_count(args),
    }
}

fn execute_scan(args: ScanArgs) -> Result<()> {
    let mut engine = scan_workspace(&args.root, &args.view)?;
    if let Some(text) = &args.filter {
        engine.filter(text.clone());
    }
    print_tree(&engine);
    Ok(())
}

fn execute_export(args: ScanArgs) -> Result<()> {
    let mut engine = scan_workspace(&args.root, &args.view)?;
    if let Some(text) = &args.filter {
        engine.filter(text.clone());
    }
    let snapshot = engine.export();
    let json = serde_json::to_string_pretty(&snapshot).context("failed to serialise snapshot")?;
    println!("{json}");
    Ok(())
}

fn execute_count(args: CountArgs) -> Result<()> {
    let engine = scan_workspace(&args.root, &args.view)?;
    let file_key = args
        .file
        .as_ref()
        .map(|path| resolve_input_path(path))
        .transpose()?
        .map(|path| path.to_string_lossy().into_owned());
    let counts = engine.tag_counts_for_status_bar(file_key.as_deref());
    if counts.is_empty() {
        println!("No matches found.");
        return Ok(());
    }
    let mut total = 0;
    for (tag, count) in &counts {
        println!("{tag}: {count}");
        total += count;
    }
    println!("Total: {total}");
    Ok(())
}

/// Walks `root`, scans every readable text file and returns an engine holding
/// the sorted result forest.
fn scan_workspace(root: &Path, view: &ViewArgs) -> Result<TreeEngine> {
    let root = resolve_input_path(root)?;
    if !root.is_dir() {
        bail!("'{}' is not a directory", root.display());
    }

    let settings = load_settings(view)?;
    let scanner = Scanner::new(&scan_options(&settings))?;
    let mut engine = TreeEngine::new(settings, open_store(view))?;
    engine.rebuild()?;

    let folder_name = root
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("workspace")
        .to_string();
    let root_key = root.to_string_lossy().into_owned();
    engine.clear(vec![WorkspaceFolder::new(
        folder_name,
        RecordUri::file(root_key),
    )]);

    for path in collect_files(&root, engine.settings())? {
        let contents = match read_source(&path) {
            Ok(Some(contents)) => contents,
            Ok(None) => continue,
            Err(err) => {
                eprintln!("warning: {}: {}", path.display(), err);
                continue;
            }
        };
        let uri = RecordUri::file(path.to_string_lossy());
        for record in scanner.scan_source(&uri, &contents) {
            engine.add(record);
        }
    }
    engine.refresh();
    Ok(engine)
}

fn load_settings(view: &ViewArgs) -> Result<TreeSettings> {
    let mut settings = match &view.config {
        Some(path) => {
            let path = resolve_input_path(path)?;
            if !path.exists() {
                bail!("settings file '{}' does not exist", path.display());
            }
            TreeSettings::load(&path)?
        }
        None => TreeSettings::default(),
    };
    if view.tags_only {
        settings.tags_only = true;
    }
    if view.flat {
        settings.flatten = true;
    }
    if view.group_by_tag {
        settings.group_by_tag = true;
    }
    if view.group_by_sub_tag {
        settings.group_by_sub_tag = true;
    }
    if view.show_counts {
        settings.show_counts = true;
    }
    settings.sanitize();
    Ok(settings)
}

fn open_store(view: &ViewArgs) -> Box<dyn WorkspaceStateStore> {
    match &view.state {
        Some(path) => Box::new(JsonWorkspaceState::new(path)),
        None => Box::new(MemoryWorkspaceState::default()),
    }
}

fn scan_options(settings: &TreeSettings) -> ExtractOptions {
    let mut options = ExtractOptions::new(settings.tags.clone());
    options.case_sensitive = settings.case_sensitive;
    options.sub_tag_pattern = settings.sub_tag_regex.clone();
    options
}

/// Gitignore-aware traversal, narrowed by the configured include and
/// exclude globs.
fn collect_files(root: &Path, settings: &TreeSettings) -> Result<Vec<PathBuf>> {
    let mut overrides = OverrideBuilder::new(root);
    for glob in &settings.include_globs {
        overrides
            .add(glob)
            .with_context(|| format!("invalid include glob '{glob}'"))?;
    }
    for glob in &settings.exclude_globs {
        overrides
            .add(&format!("!{glob}"))
            .with_context(|| format!("invalid exclude glob '{glob}'"))?;
    }
    let overrides = overrides
        .build()
        .context("failed to compile glob overrides")?;

    let mut files = Vec::new();
    for entry in WalkBuilder::new(root).overrides(overrides).build() {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_some_and(|kind| kind.is_file()) {
                    files.push(entry.into_path());
                }
            }
            Err(err) => eprintln!("warning: {err}"),
        }
    }
    // Deterministic order keeps ids and sibling ties stable between runs.
    files.sort();
    Ok(files)
}

/// Strict UTF-8 first, charset detection as the fallback. `None` means the
/// file does not look like text.
fn read_source(path: &Path) -> Result<Option<String>> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if bytes.contains(&0) {
        return Ok(None);
    }
    match String::from_utf8(bytes) {
        Ok(text) => Ok(Some(text)),
        Err(err) => {
            let bytes = err.into_bytes();
            let mut detector = EncodingDetector::new();
            detector.feed(&bytes, true);
            let encoding: &'static RsEncoding = detector.guess(None, true);
            let (text, _, had_errors) = encoding.decode(&bytes);
            if had_errors {
                return Ok(None);
            }
            Ok(Some(text.into_owned()))
        }
    }
}

fn print_tree(engine: &TreeEngine) {
    for entry in engine.children(None) {
        print_entry(engine, &entry, 0);
    }
}

fn print_entry(engine: &TreeEngine, entry: &TreeEntry<'_>, depth: usize) {
    let item = engine.display_item(entry);
    let mut line = item.label;
    if let Some(description) = item.description {
        // Status rows carry their text in the description.
        if line.is_empty() {
            line = description;
        } else {
            line.push(' ');
            line.push_str(&description);
        }
    }
    println!("{}{line}", "  ".repeat(depth));

    if let Some(node) = entry.node() {
        for child in engine.children(Some(node)) {
            print_entry(engine, &child, depth + 1);
        }
    }
}

fn resolve_input_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("determine current directory")?
            .join(path))
    }
}
