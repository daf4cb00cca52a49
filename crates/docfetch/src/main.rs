use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use docfetch_core::inspect::{diff_document, local_status};
use docfetch_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, ensure_runtime_ready,
    init_layout, inspect_runtime, normalize_for_display, resolve_paths,
};
use docfetch_core::store::DocumentStore;
use docfetch_core::sync::{CancelFlag, SyncOptions, fetch_by_url, search_remote, sync_all};

#[derive(Debug, Parser)]
#[command(
    name = "docfetch",
    version,
    about = "Fetch remote wiki pages and keep local Markdown copies in sync"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, help = "Emit reports as JSON")]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
    json: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            root: cli.root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
            json: cli.json,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Fetch(FetchArgs),
    Sync(SyncArgs),
    List(ListArgs),
    Search(SearchArgs),
    Status,
    Diff(DiffArgs),
    Remove(RemoveArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite existing config and index files")]
    force: bool,
    #[arg(long, help = "Skip writing .docfetch/config.toml")]
    no_config: bool,
}

#[derive(Debug, Args)]
struct FetchArgs {
    url: String,
    #[arg(short = 'c', long, value_name = "NAME", help = "Category folder for the saved file")]
    category: Option<String>,
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(value_name = "REMOTE_ID", help = "Sync only these remote ids")]
    remote_ids: Vec<String>,
    #[arg(short = 'c', long, value_name = "NAME", help = "Filter by category")]
    category: Option<String>,
    #[arg(long, help = "Resync even when the remote version is not newer")]
    force: bool,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(short = 'c', long, value_name = "NAME", help = "Filter by category")]
    category: Option<String>,
}

#[derive(Debug, Args)]
struct SearchArgs {
    query: String,
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

#[derive(Debug, Args)]
struct DiffArgs {
    remote_id: String,
}

#[derive(Debug, Args)]
struct RemoveArgs {
    remote_id: String,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Fetch(args)) => run_fetch(&runtime, args),
        Some(Commands::Sync(args)) => run_sync(&runtime, args),
        Some(Commands::List(args)) => run_list(&runtime, args),
        Some(Commands::Search(args)) => run_search(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Diff(args)) => run_diff(&runtime, args),
        Some(Commands::Remove(args)) => run_remove(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        root: runtime.root.clone(),
        config: runtime.config.clone(),
    };
    let paths = resolve_paths(&context, &overrides)?;
    if runtime.diagnostics {
        println!("[diagnostics]\n{}\n", paths.diagnostics());
    }
    Ok(paths)
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;

    println!("Initialized docfetch layout");
    println!("root_dir: {}", normalize_for_display(&paths.root_dir));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("index_path: {}", normalize_for_display(&paths.index_path));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_index: {}", report.wrote_index);
    println!("wrote_config: {}", report.wrote_config);
    Ok(())
}

fn run_fetch(runtime: &RuntimeOptions, args: FetchArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    ensure_runtime_ready(&paths, &status)?;

    let report = fetch_by_url(&paths, &args.url, args.category.as_deref())?;
    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("fetch {}", args.url);
    println!("action: {}", report.action);
    println!("title: {}", report.metadata.title);
    println!("remote_id: {}", report.metadata.remote_id);
    println!("version: {}", report.metadata.version);
    println!("path: {}", report.metadata.relative_path);
    println!("checksum: {}", report.metadata.checksum);
    println!("requests: {}", report.request_count);
    Ok(())
}

fn run_sync(runtime: &RuntimeOptions, args: SyncArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    ensure_runtime_ready(&paths, &status)?;

    let options = SyncOptions {
        category: args.category,
        remote_ids: args.remote_ids,
        force: args.force,
    };
    let report = sync_all(&paths, &options, &CancelFlag::new())?;
    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("sync");
    println!("requested: {}", report.requested);
    println!("synced: {}", report.synced);
    println!("skipped: {}", report.skipped);
    println!("failed: {}", report.failed);
    println!("cancelled: {}", report.cancelled);
    println!("requests: {}", report.request_count);
    for item in &report.items {
        match &item.detail {
            Some(detail) => println!("  {} {} ({detail})", item.action, item.title),
            None => println!("  {} {}", item.action, item.title),
        }
    }
    if !report.errors.is_empty() {
        println!("errors:");
        for error in &report.errors {
            println!("  - {error}");
        }
    }
    println!("success: {}", report.success);
    Ok(())
}

fn run_list(runtime: &RuntimeOptions, args: ListArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let store = DocumentStore::open(&paths);
    let documents = store.list(args.category.as_deref())?;
    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&documents)?);
        return Ok(());
    }
    println!("documents: {}", documents.len());
    for document in &documents {
        println!(
            "  {}  remote_id={} version={} synced_at={}",
            document.relative_path,
            document.remote_id,
            document.version,
            document.synced_at.to_rfc3339()
        );
    }
    Ok(())
}

fn run_search(runtime: &RuntimeOptions, args: SearchArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let hits = search_remote(&paths, &args.query, args.limit)?;
    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    println!("hits: {}", hits.len());
    for hit in &hits {
        println!("  [{}] {} ({})", hit.id, hit.title, hit.space_key);
        if !hit.excerpt.is_empty() {
            println!("      {}", hit.excerpt);
        }
    }
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    let report = local_status(&paths)?;
    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("runtime status");
    println!("root_dir: {}", normalize_for_display(&paths.root_dir));
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("index_exists: {}", format_flag(status.index_exists));
    println!(
        "index_size_bytes: {}",
        status
            .index_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("tracked: {}", report.tracked);
    println!("modified: {}", report.modified);
    println!("not_tracked: {}", report.not_tracked);
    println!("missing: {}", report.missing);
    for file in &report.files {
        if file.state != "tracked" {
            println!("  {} {}", file.state, file.relative_path);
        }
    }
    for path in &report.missing_paths {
        println!("  missing {path}");
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    Ok(())
}

fn run_diff(runtime: &RuntimeOptions, args: DiffArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    ensure_runtime_ready(&paths, &status)?;

    match diff_document(&paths, &args.remote_id)? {
        Some(diff) => println!("{diff}"),
        None => println!("no differences for {}", args.remote_id),
    }
    Ok(())
}

fn run_remove(runtime: &RuntimeOptions, args: RemoveArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let store = DocumentStore::open(&paths);
    let Some(metadata) = store.find_by_remote_id(&args.remote_id)? else {
        bail!("remote id {} is not tracked", args.remote_id);
    };
    store.delete(metadata.local_id)?;
    println!("removed {}", metadata.relative_path);
    println!("remote_id: {}", metadata.remote_id);
    Ok(())
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
