use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use projectindex_core::config::{BotConfig, load_config};
use projectindex_core::source::ReplicaSource;
use projectindex_core::store::IndexStore;
use projectindex_core::sync::run_sync;

#[derive(Debug, Parser)]
#[command(
    name = "projectindex",
    version,
    about = "Synchronize a project/page index from a wiki database replica"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", default_value = "projectindex.toml")]
    config: PathBuf,
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create the index tables for the configured source")]
    Init,
    #[command(about = "Run one full synchronization pass")]
    Sync(SyncArgs),
    #[command(about = "Print index row counts")]
    Stats,
    #[command(about = "List pages indexed under a project")]
    Members(MembersArgs),
    #[command(name = "projects-for", about = "List projects a page belongs to")]
    ProjectsFor(ProjectsForArgs),
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(long, value_name = "NAME", help = "Override the configured source name")]
    source: Option<String>,
    #[arg(long, help = "Print the pass report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct MembersArgs {
    project_id: i64,
    #[arg(long, value_name = "NS", help = "Only pages in this namespace")]
    namespace: Option<i64>,
    #[arg(long, help = "Exclude redirect pages")]
    no_redirects: bool,
}

#[derive(Debug, Args)]
struct ProjectsForArgs {
    page_id: i64,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    flexi_logger::Logger::try_with_env_or_str(&cli.log_level)
        .context("invalid log level")?
        .start()
        .context("failed to initialize logging")?;

    let config = load_config(&cli.config)?;
    match cli.command {
        Some(Commands::Init) => run_init(&config),
        Some(Commands::Sync(args)) => run_sync_pass(&config, args),
        Some(Commands::Stats) => run_stats(&config),
        Some(Commands::Members(args)) => run_members(&config, args),
        Some(Commands::ProjectsFor(args)) => run_projects_for(&config, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(config: &BotConfig) -> Result<()> {
    let source_name = config.source_name();
    let store = open_store(config, &source_name)?;
    store.ensure_tables()?;

    println!("Initialized index tables");
    println!("source: {source_name}");
    println!("index_db: {}", normalize_path(&config.index_db()));
    Ok(())
}

fn run_sync_pass(config: &BotConfig, args: SyncArgs) -> Result<()> {
    let source_name = args.source.unwrap_or_else(|| config.source_name());
    let replica_path = config.replica_db();
    if !replica_path.exists() {
        bail!("replica database not found: {}", normalize_path(&replica_path));
    }
    let source = ReplicaSource::open(&replica_path)?;
    let mut store = open_store(config, &source_name)?;

    let report = run_sync(&source, &mut store, &config.sync_options())?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("sync pass complete");
    println!("source: {source_name}");
    println!("projects.total: {}", report.projects_total);
    println!("projects.added: {}", report.projects_added);
    println!("projects.removed: {}", report.projects_removed);
    println!("projects.retitled: {}", report.projects_updated);
    println!("fragments.rejected: {}", report.rejected_fragments);
    println!("pages.inserted: {}", report.pages_inserted);
    println!("pages.updated: {}", report.pages_updated);
    println!("pages.orphans_removed: {}", report.orphan_pages_removed);
    println!("memberships.added: {}", report.memberships_added);
    println!("memberships.removed: {}", report.memberships_removed);
    println!("candidates.discarded: {}", report.candidates_discarded);
    Ok(())
}

fn run_stats(config: &BotConfig) -> Result<()> {
    let source_name = config.source_name();
    let store = open_store(config, &source_name)?;
    store.ensure_tables()?;
    let stats = store.stats()?;

    println!("index stats");
    println!("source: {source_name}");
    println!("index_db: {}", normalize_path(&config.index_db()));
    println!("projects: {}", stats.projects);
    println!("pages: {}", stats.pages);
    println!("pages.redirects: {}", stats.redirect_pages);
    println!("memberships: {}", stats.memberships);
    Ok(())
}

fn run_members(config: &BotConfig, args: MembersArgs) -> Result<()> {
    let store = open_store(config, &config.source_name())?;
    store.ensure_tables()?;
    let redirects = if args.no_redirects { Some(false) } else { None };
    let members = store.project_members(args.project_id, args.namespace, redirects)?;

    println!("project members");
    println!("project_id: {}", args.project_id);
    println!("members.count: {}", members.len());
    if members.is_empty() {
        println!("members: <none>");
    } else {
        for member in members {
            println!(
                "members.page: {} (id {}, ns {}{})",
                member.title,
                member.id,
                member.namespace,
                if member.is_redirect { ", redirect" } else { "" }
            );
        }
    }
    Ok(())
}

fn run_projects_for(config: &BotConfig, args: ProjectsForArgs) -> Result<()> {
    let store = open_store(config, &config.source_name())?;
    store.ensure_tables()?;
    let projects = store.projects_for_page(args.page_id)?;

    println!("projects for page");
    println!("page_id: {}", args.page_id);
    println!("projects.count: {}", projects.len());
    if projects.is_empty() {
        println!("projects: <none>");
    } else {
        for project in projects {
            println!("projects.title: {} (id {})", project.title, project.id);
        }
    }
    Ok(())
}

fn open_store(config: &BotConfig, source_name: &str) -> Result<IndexStore> {
    IndexStore::open(&config.index_db(), source_name)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
