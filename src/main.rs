use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use listing_vcs::config::{load_config, AppConfig};
use listing_vcs::error::{VcsError, VcsResult};
use listing_vcs::logging::init_logging;
use listing_vcs::manager::VersionManager;
use listing_vcs::model::{
    payload_from, AutoVersionOutcome, ChangeType, NewVersion, Payload, SaveOutcome, Version,
    VersionComparison, VersionTimeline,
};
use listing_vcs::server::run_http_server;
use listing_vcs::store::open_store;

/// listing-vcs: version control for structured listings
#[derive(Parser)]
#[command(name = "listing-vcs")]
#[command(
    about = "Version control for structured listings. Semantic versions, field diffs, branches and rollback."
)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "LISTING_VCS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the JSON API
    Serve,
    /// Start an interactive REPL session
    Interactive {
        /// Pre-load the demo listing on startup
        #[arg(long)]
        demo: bool,
    },
    /// Walk through saving, comparing, branching, merging and rolling back
    Demo,
    /// Save a JSON payload file as the next version of a listing
    Save {
        #[arg(short, long)]
        listing: String,
        /// Path to a JSON object
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long, default_value = "")]
        summary: String,
        #[arg(short, long)]
        branch: Option<String>,
        #[arg(short, long)]
        author: Option<String>,
        /// Force a change type instead of classifying the diff
        #[arg(long)]
        change_type: Option<ChangeType>,
    },
    /// Print the version timeline of a listing
    Timeline {
        #[arg(short, long)]
        listing: String,
        /// Restrict to one branch (all branches when omitted)
        #[arg(short, long)]
        branch: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Export the timeline of a listing as JSON
    Export {
        #[arg(short, long)]
        listing: String,
        #[arg(short, long)]
        branch: Option<String>,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    init_logging(&config.logging);
    let manager = build_manager(&config)?;

    match cli.command {
        Commands::Serve => {
            run_http_server(&config.server, manager)
                .await
                .context("HTTP server failed")?;
        }
        Commands::Interactive { demo } => {
            run_interactive(manager, demo)
                .await
                .context("interactive session failed")?;
        }
        Commands::Demo => {
            run_demo(manager).await.context("demo failed")?;
        }
        Commands::Save {
            listing,
            file,
            summary,
            branch,
            author,
            change_type,
        } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let value: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;
            let payload = payload_from(&value)?;

            let mut request = NewVersion::new(listing, payload).with_summary(summary);
            if let Some(branch) = branch {
                request = request.with_branch(branch);
            }
            if let Some(author) = author {
                request = request.with_author(author);
            }
            if let Some(change_type) = change_type {
                request = request.with_change_type(change_type);
            }

            let outcome = manager.save_version(request).await?;
            print_save_outcome(&outcome);
        }
        Commands::Timeline {
            listing,
            branch,
            limit,
        } => {
            let timeline = manager
                .get_timeline(&listing, branch.as_deref(), limit)
                .await?;
            print_timeline(&timeline, usize::MAX);
        }
        Commands::Export {
            listing,
            branch,
            output,
        } => {
            let document = manager.export_timeline(&listing, branch.as_deref()).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, document)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Exported timeline of '{}' to {}", listing, path.display());
                }
                None => println!("{}", document),
            }
        }
    }

    Ok(())
}

fn build_manager(config: &AppConfig) -> VcsResult<Arc<VersionManager>> {
    let store = open_store(&config.storage)?;
    Ok(Arc::new(VersionManager::with_config(
        store,
        config.versioning.clone(),
    )))
}

// ---------------------------------------------------------------------------
// Interactive REPL
// ---------------------------------------------------------------------------

/// Shared session state for the REPL.
struct Session {
    manager: Arc<VersionManager>,
    branch: String,
    author: String,
}

impl Session {
    fn new(manager: Arc<VersionManager>) -> Self {
        let settings = manager.settings();
        Self {
            branch: settings.default_branch.clone(),
            author: settings.default_author.clone(),
            manager,
        }
    }
}

async fn run_interactive(manager: Arc<VersionManager>, load_demo: bool) -> VcsResult<()> {
    let mut session = Session::new(manager);

    println!("=== listing-vcs Interactive REPL ===");
    println!("Version control for structured listings.\n");

    if load_demo {
        load_demo_data(&session).await?;
    }

    print_help();

    let stdin = io::stdin();
    loop {
        print!("\n[{}] listing-vcs> ", session.branch);
        io::stdout().flush().ok();

        let mut input = String::new();
        match stdin.read_line(&mut input) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let parts: Vec<&str> = input.splitn(2, char::is_whitespace).collect();
        let cmd = parts[0].to_lowercase();
        let args = if parts.len() > 1 { parts[1].trim() } else { "" };

        let result = match cmd.as_str() {
            "help" | "h" | "?" => {
                print_help();
                Ok(())
            }
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "status" => {
                println!("  Branch: {}  Author: {}", session.branch, session.author);
                Ok(())
            }
            "use" => cmd_use(&mut session, args),
            "author" => cmd_author(&mut session, args),
            "load-demo" => load_demo_data(&session).await,
            "save" => cmd_save(&session, args).await,
            "auto" => cmd_auto(&session, args).await,
            "latest" => cmd_latest(&session, args).await,
            "show" => cmd_show(&session, args).await,
            "timeline" | "history" => cmd_timeline(&session, args).await,
            "compare" | "diff" => cmd_compare(&session, args).await,
            "compare-branches" => cmd_compare_branches(&session, args).await,
            "rollback" => cmd_rollback(&session, args).await,
            "branch" => cmd_branch(&session, args).await,
            "merge" => cmd_merge(&session, args).await,
            "branches" => cmd_branches(&session, args).await,
            "export" => cmd_export(&session, args).await,
            _ => {
                println!(
                    "  Unknown command: '{}'. Type 'help' for available commands.",
                    cmd
                );
                Ok(())
            }
        };

        if let Err(e) = result {
            eprintln!("  Error: {}", e);
        }
    }

    Ok(())
}

fn print_help() {
    println!("  Commands:");
    println!("    status                          Show the session branch and author");
    println!("    use <branch>                    Switch the session branch");
    println!("    author <name>                   Set the author recorded on new versions");
    println!("    load-demo                       Load the demo listing 'mug-001'");
    println!("    save <listing> <json>           Save a payload (e.g. save L1 {{\"title\":\"A\"}})");
    println!("    auto <listing> [threshold] <json>  Save only if the change is large enough");
    println!("    latest <listing>                Show the latest version");
    println!("    show <listing> <version>        Show one version with its payload");
    println!("    timeline <listing> [all]        List versions (session branch, or all)");
    println!("    compare <listing> <a> <b>       Field diff between two versions");
    println!("    compare-branches <listing> <a> <b>  Field diff between branch heads");
    println!("    rollback <listing> <version>    Restore an earlier payload as a new version");
    println!("    branch <listing> <new> [from]   Start a branch from the latest version");
    println!("    merge <listing> <source> [target]  Take the source branch payload");
    println!("    branches <listing>              List branches");
    println!("    export <listing> [all]          Print the timeline export document");
    println!("    help                            Show this help message");
    println!("    quit                            Exit the REPL");
}

// ---------------------------------------------------------------------------
// REPL commands
// ---------------------------------------------------------------------------

/// Split off the first `n` whitespace-separated words; the rest is returned verbatim.
fn split_args(args: &str, n: usize) -> (Vec<&str>, &str) {
    let mut words = Vec::with_capacity(n);
    let mut rest = args.trim_start();
    while words.len() < n && !rest.is_empty() {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        words.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    (words, rest)
}

fn usage(text: &str) -> VcsResult<()> {
    Err(VcsError::InvalidArgument(format!("usage: {}", text)))
}

fn parse_payload(text: &str) -> VcsResult<Payload> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| VcsError::InvalidPayload(format!("not valid JSON: {}", e)))?;
    payload_from(&value)
}

fn cmd_use(session: &mut Session, args: &str) -> VcsResult<()> {
    let (words, _) = split_args(args, 1);
    let Some(branch) = words.first() else {
        return usage("use <branch>");
    };
    listing_vcs::manager::validate_identifier("branch", branch)?;
    session.branch = branch.to_string();
    println!("  Switched to branch '{}'.", session.branch);
    Ok(())
}

fn cmd_author(session: &mut Session, args: &str) -> VcsResult<()> {
    if args.is_empty() {
        return usage("author <name>");
    }
    session.author = args.to_string();
    println!("  Author set to '{}'.", session.author);
    Ok(())
}

async fn cmd_save(session: &Session, args: &str) -> VcsResult<()> {
    let (words, json_text) = split_args(args, 1);
    let (Some(listing), false) = (words.first(), json_text.is_empty()) else {
        return usage("save <listing> <json>");
    };

    let request = NewVersion::new(*listing, parse_payload(json_text)?)
        .with_branch(session.branch.clone())
        .with_author(session.author.clone());
    let outcome = session.manager.save_version(request).await?;
    print_save_outcome(&outcome);
    Ok(())
}

async fn cmd_auto(session: &Session, args: &str) -> VcsResult<()> {
    let (words, rest) = split_args(args, 1);
    let Some(listing) = words.first() else {
        return usage("auto <listing> [threshold] <json>");
    };

    let (threshold, json_text) = match split_args(rest, 1) {
        (first, tail) if !tail.is_empty() => match first.first().map(|w| w.parse::<f64>()) {
            Some(Ok(t)) => (Some(t), tail),
            _ => (None, rest),
        },
        _ => (None, rest),
    };
    if json_text.is_empty() {
        return usage("auto <listing> [threshold] <json>");
    }

    let outcome = session
        .manager
        .auto_version(
            listing,
            parse_payload(json_text)?,
            &session.branch,
            &session.author,
            threshold,
        )
        .await?;

    match outcome {
        AutoVersionOutcome::Created { version } => {
            println!("  Created:");
            print_version(&version);
        }
        AutoVersionOutcome::Unchanged { version } => {
            println!("  No field changed; latest stays {}.", version.version_id);
        }
        AutoVersionOutcome::BelowThreshold {
            change_ratio,
            threshold,
        } => {
            println!(
                "  Change ratio {:.3} is below threshold {:.3}; no version created.",
                change_ratio, threshold
            );
        }
    }
    Ok(())
}

async fn cmd_latest(session: &Session, args: &str) -> VcsResult<()> {
    let (words, _) = split_args(args, 1);
    let Some(listing) = words.first() else {
        return usage("latest <listing>");
    };

    match session.manager.get_latest(listing, &session.branch).await? {
        Some(version) => print_version(&version),
        None => println!("  '{}' has no versions on '{}'.", listing, session.branch),
    }
    Ok(())
}

async fn cmd_show(session: &Session, args: &str) -> VcsResult<()> {
    let (words, _) = split_args(args, 2);
    let [listing, version_id] = words[..] else {
        return usage("show <listing> <version>");
    };

    match session
        .manager
        .get_version(listing, version_id, &session.branch)
        .await?
    {
        Some(version) => {
            print_version(&version);
            println!(
                "  Payload: {}",
                serde_json::to_string_pretty(&version.payload)?
            );
        }
        None => println!(
            "  Version {} of '{}' not found on '{}'.",
            version_id, listing, session.branch
        ),
    }
    Ok(())
}

async fn cmd_timeline(session: &Session, args: &str) -> VcsResult<()> {
    let (words, _) = split_args(args, 2);
    let Some(listing) = words.first() else {
        return usage("timeline <listing> [all]");
    };
    let branch = match words.get(1) {
        Some(&"all") => None,
        _ => Some(session.branch.as_str()),
    };

    let timeline = session.manager.get_timeline(listing, branch, None).await?;
    print_timeline(&timeline, 10);
    Ok(())
}

async fn cmd_compare(session: &Session, args: &str) -> VcsResult<()> {
    let (words, _) = split_args(args, 3);
    let [listing, a, b] = words[..] else {
        return usage("compare <listing> <a> <b>");
    };

    let comparison = session
        .manager
        .compare(listing, a, b, &session.branch)
        .await?;
    print_comparison(&comparison);
    Ok(())
}

async fn cmd_compare_branches(session: &Session, args: &str) -> VcsResult<()> {
    let (words, _) = split_args(args, 3);
    let [listing, a, b] = words[..] else {
        return usage("compare-branches <listing> <branch-a> <branch-b>");
    };

    let comparison = session.manager.compare_branches(listing, a, b).await?;
    print_comparison(&comparison);
    Ok(())
}

async fn cmd_rollback(session: &Session, args: &str) -> VcsResult<()> {
    let (words, _) = split_args(args, 2);
    let [listing, target] = words[..] else {
        return usage("rollback <listing> <version>");
    };

    let outcome = session
        .manager
        .rollback(listing, target, &session.branch, &session.author)
        .await?;
    print_save_outcome(&outcome);
    Ok(())
}

async fn cmd_branch(session: &Session, args: &str) -> VcsResult<()> {
    let (words, _) = split_args(args, 3);
    let (listing, new_branch, from) = match words[..] {
        [listing, new_branch] => (listing, new_branch, session.branch.as_str()),
        [listing, new_branch, from] => (listing, new_branch, from),
        _ => return usage("branch <listing> <new> [from]"),
    };

    let version = session
        .manager
        .create_branch(listing, new_branch, from, &session.author)
        .await?;
    println!("  Branch '{}' created:", new_branch);
    print_version(&version);
    Ok(())
}

async fn cmd_merge(session: &Session, args: &str) -> VcsResult<()> {
    let (words, _) = split_args(args, 3);
    let (listing, source, target) = match words[..] {
        [listing, source] => (listing, source, session.branch.as_str()),
        [listing, source, target] => (listing, source, target),
        _ => return usage("merge <listing> <source> [target]"),
    };

    let outcome = session
        .manager
        .merge_branch(listing, source, target, &session.author)
        .await?;
    print_save_outcome(&outcome);
    Ok(())
}

async fn cmd_branches(session: &Session, args: &str) -> VcsResult<()> {
    let (words, _) = split_args(args, 1);
    let Some(listing) = words.first() else {
        return usage("branches <listing>");
    };

    let branches = session.manager.get_branches(listing).await?;
    if branches.is_empty() {
        println!("  '{}' has no branches yet.", listing);
    } else {
        for branch in branches {
            println!("  {}", branch);
        }
    }
    Ok(())
}

async fn cmd_export(session: &Session, args: &str) -> VcsResult<()> {
    let (words, _) = split_args(args, 2);
    let Some(listing) = words.first() else {
        return usage("export <listing> [all]");
    };
    let branch = match words.get(1) {
        Some(&"all") => None,
        _ => Some(session.branch.as_str()),
    };

    println!("{}", session.manager.export_timeline(listing, branch).await?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn print_version(v: &Version) {
    println!(
        "  {} [{}] {} | {} | @{} | {} | {}",
        v.version_id,
        v.change_type,
        v.branch,
        v.created_at.format("%Y-%m-%d %H:%M:%S"),
        v.author,
        v.content_hash,
        if v.change_summary.is_empty() {
            "(no summary)"
        } else {
            v.change_summary.as_str()
        }
    );
}

fn print_save_outcome(outcome: &SaveOutcome) {
    match outcome {
        SaveOutcome::Created(version) => {
            println!("  Created:");
            print_version(version);
        }
        SaveOutcome::Unchanged(version) => {
            println!(
                "  Payload identical to latest; no new version (still {}).",
                version.version_id
            );
        }
    }
}

fn print_timeline(timeline: &VersionTimeline, tail: usize) {
    println!(
        "  Timeline for '{}': {} versions, current {}, branches [{}]",
        timeline.listing_id,
        timeline.total_versions,
        timeline
            .current_version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string()),
        timeline.branches.join(", ")
    );

    let skip = timeline.versions.len().saturating_sub(tail);
    for v in timeline.versions.iter().skip(skip) {
        print_version(v);
    }
}

fn print_comparison(c: &VersionComparison) {
    println!(
        "  {}@{} -> {}@{}: similarity {:.0}%, {}/{} fields changed, severity {}",
        c.version_a,
        c.branch_a,
        c.version_b,
        c.branch_b,
        c.overall_similarity * 100.0,
        c.changed_fields,
        c.total_fields,
        c.change_severity
    );
    for d in c.field_diffs.iter().filter(|d| d.is_changed()) {
        println!(
            "    {:?} {} (similarity {:.0}%)",
            d.change,
            d.field,
            d.similarity * 100.0
        );
        for line in &d.diff_lines {
            println!("      {}", line);
        }
    }
}

// ---------------------------------------------------------------------------
// Demo
// ---------------------------------------------------------------------------

const DEMO_LISTING: &str = "mug-001";

fn demo_payloads() -> VcsResult<Vec<Payload>> {
    [
        json!({
            "title": "Ceramic Coffee Mug",
            "description": "A sturdy mug.",
            "price": 12.0,
            "tags": ["kitchen"]
        }),
        json!({
            "title": "Ceramic Coffee Mug 12oz",
            "description": "A sturdy mug.",
            "price": 12.0,
            "tags": ["kitchen"]
        }),
        json!({
            "title": "Ceramic Coffee Mug 12oz",
            "description": "A sturdy, dishwasher-safe mug for every morning.",
            "price": 12.0,
            "tags": ["kitchen"]
        }),
        json!({
            "title": "Ceramic Coffee Mug 12oz",
            "description": "A sturdy, dishwasher-safe mug for every morning.",
            "price": 11.5,
            "tags": ["kitchen", "gift"]
        }),
    ]
    .iter()
    .map(payload_from)
    .collect()
}

async fn load_demo_data(session: &Session) -> VcsResult<()> {
    let manager = &session.manager;
    let branch = manager.default_branch().to_string();
    println!("  Loading demo listing '{}' on '{}'...", DEMO_LISTING, branch);

    for (i, payload) in demo_payloads()?.into_iter().enumerate() {
        let outcome = manager
            .save_version(
                NewVersion::new(DEMO_LISTING, payload)
                    .with_branch(branch.clone())
                    .with_author("demo")
                    .with_summary(format!("demo edit {}", i + 1)),
            )
            .await?;
        println!("    + {} [{}]", outcome.version().version_id, outcome.version().change_type);
    }
    Ok(())
}

async fn run_demo(manager: Arc<VersionManager>) -> VcsResult<()> {
    println!("=== listing-vcs Demo ===\n");
    let main = manager.default_branch().to_string();

    println!("Phase 1: Saving successive edits of '{}'", DEMO_LISTING);
    for payload in demo_payloads()? {
        let outcome = manager
            .save_version(
                NewVersion::new(DEMO_LISTING, payload)
                    .with_branch(main.clone())
                    .with_author("demo"),
            )
            .await?;
        print_save_outcome(&outcome);
    }

    println!("\nPhase 2: Saving the same payload again");
    if let Some(last) = demo_payloads()?.pop() {
        let outcome = manager
            .save_version(NewVersion::new(DEMO_LISTING, last).with_branch(main.clone()))
            .await?;
        print_save_outcome(&outcome);
    }

    println!("\nPhase 3: Comparing 1.0.0 with the latest version");
    if let Some(latest) = manager.get_latest(DEMO_LISTING, &main).await? {
        let comparison = manager
            .compare(DEMO_LISTING, "1.0.0", &latest.version_id.to_string(), &main)
            .await?;
        print_comparison(&comparison);
    }

    println!("\nPhase 4: Branching an experimental variant");
    let variant = manager
        .create_branch(DEMO_LISTING, "variant-b", &main, "growth")
        .await?;
    print_version(&variant);
    let mut experiment = variant.payload.clone();
    experiment.insert("title".to_string(), json!("Best Coffee Mug - 12oz Ceramic"));
    let outcome = manager
        .save_version(
            NewVersion::new(DEMO_LISTING, experiment)
                .with_branch("variant-b")
                .with_author("growth")
                .with_summary("punchier title"),
        )
        .await?;
    print_save_outcome(&outcome);

    let comparison = manager
        .compare_branches(DEMO_LISTING, &main, "variant-b")
        .await?;
    print_comparison(&comparison);

    println!("\nPhase 5: Auto-versioning a tiny price tweak");
    if let Some(latest) = manager.get_latest(DEMO_LISTING, &main).await? {
        let mut tweak = latest.payload.clone();
        tweak.insert("price".to_string(), json!(11.49));
        match manager
            .auto_version(DEMO_LISTING, tweak, &main, "pricing-bot", Some(0.2))
            .await?
        {
            AutoVersionOutcome::BelowThreshold {
                change_ratio,
                threshold,
            } => println!(
                "  Skipped: change ratio {:.3} < threshold {:.3}",
                change_ratio, threshold
            ),
            other => println!("  {:?}", other.created().map(|v| v.version_id)),
        }
    }

    println!("\nPhase 6: Merging the variant into {}", main);
    let merged = manager
        .merge_branch(DEMO_LISTING, "variant-b", &main, "lead")
        .await?;
    print_save_outcome(&merged);

    println!("\nPhase 7: Rolling back to 1.0.0");
    let rolled_back = manager.rollback(DEMO_LISTING, "1.0.0", &main, "lead").await?;
    print_save_outcome(&rolled_back);

    println!();
    let timeline = manager.get_timeline(DEMO_LISTING, None, None).await?;
    print_timeline(&timeline, usize::MAX);

    println!("\nExport:");
    println!("{}", manager.export_timeline(DEMO_LISTING, Some(&main)).await?);
    Ok(())
}
