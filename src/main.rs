use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use weave_cluster::compare::ComparisonResult;
use weave_cluster::engine::{cluster, ClusteringRequest, ClusteringResult};
use weave_cluster::snapshot::ClusteringSnapshot;
use weave_core::{AlgorithmKind, CancelToken, FileId, OutputFormat, WeaveConfig, WeaveError, WeightColumn};
use weave_coupling::cache::cache_key;
use weave_coupling::coupling::{compute_coupling, CommitRange, CouplingParams, CouplingResult};
use weave_history::materialize::FileReport;
use weave_history::mining::{repository_id, GitCommitStream, GitHeadListing, MiningOptions};
use weave_history::run::{run_analysis, AnalysisOptions, AnalysisRun, RunCoordinator};
use weave_history::thresholds::RepoThresholds;
use weave_store::snapshots::{compare, SnapshotStore};
use weave_store::sqlite::SqliteStore;

#[derive(Parser)]
#[command(
    name = "gitweave",
    version,
    about = "Logical coupling, hot spots and module drift from git history",
    long_about = "gitweave mines a repository's commit history into per-file activity metrics,\n\
                   classifies files as hot or stable against repository-relative thresholds,\n\
                   scores temporal coupling between files and clusters the coupling graph into\n\
                   modules that can be snapshotted and compared over time.\n\n\
                   Examples:\n  \
                     gitweave analyze                 Materialize metrics and thresholds\n  \
                     gitweave files --class hot       List hot files from the latest run\n  \
                     gitweave coupling --limit 20     Strongest co-changing file pairs\n  \
                     gitweave cluster --save v1.0     Cluster and store a snapshot\n  \
                     gitweave snapshot compare 1 2    How modules moved between snapshots"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .weave.toml under --path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repository path (default: current directory)
    #[arg(long, global = true, default_value = ".")]
    path: PathBuf,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text  Human-readable tables and summaries (default)\n  \
                         json  Machine-readable JSON with camelCase keys"
    )]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,

    /// When to use colors
    #[arg(long, global = true, default_value = "auto")]
    color: ColorChoice,
}

#[derive(Subcommand)]
enum Command {
    /// Materialize per-file metrics, thresholds and classifications
    #[command(long_about = "Materialize per-file metrics, thresholds and classifications.\n\n\
        Extends the latest stored run with the commits after its watermark, or rescans\n\
        the whole history with --full. Metrics and thresholds are stored together.\n\n\
        Examples:\n  gitweave analyze\n  gitweave analyze --full --as-of 2024-06-30")]
    Analyze {
        /// Ignore the stored run and rescan the full history
        #[arg(long)]
        full: bool,

        /// Reference time (YYYY-MM-DD, RFC 3339 or unix seconds; default: newest commit)
        #[arg(long)]
        as_of: Option<String>,

        /// Maximum files listed per class (default: 10)
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// List per-file metrics from the latest analysis run
    Files {
        /// Only list files of this class
        #[arg(long, default_value = "all")]
        class: ClassFilter,

        /// Maximum files to list (default: all)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show the thresholds of the latest run, or their history
    Thresholds {
        /// Show every stored threshold set, oldest first
        #[arg(long)]
        history: bool,
    },
    /// Score temporal coupling between files
    #[command(long_about = "Score temporal coupling between files.\n\n\
        Coupling is the Dice coefficient 2*support/(count_a+count_b) over commits that\n\
        touch both files. Results are cached per parameters and commit range.\n\n\
        Examples:\n  gitweave coupling\n  gitweave coupling --file src/lib.rs --min-support 5")]
    Coupling {
        /// Minimum number of shared commits
        #[arg(long)]
        min_support: Option<u32>,

        /// Minimum coupling score
        #[arg(long)]
        min_coupling: Option<f64>,

        /// Only show pairs involving this path
        #[arg(long)]
        file: Option<String>,

        /// Maximum pairs to show (default: 20)
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Cluster the coupling graph into modules
    #[command(long_about = "Cluster the coupling graph into modules.\n\n\
        Files without any edge above --min-weight are reported as isolated and never\n\
        form clusters. Use --save to store the result as a snapshot.\n\n\
        Examples:\n  gitweave cluster\n  gitweave cluster --algorithm components --min-weight 0.5\n  \
        gitweave cluster --folder src/api --save api-2024q3 --tag release")]
    Cluster {
        /// Community detection strategy
        #[arg(long)]
        algorithm: Option<AlgorithmKind>,

        /// Edge value used as weight
        #[arg(long)]
        weight: Option<WeightColumn>,

        /// Drop edges below this weight
        #[arg(long)]
        min_weight: Option<f64>,

        /// Louvain resolution; higher values give smaller clusters
        #[arg(long)]
        resolution: Option<f64>,

        /// Restrict to files under these folders (repeatable)
        #[arg(long)]
        folder: Vec<String>,

        /// Entries per summary list
        #[arg(long)]
        top: Option<usize>,

        /// Save the result as a snapshot with this name
        #[arg(long)]
        save: Option<String>,

        /// Tags for the saved snapshot (repeatable)
        #[arg(long, requires = "save")]
        tag: Vec<String>,
    },
    /// Manage and compare saved clustering snapshots
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
    /// Create a default .weave.toml configuration file
    #[command(long_about = "Create a default .weave.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .weave.toml already exists.")]
    Init,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// List saved snapshots, newest first
    List,
    /// Show the clusters of a snapshot
    Show { id: i64 },
    /// Show the inter-cluster edges of a snapshot
    Edges { id: i64 },
    /// Match the clusters of two snapshots
    Compare { base: i64, head: i64 },
    /// Rename a snapshot
    Rename { id: i64, name: String },
    /// Replace the tags of a snapshot
    Tag { id: i64, tags: Vec<String> },
    /// Delete a snapshot
    Delete { id: i64 },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ClassFilter {
    Hot,
    Stable,
    Unknown,
    All,
}

impl ClassFilter {
    fn keeps(self, report: &FileReport) -> bool {
        match self {
            ClassFilter::Hot => report.is_hot,
            ClassFilter::Stable => report.is_stable,
            ClassFilter::Unknown => report.is_unknown,
            ClassFilter::All => true,
        }
    }
}

#[derive(Clone, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    /// Auto-detect based on terminal
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

fn print_welcome(use_color: bool) {
    let version = env!("CARGO_PKG_VERSION");
    let commands = [
        ("analyze", "Per-file metrics, thresholds and hot/stable classes"),
        ("files", "Per-file view of the latest run"),
        ("thresholds", "Repository thresholds and their history"),
        ("coupling", "Co-change coupling between files"),
        ("cluster", "Modules from the coupling graph"),
        ("snapshot", "Save, list and compare clusterings"),
        ("init", "Create default configuration"),
    ];

    if use_color {
        println!("\x1b[1mgitweave\x1b[0m v{version}\n");
        println!("All commands:");
        for (name, about) in commands {
            println!("  \x1b[32m{name:<11}\x1b[0m{about}");
        }
    } else {
        println!("gitweave v{version}\n");
        println!("All commands:");
        for (name, about) in commands {
            println!("  {name:<11}{about}");
        }
    }
    println!("\nRun 'gitweave <command> --help' for details.");
}

fn ensure_git_repo(path: &Path) -> Result<()> {
    if !path.join(".git").exists() && git2::Repository::discover(path).is_err() {
        miette::bail!(miette::miette!(
            help = "Run gitweave from inside a git repository, or specify --path to one",
            "Not a git repository: {}",
            path.display()
        ));
    }
    Ok(())
}

/// Store location; relative paths are resolved against the repository.
fn store_path(repo: &Path, config: &WeaveConfig) -> PathBuf {
    if config.store.path.is_absolute() {
        config.store.path.clone()
    } else {
        repo.join(&config.store.path)
    }
}

fn parse_as_of(value: &str) -> Result<i64> {
    if let Ok(seconds) = value.parse::<i64>() {
        return Ok(seconds);
    }
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.timestamp());
    }
    if let Some(end_of_day) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
    {
        return Ok(Utc.from_utc_datetime(&end_of_day).timestamp());
    }
    miette::bail!(miette::miette!(
        help = "Use YYYY-MM-DD, an RFC 3339 timestamp or unix seconds",
        "Invalid --as-of value: {value}"
    ))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn spinner(message: &str) -> Option<indicatif::ProgressBar> {
    if !std::io::stderr().is_terminal() {
        eprintln!("{message}");
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    Some(pb)
}

/// Run `work` on the blocking pool. Ctrl-C cancels it through its token.
async fn run_blocking<T, F>(message: &str, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(CancelToken) -> std::result::Result<T, WeaveError> + Send + 'static,
{
    let cancel = CancelToken::new();
    let token = cancel.clone();
    let progress = spinner(message);
    let mut task = tokio::task::spawn_blocking(move || work(token));

    let joined = tokio::select! {
        joined = &mut task => joined,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            if let Some(pb) = &progress {
                pb.set_message("Cancelling...");
            }
            task.await
        }
    };
    let outcome = joined.into_diagnostic()?;

    if let Some(pb) = progress {
        pb.finish_with_message(if outcome.is_ok() { "Done" } else { "Failed" });
    }
    Ok(outcome?)
}

/// Coupling over the configured history, served from the cache when the
/// parameters and commit range are unchanged.
fn load_coupling(
    repo: &Path,
    store: &Path,
    mining: &MiningOptions,
    params: CouplingParams,
    cancel: &CancelToken,
) -> std::result::Result<CouplingResult, WeaveError> {
    let mut stream = GitCommitStream::open(repo, mining)?;
    let range = CommitRange {
        first: stream.first_commit_id(),
        last: stream.last_commit_id(),
        count: stream.len() as u64,
    };
    let key = cache_key(&params, &range);
    let repo_id = repository_id(repo)?;
    let mut store = SqliteStore::open(store)?;
    if let Some(cached) = store.cached_coupling(&key)? {
        tracing::debug!(%key, "coupling served from cache");
        return Ok(cached);
    }
    let result = compute_coupling(&mut stream, params, cancel)?;
    store.cache_coupling(&repo_id, &key, &result)?;
    Ok(result)
}

fn latest_run(store: &SqliteStore, repo: &Path) -> Result<AnalysisRun> {
    let repo_id = repository_id(repo)?;
    match store.latest_run(&repo_id)? {
        Some(run) => Ok(run),
        None => miette::bail!(miette::miette!(
            help = "Run `gitweave analyze` first",
            "No analysis run stored for {repo_id}"
        )),
    }
}

fn print_reports(reports: &[&FileReport], use_color: bool) {
    println!(
        "  {:<48} {:>7} {:>5} {:>5} {:>9} {:>6}  class",
        "path", "commits", "30d", "90d", "per-month", "age"
    );
    for r in reports {
        let class = if r.is_hot {
            "hot"
        } else if r.is_stable {
            "stable"
        } else if r.is_unknown {
            "unknown"
        } else {
            ""
        };
        let class = match (use_color, class) {
            (true, "hot") => "\x1b[31mhot\x1b[0m".to_string(),
            (true, "stable") => "\x1b[32mstable\x1b[0m".to_string(),
            (_, other) => other.to_string(),
        };
        let age = r
            .days_since_last_change
            .map_or_else(|| "-".to_string(), |d| format!("{d}d"));
        println!(
            "  {:<48} {:>7} {:>5} {:>5} {:>9.2} {:>6}  {}",
            r.path,
            r.total_commits,
            r.commits_30d,
            r.commits_90d,
            r.lifetime_commits_per_month,
            age,
            class
        );
    }
}

fn print_thresholds(t: &RepoThresholds) {
    println!(
        "Thresholds (run {}, {} files{}):",
        t.run_id,
        t.population,
        if t.empty_population {
            ", empty population: guard values"
        } else {
            ""
        }
    );
    println!("  hot:    commits_30d >= {:.2}", t.hot30);
    println!("          commits_90d >= {:.2}", t.hot90);
    println!("          commits/month >= {:.2}", t.hot_rate);
    println!("  stable: days since change >= {:.1}", t.stable_days);
    println!("          commits_90d <= {:.2}", t.stable90);
    println!("          commits/month <= {:.2}", t.stable_rate);
}

fn print_cluster_result(result: &ClusteringResult, header: &str) {
    println!("{header}");
    println!(
        "  {} clusters over {} files, {} isolated, {} edges{}",
        result.cluster_count,
        result.metrics.clustered_files,
        result.metrics.isolated_files,
        result.metrics.edge_count,
        result
            .metrics
            .modularity
            .map_or_else(String::new, |q| format!(", modularity {q:.3}"))
    );
    for c in &result.clusters {
        println!(
            "\nCluster {} ({} files, churn {}, avg coupling {:.2})",
            c.id, c.size, c.summary.total_churn, c.summary.avg_internal_coupling
        );
        for f in &c.summary.top_files {
            println!("  {:<56} churn {}", f.path, f.churn);
        }
        if c.size > c.summary.top_files.len() {
            println!("  ... and {} more", c.size - c.summary.top_files.len());
        }
        if !c.summary.common_authors.is_empty() {
            let authors: Vec<String> = c
                .summary
                .common_authors
                .iter()
                .map(|a| format!("{} ({})", a.author, a.commits))
                .collect();
            println!("  authors: {}", authors.join(", "));
        }
    }
}

fn print_comparison(diff: &ComparisonResult, base: &ClusteringSnapshot, head: &ClusteringSnapshot) {
    println!(
        "Comparing snapshot {} ({}) -> {} ({})",
        base.id, base.name, head.id, head.name
    );
    println!(
        "  {} stable, {} drifted, {} dissolved, {} new",
        diff.counts.stable, diff.counts.drifted, diff.counts.dissolved, diff.counts.new
    );
    for m in &diff.matches {
        match m.best_match {
            Some(target) => println!(
                "  cluster {} ({} files): {} -> {} (overlap {}, ratio {:.2}, size {:+}), {} departed",
                m.base_cluster,
                m.base_size,
                m.status,
                target,
                m.overlap_count,
                m.overlap_ratio,
                m.size_diff,
                m.departed.len()
            ),
            None => println!(
                "  cluster {} ({} files): {}, {} departed",
                m.base_cluster,
                m.base_size,
                m.status,
                m.departed.len()
            ),
        }
    }
    if !diff.new_clusters.is_empty() {
        let ids: Vec<String> = diff.new_clusters.iter().map(u32::to_string).collect();
        println!("New clusters: {}", ids.join(", "));
    }
    if !diff.flows.is_empty() {
        println!("Flows:");
        for flow in &diff.flows {
            println!("  {} -> {}: {}", flow.source, flow.target, flow.value);
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOutput<'a> {
    repository_id: &'a str,
    run_id: u64,
    watermark: Option<&'a str>,
    commits_folded: u64,
    oversized_commits: usize,
    reconciled_files: usize,
    counts: &'a weave_history::classify::ClassCounts,
    thresholds: &'a RepoThresholds,
}

/// Configuration file looked up in the repository root.
const CONFIG_FILE: &str = ".weave.toml";

const DEFAULT_CONFIG: &str = r#"# gitweave configuration

[history]
# since_days = 365
# branch = "main"
# max_changeset_size = 50
# batch_size = 500
# as_of = 1719791999

[thresholds]
# hot30_percentile = 0.95
# hot30_floor = 3.0
# hot90_percentile = 0.90
# hot90_floor = 6.0
# hot_rate_percentile = 0.90
# hot_rate_floor = 3.0
# stable_days_percentile = 0.75
# stable_days_floor = 180.0
# stable90_percentile = 0.25
# stable90_ceiling = 1.0
# stable_rate_percentile = 0.50
# stable_rate_ceiling = 1.0

[coupling]
# min_support = 3
# min_coupling = 0.1

[clustering]
# algorithm = "louvain"      # or "components"
# weight_column = "coupling" # or "support", "confidence"
# min_weight = 0.3
# resolution = 1.0
# top_n = 5

[comparison]
# stable_threshold = 0.7
# drift_threshold = 0.3

[store]
# path = ".weave/weave.db"
"#;

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => WeaveConfig::from_file(path)?,
        None => {
            let default_path = cli.path.join(CONFIG_FILE);
            if default_path.exists() {
                WeaveConfig::from_file(&default_path)?
            } else {
                WeaveConfig::default()
            }
        }
    };

    let use_color = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    };

    let repo = cli.path.clone();
    let coordinator = RunCoordinator::new();
    let db_path = store_path(&repo, &config);
    if cli.verbose {
        eprintln!("format: {}", cli.format);
        eprintln!("store: {}", db_path.display());
    }

    match cli.command {
        None => {
            print_welcome(use_color);
            return Ok(());
        }
        Some(Command::Analyze {
            full,
            ref as_of,
            limit,
        }) => {
            ensure_git_repo(&repo)?;
            let repo_id = repository_id(&repo)?;
            let mut store = SqliteStore::open(&db_path)?;
            let previous = if full {
                None
            } else {
                store.latest_run(&repo_id)?
            };

            let mut options = AnalysisOptions::from(&config);
            options.base_run_id = store.latest_run_id(&repo_id)?.unwrap_or(0);
            if let Some(value) = as_of {
                options.materialize.as_of = Some(parse_as_of(value)?);
            }
            let mut mining = MiningOptions::from(&config.history);
            mining.since_commit = previous.as_ref().and_then(|p| p.watermark.clone());
            if let Some(prev) = &previous {
                eprintln!(
                    "Extending run {} from {}",
                    prev.run_id,
                    prev.watermark.as_deref().unwrap_or("the beginning")
                );
            }

            // The store lease guards against other processes, the
            // coordinator against other tasks in this one.
            let store_lease = store.acquire_lease(&repo_id)?;
            let worker_repo = repo.clone();
            let worker_id = repo_id.clone();
            let worker_coordinator = Arc::clone(&coordinator);
            let outcome = run_blocking("Analyzing history...", move |cancel| {
                let lease = worker_coordinator.try_begin(&worker_id)?;
                let mut stream = GitCommitStream::open(&worker_repo, &mining)?;
                let head = GitHeadListing::open(&worker_repo, mining.branch.clone())?;
                run_analysis(&lease, &mut stream, Some(&head), previous, &options, &cancel)
            })
            .await
            .and_then(|run| {
                store.save_run(&run)?;
                Ok(run)
            });
            store.release_lease(&store_lease)?;
            let run = outcome?;

            match cli.format {
                OutputFormat::Json => print_json(&AnalyzeOutput {
                    repository_id: &run.repository_id,
                    run_id: run.run_id,
                    watermark: run.watermark.as_deref(),
                    commits_folded: run.diagnostics.commits_folded,
                    oversized_commits: run.diagnostics.oversized_count(),
                    reconciled_files: run.diagnostics.reconciled_files,
                    counts: &run.counts,
                    thresholds: &run.thresholds,
                })?,
                OutputFormat::Text => {
                    let c = &run.counts;
                    println!(
                        "Run {}: {} files ({} hot, {} stable, {} ordinary, {} unknown)",
                        run.run_id,
                        c.total(),
                        c.hot,
                        c.stable,
                        c.ordinary,
                        c.unknown
                    );
                    if run.diagnostics.oversized_count() > 0 {
                        println!(
                            "{} oversized changesets excluded from coupling",
                            run.diagnostics.oversized_count()
                        );
                    }
                    println!();
                    print_thresholds(&run.thresholds);
                    let reports = run.file_reports();
                    for (title, filter) in [("Hot", ClassFilter::Hot), ("Stable", ClassFilter::Stable)] {
                        let mut picked: Vec<&FileReport> =
                            reports.iter().filter(|r| filter.keeps(r)).collect();
                        if picked.is_empty() {
                            continue;
                        }
                        picked.sort_by(|a, b| b.commits_90d.cmp(&a.commits_90d));
                        println!("\n{title} files:");
                        print_reports(&picked[..picked.len().min(limit)], use_color);
                    }
                }
            }
        }
        Some(Command::Files { class, limit }) => {
            let store = SqliteStore::open(&db_path)?;
            let run = latest_run(&store, &repo)?;
            let reports = run.file_reports();
            let picked: Vec<&FileReport> = reports
                .iter()
                .filter(|r| class.keeps(r))
                .take(limit.unwrap_or(usize::MAX))
                .collect();
            match cli.format {
                OutputFormat::Json => print_json(&picked)?,
                OutputFormat::Text => {
                    println!("Run {} ({} files shown)", run.run_id, picked.len());
                    print_reports(&picked, use_color);
                }
            }
        }
        Some(Command::Thresholds { history }) => {
            let store = SqliteStore::open(&db_path)?;
            if history {
                let repo_id = repository_id(&repo)?;
                let all = store.threshold_history(&repo_id)?;
                match cli.format {
                    OutputFormat::Json => print_json(&all)?,
                    OutputFormat::Text => {
                        println!(
                            "  {:>4}  {:<25} {:>6} {:>6} {:>6} {:>7} {:>6} {:>6}",
                            "run", "computed", "hot30", "hot90", "rate", "days", "st90", "strate"
                        );
                        for t in &all {
                            println!(
                                "  {:>4}  {:<25} {:>6.2} {:>6.2} {:>6.2} {:>7.1} {:>6.2} {:>6.2}",
                                t.run_id,
                                t.computed_at.to_rfc3339(),
                                t.hot30,
                                t.hot90,
                                t.hot_rate,
                                t.stable_days,
                                t.stable90,
                                t.stable_rate
                            );
                        }
                    }
                }
            } else {
                let run = latest_run(&store, &repo)?;
                match cli.format {
                    OutputFormat::Json => print_json(&run.thresholds)?,
                    OutputFormat::Text => print_thresholds(&run.thresholds),
                }
            }
        }
        Some(Command::Coupling {
            min_support,
            min_coupling,
            ref file,
            limit,
        }) => {
            ensure_git_repo(&repo)?;
            let mut params = CouplingParams::from(&config);
            if let Some(v) = min_support {
                params.min_support = v;
            }
            if let Some(v) = min_coupling {
                params.min_coupling = v;
            }
            let mining = MiningOptions::from(&config.history);
            let worker_repo = repo.clone();
            let worker_db = db_path.clone();
            let result = run_blocking("Computing coupling...", move |cancel| {
                load_coupling(&worker_repo, &worker_db, &mining, params, &cancel)
            })
            .await?;

            let edges: Vec<_> = match file {
                Some(path) => result
                    .edges_of(FileId::from_path(path))
                    .take(limit)
                    .collect(),
                None => result.edges.iter().take(limit).collect(),
            };
            match cli.format {
                OutputFormat::Json => print_json(&edges)?,
                OutputFormat::Text => {
                    println!(
                        "{} pairs over {} commits ({} changesets excluded)",
                        result.edges.len(),
                        result.range.count,
                        result.excluded_commits.len()
                    );
                    for e in edges {
                        println!(
                            "  {:.2}  {:>4}x  {} <-> {}",
                            e.coupling,
                            e.support,
                            result.catalog.display_path(e.file_a),
                            result.catalog.display_path(e.file_b)
                        );
                    }
                }
            }
        }
        Some(Command::Cluster {
            algorithm,
            weight,
            min_weight,
            resolution,
            ref folder,
            top,
            ref save,
            ref tag,
        }) => {
            ensure_git_repo(&repo)?;
            let mut request = ClusteringRequest::from(&config.clustering);
            if let Some(v) = algorithm {
                request.algorithm = v;
            }
            if let Some(v) = weight {
                request.parameters.weight_column = v;
            }
            if let Some(v) = min_weight {
                request.parameters.min_weight = v;
            }
            if let Some(v) = resolution {
                request.parameters.resolution = v;
            }
            if let Some(v) = top {
                request.parameters.top_n = v;
            }
            request.parameters.folders = folder.clone();
            request.validate()?;

            let params = CouplingParams::from(&config);
            let mining = MiningOptions::from(&config.history);
            let worker_repo = repo.clone();
            let worker_db = db_path.clone();
            let result = run_blocking("Clustering...", move |cancel| {
                let coupling = load_coupling(&worker_repo, &worker_db, &mining, params, &cancel)?;
                cancel.check()?;
                cluster(&coupling, &request)
            })
            .await?;

            let saved = match save {
                Some(name) => {
                    let mut store = SqliteStore::open(&db_path)?;
                    Some(store.save(name, &result, tag)?)
                }
                None => None,
            };

            match cli.format {
                OutputFormat::Json => match saved {
                    Some(id) => print_json(&serde_json::json!({ "snapshotId": id, "result": result }))?,
                    None => print_json(&result)?,
                },
                OutputFormat::Text => {
                    print_cluster_result(&result, &format!("Clustering ({})", result.algorithm));
                    if let Some(id) = saved {
                        println!("\nSaved snapshot {id}");
                    }
                }
            }
        }
        Some(Command::Snapshot { ref action }) => {
            let mut store = SqliteStore::open(&db_path)?;
            match action {
                SnapshotAction::List => {
                    let snapshots = store.list()?;
                    match cli.format {
                        OutputFormat::Json => print_json(&snapshots)?,
                        OutputFormat::Text => {
                            if snapshots.is_empty() {
                                println!("No snapshots saved. Use `gitweave cluster --save <name>`.");
                            }
                            for s in &snapshots {
                                let tags = if s.tags.is_empty() {
                                    String::new()
                                } else {
                                    format!(" [{}]", s.tags.join(", "))
                                };
                                println!(
                                    "  {:>4}  {:<24} {}  {} {}, {} clusters, {} files{}",
                                    s.id,
                                    s.name,
                                    s.created_at.format("%Y-%m-%d %H:%M"),
                                    s.algorithm,
                                    s.weight_column,
                                    s.cluster_count,
                                    s.clustered_files,
                                    tags
                                );
                            }
                        }
                    }
                }
                SnapshotAction::Show { id } => {
                    let snapshot = store.load(*id)?;
                    match cli.format {
                        OutputFormat::Json => print_json(&snapshot)?,
                        OutputFormat::Text => print_cluster_result(
                            &snapshot.result,
                            &format!("Snapshot {} ({})", snapshot.id, snapshot.name),
                        ),
                    }
                }
                SnapshotAction::Edges { id } => {
                    let edges = store.edges(*id)?;
                    match cli.format {
                        OutputFormat::Json => print_json(&edges)?,
                        OutputFormat::Text => {
                            for e in &edges {
                                println!(
                                    "  {} <-> {}  {} edges, total {:.2}, max {:.2}",
                                    e.source, e.target, e.edge_count, e.total_weight, e.max_weight
                                );
                            }
                        }
                    }
                }
                SnapshotAction::Compare { base, head } => {
                    let diff = compare(&store, *base, *head, &config.comparison)?;
                    match cli.format {
                        OutputFormat::Json => print_json(&diff)?,
                        OutputFormat::Text => {
                            let (b, h) = (store.load(*base)?, store.load(*head)?);
                            print_comparison(&diff, &b, &h);
                        }
                    }
                }
                SnapshotAction::Rename { id, name } => {
                    store.rename(*id, name)?;
                    println!("Renamed snapshot {id} to {name}");
                }
                SnapshotAction::Tag { id, tags } => {
                    store.set_tags(*id, tags)?;
                    println!("Tagged snapshot {id}");
                }
                SnapshotAction::Delete { id } => {
                    store.delete(*id)?;
                    println!("Deleted snapshot {id}");
                }
            }
        }
        Some(Command::Init) => {
            let path = cli.path.join(CONFIG_FILE);
            if path.exists() {
                miette::bail!("{} already exists", path.display());
            }
            std::fs::write(&path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {} with default configuration", path.display());
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "gitweave", &mut std::io::stdout());
        }
    }

    Ok(())
}
