//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use a11yscan_core::{JobQueue, ScanPipeline, enrichment};
use a11yscan_shared::{
    A11yScanError, AppConfig, JobId, JobState, JobStatusView, ScanJob, ScanRequest, ScanResult,
    ScanType, Standard, WcagLevel, init_config, load_config, load_config_from,
};
use a11yscan_storage::{RuleCount, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// a11yscan: crawl a site and audit every page for WCAG violations.
#[derive(Parser)]
#[command(
    name = "a11yscan",
    version,
    about = "Crawl websites and audit their pages for WCAG accessibility violations.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.a11yscan/a11yscan.toml).
    #[arg(long, env = "A11YSCAN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Scan one or more sites.
    Scan(ScanArgs),

    /// List persisted scans, most recent first.
    History {
        /// Maximum number of scans to list.
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Print a persisted scan result.
    Show {
        /// Job ID, as printed by `scan` or `history`.
        job_id: String,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
pub(crate) struct ScanArgs {
    /// Site URLs to scan; one job per URL.
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Scan profile: quick, full, or deep.
    #[arg(long = "type")]
    pub scan_type: Option<ScanType>,

    /// Target conformance level: a, aa, or aaa.
    #[arg(long)]
    pub level: Option<WcagLevel>,

    /// Override the profile's link depth.
    #[arg(long)]
    pub max_depth: Option<u32>,

    /// Override the profile's page cap.
    #[arg(long)]
    pub max_pages: Option<usize>,

    /// Standard to evaluate (repeatable): wcag20, wcag21, wcag22, section508, best-practice.
    #[arg(long = "standard")]
    pub standards: Vec<Standard>,

    /// Print results as JSON.
    #[arg(long)]
    pub json: bool,

    /// Do not persist results to the scan database.
    #[arg(long)]
    pub no_store: bool,

    /// Skip the AI executive summary.
    #[arg(long)]
    pub no_enrich: bool,

    /// Allow scanning loopback and private-network hosts.
    #[arg(long)]
    pub allow_private_hosts: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "a11yscan=info",
        1 => "a11yscan=debug",
        _ => "a11yscan=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    match cli.command {
        Command::Scan(args) => cmd_scan(resolve_config(config_path)?, args).await,
        Command::History { limit } => cmd_history(resolve_config(config_path)?, limit).await,
        Command::Show { job_id, json } => {
            cmd_show(resolve_config(config_path)?, &job_id, json).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(resolve_config(config_path)?).await,
        },
    }
}

fn resolve_config(path: Option<PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(&path)?,
        None => load_config()?,
    };
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// scan
// ---------------------------------------------------------------------------

async fn cmd_scan(mut config: AppConfig, args: ScanArgs) -> Result<()> {
    if args.allow_private_hosts {
        config.crawl.allow_private_hosts = true;
    }

    let enricher = if args.no_enrich {
        None
    } else {
        enrichment::from_config(&config.enrichment)
    };
    let mut pipeline = ScanPipeline::from_config(&config, enricher)?;
    if !args.no_store {
        let db_path = config.database_path()?;
        let storage = Storage::open(&db_path).await?;
        info!(path = %db_path.display(), "persisting results");
        pipeline = pipeline.with_storage(Arc::new(storage));
    }

    let queue = JobQueue::new(&config);
    let handle = queue.start(Arc::new(pipeline))?;

    let standards: BTreeSet<Standard> = args.standards.iter().copied().collect();
    let mut ids = Vec::with_capacity(args.urls.len());
    for url in &args.urls {
        let request = ScanRequest {
            wcag_level: args.level.unwrap_or(config.defaults.wcag_level),
            scan_type: args.scan_type.unwrap_or(config.defaults.scan_type),
            max_depth: args.max_depth,
            max_pages: args.max_pages,
            standards: (!standards.is_empty()).then(|| standards.clone()),
            ..ScanRequest::new(url.as_str())
        };
        let id = queue
            .submit(request)
            .map_err(|e| eyre!("cannot scan '{url}': {e}"))?;
        info!(job_id = %id, url = %url, "scan queued");
        ids.push(id);
    }

    let spinner = spinner(args.json);
    let jobs = track(&queue, &ids, &spinner).await;
    spinner.finish_and_clear();
    handle.shutdown().await;
    let jobs = jobs?;

    if args.json {
        let views: Vec<JobStatusView> = jobs.iter().map(JobStatusView::from).collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
    } else {
        for job in &jobs {
            print_job(job);
        }
    }

    let failed = jobs.iter().filter(|j| j.state == JobState::Failed).count();
    if failed > 0 {
        return Err(eyre!("{failed} of {} scans failed", jobs.len()));
    }
    Ok(())
}

fn spinner(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(
            style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"]),
        );
    }
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Poll job status until every job is terminal. Ctrl-C cancels them all.
async fn track(queue: &JobQueue, ids: &[JobId], spinner: &ProgressBar) -> Result<Vec<ScanJob>> {
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelling = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c, if !cancelling => {
                cancelling = true;
                spinner.println("Cancelling scans...");
                for id in ids {
                    queue.cancel(id)?;
                }
            }
        }

        let jobs = ids
            .iter()
            .map(|id| queue.get_job(id))
            .collect::<std::result::Result<Vec<_>, A11yScanError>>()?;
        let done = jobs.iter().filter(|j| j.state.is_terminal()).count();
        if done == jobs.len() {
            return Ok(jobs);
        }

        if let Some(job) = jobs.iter().find(|j| !j.state.is_terminal()) {
            spinner.set_message(format!(
                "[{done}/{}] {} {} ({}%, attempt {})",
                jobs.len(),
                job.state,
                job.target_url,
                job.progress,
                job.attempts.max(1),
            ));
        }
    }
}

fn print_job(job: &ScanJob) {
    println!();
    match (&job.state, &job.result) {
        (JobState::Completed, Some(result)) => {
            print_result(result, &top_rules(result, 5));
        }
        _ => {
            println!("  Scan failed: {}", job.target_url);
            println!("  Job:      {}", job.id);
            println!("  Attempts: {}", job.attempts);
            if let Some(reason) = &job.failed_reason {
                println!("  Reason:   {reason}");
            }
        }
    }
    println!();
}

fn print_result(result: &ScanResult, rules: &[RuleCount]) {
    let s = &result.severity;
    println!("  {}", result.base_url);
    println!("  Job:        {}", result.job_id);
    println!("  Status:     {}", result.status.as_str());
    println!("  Pages:      {}", result.pages.len());
    println!(
        "  Violations: {} (critical {}, serious {}, moderate {}, minor {})",
        result.total_violations, s.critical, s.serious, s.moderate, s.minor
    );
    println!("  Score:      {}/100", result.compliance_score);
    println!("  Level:      {}", result.wcag_level_achieved);
    if let Some(error) = &result.error {
        println!("  Error:      {error}");
    }
    if !rules.is_empty() {
        println!("  Top rules:");
        for rule in rules {
            println!(
                "    {:<24} {:<9} {}",
                rule.rule_id,
                rule.impact.as_str(),
                rule.occurrences
            );
        }
    }
    println!();
    println!("  {}", result.executive_summary);
}

/// Most frequent rules in `result`, by occurrences then severity.
fn top_rules(result: &ScanResult, limit: usize) -> Vec<RuleCount> {
    let mut rules: Vec<RuleCount> = Vec::new();
    for violation in result.pages.iter().flat_map(|p| &p.violations) {
        match rules.iter_mut().find(|r| r.rule_id == violation.rule_id) {
            Some(rule) => rule.occurrences += 1,
            None => rules.push(RuleCount {
                rule_id: violation.rule_id.clone(),
                impact: violation.impact,
                occurrences: 1,
            }),
        }
    }
    rules.sort_by(|a, b| {
        b.occurrences
            .cmp(&a.occurrences)
            .then(a.impact.cmp(&b.impact))
            .then(a.rule_id.cmp(&b.rule_id))
    });
    rules.truncate(limit);
    rules
}

// ---------------------------------------------------------------------------
// history / show
// ---------------------------------------------------------------------------

async fn open_history(config: &AppConfig) -> Result<Option<Storage>> {
    let path = config.database_path()?;
    match Storage::open_readonly(&path).await {
        Ok(storage) => Ok(Some(storage)),
        Err(A11yScanError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn cmd_history(config: AppConfig, limit: usize) -> Result<()> {
    let Some(storage) = open_history(&config).await? else {
        println!("No scans recorded yet.");
        return Ok(());
    };

    let scans = storage.list_scans(limit).await?;
    if scans.is_empty() {
        println!("No scans recorded yet.");
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:>5} {:>6} {:>5} {:<4} URL",
        "JOB", "COMPLETED", "PAGES", "ISSUES", "SCORE", "LVL"
    );
    for scan in scans {
        println!(
            "{:<38} {:<20} {:>5} {:>6} {:>5} {:<4} {}",
            scan.job_id.as_str(),
            scan.completed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            scan.pages,
            scan.total_violations,
            scan.compliance_score,
            scan.wcag_level_achieved.as_str(),
            scan.base_url,
        );
    }
    Ok(())
}

async fn cmd_show(config: AppConfig, job_id: &str, json: bool) -> Result<()> {
    let job_id: JobId = job_id.parse().map_err(|e: String| eyre!(e))?;
    let storage = open_history(&config)
        .await?
        .ok_or_else(|| eyre!("no scans recorded yet"))?;
    let result = storage
        .get_scan_result(&job_id)
        .await?
        .ok_or_else(|| eyre!("no scan found with id '{job_id}'"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let rules = storage.top_rules(&job_id, 10).await?;
    println!();
    print_result(&result, &rules);
    println!();
    println!("  Pages:");
    for page in &result.pages {
        println!(
            "    {:>3} {}{}",
            page.violations.len(),
            page.url,
            page.title
                .as_deref()
                .map(|t| format!(" ({t})"))
                .unwrap_or_default()
        );
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
