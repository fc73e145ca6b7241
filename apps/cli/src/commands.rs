//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use cncflow_core::{CycleOutcome, CycleReport, CycleReporter, PipelineController, Scheduler};
use cncflow_rules::{ProjectSnapshot, RuleSet, ToolCatalog};
use cncflow_shared::{
    AppConfig, Stage, StageOutcome, StageResult, init_config, load_config, load_config_from,
};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// cncflow: run the CNC scan pipeline whenever new source data appears.
#[derive(Parser)]
#[command(
    name = "cncflow",
    version,
    about = "Watch a CNC source tree and drive the scan, analysis and tool scan services.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.cncflow/cncflow.toml).
    #[arg(long, global = true, env = "CNCFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the watched source directory.
    #[arg(long, global = true)]
    pub source: Option<String>,

    /// Override the polling interval, in seconds.
    #[arg(long, global = true)]
    pub interval: Option<u64>,

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
    /// Run cycles on the configured interval until Ctrl-C.
    Watch,

    /// Run a single cycle now.
    Run,

    /// Print the controller status as JSON.
    Status,

    /// List the rules that apply to a project snapshot.
    Rules {
        /// Project snapshot JSON file.
        #[arg(long)]
        project: PathBuf,

        /// Rule set TOML file (defaults to [rules].file, then the built-in rules).
        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
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
        0 => "cncflow=info",
        1 => "cncflow=debug",
        _ => "cncflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&resolve_config(&cli)?),
        },
        Command::Watch => cmd_watch(&resolve_config(&cli)?).await,
        Command::Run => cmd_run(&resolve_config(&cli)?).await,
        Command::Status => cmd_status(&resolve_config(&cli)?).await,
        Command::Rules { project, rules } => {
            cmd_rules(&resolve_config(&cli)?, project, rules.as_deref())
        }
    }
}

/// Load the config file, then apply command-line overrides.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(source) = &cli.source {
        config.watch.source_path = source.clone();
    }
    if let Some(interval) = cli.interval {
        if interval == 0 {
            return Err(eyre!("--interval must be greater than zero"));
        }
        config.watch.interval_secs = interval;
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_watch(config: &AppConfig) -> Result<()> {
    let controller = PipelineController::new(config)?;
    let scheduler = Scheduler::new(Arc::new(controller));

    info!(
        source = %config.watch.source_path,
        interval_secs = config.watch.interval_secs,
        "watching source tree"
    );
    scheduler.start().await;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("failed to listen for Ctrl-C: {e}"))?;

    info!("shutdown requested, waiting for the current cycle");
    scheduler.stop().await;
    scheduler.wait_idle().await;
    Ok(())
}

async fn cmd_run(config: &AppConfig) -> Result<()> {
    let controller = PipelineController::new(config)?.with_reporter(Arc::new(CliProgress::new()));
    let scheduler = Scheduler::new(Arc::new(controller));

    let report = scheduler.trigger_manual().await;
    print_report(&report);

    match report.outcome {
        CycleOutcome::Aborted { stage, error } => {
            Err(eyre!("pipeline ended early at {stage}: {error}"))
        }
        _ => Ok(()),
    }
}

fn print_report(report: &CycleReport) {
    println!();
    match &report.outcome {
        CycleOutcome::NoNewWork => println!("  No new files since the last scan."),
        CycleOutcome::Completed => println!("  Pipeline completed."),
        CycleOutcome::Aborted { stage, .. } => println!("  Pipeline ended early at {stage}."),
    }
    println!("  Cycle:  {}", report.cycle_id);
    for stage in &report.stages {
        let outcome = match stage.outcome {
            StageOutcome::Success => "ok",
            StageOutcome::Skipped => "skipped",
            StageOutcome::Failed => "FAILED",
        };
        println!(
            "  {:<13} {outcome:<8} {:>6.1}s  {}",
            stage.stage.name(),
            stage.duration.as_secs_f64(),
            stage.message.as_deref().unwrap_or("")
        );
    }
    println!("  Time:   {:.1}s", report.duration.as_secs_f64());
    println!();
}

async fn cmd_status(config: &AppConfig) -> Result<()> {
    let controller = PipelineController::new(config)?;
    let status = controller.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn cmd_rules(config: &AppConfig, project: &Path, rules: Option<&Path>) -> Result<()> {
    let rules_path = rules
        .map(Path::to_path_buf)
        .or_else(|| config.rules.file.as_ref().map(PathBuf::from));
    let rule_set = match rules_path {
        Some(path) => RuleSet::load(&path)?,
        None => RuleSet::builtin(),
    };
    let project = ProjectSnapshot::load(project)?.into_project(&ToolCatalog::default());

    let applicable = rule_set.applicable_rules(&project);
    info!(applicable = applicable.len(), total = rule_set.rules().len(), "rules evaluated");

    for rule in applicable {
        println!("{:<24} {}", rule.id, rule.description);
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner showing the stage currently running.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        spinner.set_message("Checking for new files");
        Self { spinner }
    }
}

impl CycleReporter for CliProgress {
    fn stage_started(&self, stage: Stage) {
        self.spinner.set_message(format!("Running {stage}"));
    }

    fn stage_finished(&self, result: &StageResult) {
        if result.outcome == StageOutcome::Skipped {
            self.spinner.println(format!("  {} disabled, skipped", result.stage));
        }
    }

    fn cycle_finished(&self, _report: &CycleReport) {
        self.spinner.finish_and_clear();
    }
}
