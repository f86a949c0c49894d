//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use playbook_cache::CacheStore;
use playbook_core::{ContentLoader, LoadProgress, LoadResult};
use playbook_shared::{
    AppConfig, LoadConfig, LoggingConfig, PlaybookError, default_mappings, format_timestamp,
    init_config, load_config, load_config_from,
};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Playbook docs: keep a verified local copy of the AI Playbook.
#[derive(Parser)]
#[command(
    name = "playbook",
    version,
    about = "Refresh, cache, and serve the AI Playbook as Markdown documents.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.playbook/playbook.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the cached artifacts.
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Manifest file location.
    #[arg(long, global = true)]
    pub manifest: Option<PathBuf>,

    /// Content API URL.
    #[arg(long, global = true, env = "PLAYBOOK_SOURCE_URL")]
    pub url: Option<String>,

    /// Per-attempt fetch timeout in seconds.
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Log format: text or json. Overrides the config file.
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

impl From<LogFormat> for playbook_shared::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Text => Self::Text,
            LogFormat::Json => Self::Json,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Load documents: refresh from the source, falling back to the cache.
    Load {
        /// Serve the cache only; never contact the source.
        #[arg(long)]
        local: bool,

        /// With --local, skip cache integrity validation.
        #[arg(long)]
        no_validate: bool,
    },

    /// Regenerate the cache from the source (no fallback).
    Refresh {
        /// Exit non-zero when the refresh fails.
        #[arg(long)]
        fail_on_error: bool,
    },

    /// Check cache integrity against the manifest.
    Validate,

    /// List cached artifacts.
    List,

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
// Config resolution
// ---------------------------------------------------------------------------

/// Load the config file and apply command-line overrides.
pub(crate) fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    if let Some(dir) = &cli.cache_dir {
        config.cache.dir = dir.to_string_lossy().into_owned();
    }
    if let Some(path) = &cli.manifest {
        config.cache.manifest_path = path.to_string_lossy().into_owned();
    }
    if let Some(url) = &cli.url {
        config.source.url = url.clone();
    }
    if let Some(secs) = cli.timeout_secs {
        if secs == 0 {
            return Err(eyre!("--timeout-secs must be at least 1"));
        }
        config.source.timeout_secs = secs;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format.into();
    }

    Ok(config)
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Install the process-wide subscriber from the logging config.
///
/// Logs go to stderr so command output on stdout stays clean.
pub(crate) fn init_tracing(logging: &LoggingConfig, verbose: u8) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match verbose {
        0 => logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("playbook={level}")));

    match logging.format {
        playbook_shared::LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        playbook_shared::LogFormat::Json => {
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
pub(crate) async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    match cli.command {
        Command::Load { local, no_validate } => cmd_load(&config, local, no_validate).await,
        Command::Refresh { fail_on_error } => cmd_refresh(&config, fail_on_error).await,
        Command::Validate => cmd_validate(&config),
        Command::List => cmd_list(&config),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_load(config: &AppConfig, local: bool, no_validate: bool) -> Result<()> {
    let mut settings = LoadConfig::from(config);
    settings.use_cache_only = local;
    settings.validate_cache = config.cache.validate && !no_validate;

    info!(
        url = %settings.source_url,
        cache_dir = %settings.cache_dir.display(),
        local,
        "loading documents"
    );

    let loader = ContentLoader::from_config(&settings)?;
    let reporter = CliProgress::new();
    let result = loader.load(&reporter).await;
    reporter.finish();
    let result = result?;

    print_result(&result);
    Ok(())
}

async fn cmd_refresh(config: &AppConfig, fail_on_error: bool) -> Result<()> {
    let loader = ContentLoader::from_config(&LoadConfig::from(config))?;
    let reporter = CliProgress::new();

    match loader.refresh(&reporter).await {
        Ok((result, metrics)) => {
            reporter.finish();
            print_result(&result);
            println!("  Time:     {:.1}s", metrics.total.as_secs_f64());
            println!();
            Ok(())
        }
        Err(e) if fail_on_error => {
            reporter.finish();
            Err(e.into())
        }
        Err(e) => {
            reporter.finish();
            eprintln!("warning: {}: {e}", refresh_failure_note(&e));
            Ok(())
        }
    }
}

/// A write-phase failure may already have replaced some artifacts.
fn refresh_failure_note(error: &PlaybookError) -> &'static str {
    match error {
        PlaybookError::CacheWrite { .. } => {
            "refresh failed while writing the cache, run `playbook validate` before serving it"
        }
        _ => "refresh failed, existing cache left untouched",
    }
}

fn cmd_validate(config: &AppConfig) -> Result<()> {
    let store = store_for(config)?;
    let result = store.validate();

    if let Some(manifest) = &result.manifest {
        println!("  Fetched:  {}", format_timestamp(&manifest.fetched_at));
        println!("  Sections: {}", manifest.sections.len());
    }

    if result.valid {
        println!("  Cache is valid.");
        return Ok(());
    }

    for error in &result.errors {
        println!("  - {error}");
    }
    Err(eyre!(
        "cache at {} is invalid ({} problems)",
        store.cache_dir().display(),
        result.errors.len()
    ))
}

fn cmd_list(config: &AppConfig) -> Result<()> {
    let store = store_for(config)?;
    let names = store.list_artifacts()?;

    if names.is_empty() {
        println!("No cached artifacts in {}", store.cache_dir().display());
        return Ok(());
    }
    for name in names {
        println!("{name}");
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

fn store_for(config: &AppConfig) -> Result<CacheStore> {
    let mappings = default_mappings()?;
    Ok(CacheStore::new(
        &config.cache.dir,
        &config.cache.manifest_path,
        &mappings,
    ))
}

fn print_result(result: &LoadResult) {
    println!();
    println!("  Source:   {}", result.source);
    if let Some(fetched_at) = result.fetched_at {
        println!("  Fetched:  {}", format_timestamp(&fetched_at));
    }
    println!("  Documents:");
    for doc in &result.documents {
        println!("    {:<34} {:>8} bytes", doc.name, doc.size);
    }
    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .map(|s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]))
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl LoadProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn section_converted(&self, filename: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Converting [{current}/{total}] {filename}"));
    }

    fn done(&self, _result: &LoadResult) {
        self.finish();
    }
}
