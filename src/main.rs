//! fnrelease CLI entrypoint.
//!
//! This is the main entrypoint for the fnrelease command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use fnrelease::backend::Backend;
use fnrelease::cli::{BackendArgs, Cli, Commands, OutputFormatter, StdinConfirm};
use fnrelease::cloud::{list_backend, ArtifactCleaner, ControlPlane, RestClient};
use fnrelease::config::{
    find_config_file, ConfigParser, ConfigValidator, EndpointHasher, ReleaseConfig,
};
use fnrelease::error::{ReleaseError, Result};
use fnrelease::fabricator::Fabricator;
use fnrelease::planner::{create_deployment_plan, PlanOptions};
use fnrelease::release::{ReleaseDriver, ReleaseOptions};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Exit code of a release in which some functions failed.
const DEPLOY_FAILURE_EXIT: u8 = 2;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ ReleaseError::Deploy(_)) => {
            eprintln!("Error: {e}");
            ExitCode::from(DEPLOY_FAILURE_EXIT)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Validate { want, warnings } => {
            cmd_validate(cli.config.as_ref(), want.as_deref(), warnings, &formatter)
        }
        Commands::Plan { backends } => cmd_plan(cli.config.as_ref(), &backends, &formatter).await,
        Commands::Apply {
            backends,
            force,
            non_interactive,
        } => {
            let options = ReleaseOptions { force, non_interactive };
            cmd_apply(cli.config.as_ref(), &backends, options, &formatter).await
        }
    }
}

/// Validate configuration and, optionally, the release manifest.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    want: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let validator = ConfigValidator::new();

    let mut results = vec![validator.validate(&config)?];
    if let Some(path) = want {
        let backend = load_manifest(path)?;
        info!("Manifest declares {} function(s)", backend.len());
        results.push(validator.validate_backend(&backend)?);
    }

    println!("{}", formatter.format_validation(&config, &results, show_warnings));
    Ok(())
}

/// Show the deployment plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    backends: &BackendArgs,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let want = load_want(&backends.want, &config)?;
    let have = load_have(backends.have.as_deref(), &config).await?;

    let plan = create_deployment_plan(&want, &have, &plan_options(&config, &backends.only))?;
    println!("{}", formatter.format_plan(&plan));
    Ok(())
}

/// Apply the deployment plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    backends: &BackendArgs,
    options: ReleaseOptions,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let want = load_want(&backends.want, &config)?;

    let token = ConfigParser::access_token()?;
    let client = RestClient::new(&token, &config)?;
    let have = match backends.have.as_deref() {
        Some(path) => load_manifest(path)?,
        None => list_backend(&client, &client, &config.project).await?,
    };

    let fabricator = Arc::new(Fabricator::new(ControlPlane::from_rest(&client), &config));
    let cleaner: Arc<dyn ArtifactCleaner> = Arc::new(client);
    let driver =
        ReleaseDriver::new(fabricator, cleaner, Box::new(StdinConfirm)).with_options(options);

    let outcome = driver
        .release(&want, &have, &plan_options(&config, &backends.only))
        .await?;
    println!("{}", formatter.format_outcome(&outcome));
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads and validates the configuration, with `.env` and environment overrides.
fn load_config(config_path: Option<&PathBuf>) -> Result<ReleaseConfig> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let base_path = config_file.parent().unwrap_or_else(|| Path::new("."));
    let parser = ConfigParser::new().with_base_path(base_path);
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

/// Reads a backend manifest.
fn load_manifest(path: &Path) -> Result<Backend> {
    let content = std::fs::read_to_string(path)?;
    Ok(Backend::from_manifest(&content)?)
}

/// Reads the release manifest and stamps every endpoint with its hash.
fn load_want(path: &Path, config: &ReleaseConfig) -> Result<Backend> {
    let mut want = load_manifest(path)?;
    ConfigValidator::new().validate_backend(&want)?;
    EndpointHasher::new().apply_hashes(&mut want, config.sources.digest.as_deref());
    Ok(want)
}

/// Reads the deployed backend from a manifest, or lists it from the project.
async fn load_have(path: Option<&Path>, config: &ReleaseConfig) -> Result<Backend> {
    if let Some(path) = path {
        return load_manifest(path);
    }
    let token = ConfigParser::access_token()?;
    let client = RestClient::new(&token, config)?;
    list_backend(&client, &client, &config.project).await
}

/// Builds planner options. Command-line filters replace configured ones.
/// Unchanged endpoints are skipped only when a source digest is configured.
fn plan_options(config: &ReleaseConfig, only: &[String]) -> PlanOptions {
    let filters = if only.is_empty() { config.planner.only.as_slice() } else { only };
    PlanOptions {
        delete_all: config.planner.delete_all,
        allow_platform_upgrade: config.planner.allow_platform_upgrade,
        skip_unchanged: config.sources.digest.is_some(),
        ..PlanOptions::default()
    }
    .with_filters(filters)
}
