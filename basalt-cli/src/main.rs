use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use log::warn;

use basalt_core::config::{DEFAULT_CONFIG_FILE, SnapshotConfig};
use basalt_core::result::EXIT_FAILED;
use basalt_core::{
    AuditLog, BackendSpec, BootstrapConfig, BootstrapResult, Bootstrapper, CloudApi, ProviderKind,
    LocalBackend, StoreId,
};
use basalt_provider_aws::{AwsProvider, AwsSettings};

#[derive(Parser)]
#[command(name = "basalt")]
#[command(about = "Bootstrap the remote state backend of an infrastructure engine", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the backend (or confirm it exists) and migrate local state
    Bootstrap {
        #[command(flatten)]
        overrides: Overrides,

        /// Write `-backend-config` lines for the engine to this file
        #[arg(long)]
        backend_config: Option<PathBuf>,
    },
    /// Show the observed state of the backend without changing anything
    Probe {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Validate the configuration without contacting the cloud
    Validate {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Remove a lock object left behind by a crashed run
    ForceUnlock {
        /// ID of the lock to remove
        lock_id: String,

        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Command-line values that take precedence over the config file
#[derive(Args, Debug, Default, Clone)]
struct Overrides {
    /// Store (bucket) name
    #[arg(long)]
    name: Option<String>,

    /// Region (e.g., ap-northeast-1)
    #[arg(long)]
    region: Option<String>,

    /// Object key for the migrated state
    #[arg(long)]
    state_key: Option<String>,

    /// Local state file to migrate
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Cloud provider (aws or local)
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// Root directory for the local provider
    #[arg(long)]
    local_root: Option<PathBuf>,

    /// AWS profile name
    #[arg(long)]
    profile: Option<String>,

    /// Custom API endpoint
    #[arg(long)]
    endpoint_url: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Commands::Bootstrap {
            overrides,
            backend_config,
        } => run_bootstrap(&cli, overrides, backend_config.as_deref()).await,
        Commands::Probe { overrides } => run_probe(&cli, overrides).await,
        Commands::Validate { overrides } => run_validate(&cli, overrides),
        Commands::ForceUnlock { lock_id, overrides } => {
            run_force_unlock(&cli, overrides, lock_id).await
        }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(EXIT_FAILED);
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// Load the config file (if present) and apply command-line overrides
fn load_config(path: &Path, overrides: &Overrides) -> Result<BootstrapConfig, String> {
    let mut config = if path.exists() {
        BootstrapConfig::read(path).map_err(|e| e.to_string())?
    } else {
        match (&overrides.name, &overrides.region) {
            (Some(name), Some(region)) => BootstrapConfig::new(BackendSpec::new(name, region)),
            _ => {
                return Err(format!(
                    "{} not found; pass --name and --region or create it",
                    path.display()
                ));
            }
        }
    };

    apply_overrides(&mut config, overrides);
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn apply_overrides(config: &mut BootstrapConfig, overrides: &Overrides) {
    if let Some(name) = &overrides.name {
        config.backend.name = name.clone();
    }
    if let Some(region) = &overrides.region {
        config.backend.region = region.clone();
    }
    if let Some(state_key) = &overrides.state_key {
        config.backend.state_key = state_key.clone();
    }
    if let Some(path) = &overrides.snapshot {
        config.snapshot = Some(SnapshotConfig { path: path.clone() });
    }
    if let Some(kind) = overrides.provider {
        config.provider.kind = kind;
    }
    if let Some(root) = &overrides.local_root {
        config.provider.local_root = Some(root.clone());
    }
    if let Some(profile) = &overrides.profile {
        config.provider.profile = Some(profile.clone());
    }
    if let Some(endpoint) = &overrides.endpoint_url {
        config.provider.endpoint_url = Some(endpoint.clone());
    }
}

/// Select the cloud implementation named by the config
async fn get_cloud(config: &BootstrapConfig) -> Box<dyn CloudApi> {
    match config.provider.kind {
        ProviderKind::Aws => {
            let mut settings = AwsSettings::new(&config.backend.region);
            settings.profile = config.provider.profile.clone();
            settings.endpoint_url = config.provider.endpoint_url.clone();
            log::info!("using AWS provider (region: {})", settings.region);
            Box::new(AwsProvider::new(&settings).await)
        }
        ProviderKind::Local => {
            // validate() guarantees local_root for the local provider
            let root = config.provider.local_root.clone().unwrap_or_default();
            log::info!("using local provider (root: {})", root.display());
            Box::new(LocalBackend::new(root))
        }
    }
}

async fn run_bootstrap(
    cli: &Cli,
    overrides: &Overrides,
    backend_config: Option<&Path>,
) -> Result<i32, String> {
    let config = load_config(&cli.config, overrides)?;
    let cloud = get_cloud(&config).await;

    let mut bootstrapper =
        Bootstrapper::new(cloud.as_ref(), &config.backend).with_retry_policy(config.retry.policy());
    if let Some(snapshot) = &config.snapshot {
        bootstrapper = bootstrapper.with_snapshot(&snapshot.path);
    }
    let result = bootstrapper.run().await;

    if let Err(e) = AuditLog::new(&config.audit.path).append(&result) {
        warn!(
            "failed to append to audit log {}: {}",
            config.audit.path.display(),
            e
        );
    }

    if let (Some(path), Some(outputs)) = (backend_config, &result.outputs) {
        fs::write(path, outputs.backend_config())
            .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
    }

    match cli.output {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => print_result(&result),
    }
    Ok(result.exit_code())
}

fn print_json(value: &impl serde::Serialize) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize output: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn print_result(result: &BootstrapResult) {
    match (&result.outputs, &result.failure) {
        (Some(outputs), _) => {
            let headline = match result.status {
                basalt_core::BootstrapStatus::AlreadySatisfied => {
                    format!("Backend {} already satisfies the configuration.", result.store)
                }
                _ => format!("Backend {} provisioned.", result.store),
            };
            println!("{}", headline.green().bold());
            for created in &result.created {
                println!("  {} {}", "+".green(), created);
            }
            for step in &result.steps {
                println!("  {} {}", "~".yellow(), step);
            }
            println!();
            println!("{}", "Backend configuration:".cyan().bold());
            print!("{}", outputs.backend_config());
        }
        (None, Some(failure)) => {
            eprintln!("{} {}", "Error:".red().bold(), failure.cause);
            let mut location = format!("  phase: {}", failure.phase);
            if let Some(step) = failure.step {
                location.push_str(&format!(", step: {}", step));
            }
            eprintln!("{}", location);
            if !result.created.is_empty() {
                eprintln!("{}", "  Created by this run:".yellow());
                for created in &result.created {
                    eprintln!("    {}", created);
                }
            }
            if result.exit_code() != EXIT_FAILED {
                eprintln!(
                    "{}",
                    "  The backend may be partially configured; inspect it before re-running."
                        .yellow()
                );
            }
        }
        (None, None) => {}
    }
}

async fn run_probe(cli: &Cli, overrides: &Overrides) -> Result<i32, String> {
    let config = load_config(&cli.config, overrides)?;
    let cloud = get_cloud(&config).await;
    let policy = config.retry.policy();

    let state = basalt_core::BackendProbe::new(cloud.as_ref(), &policy)
        .probe(&config.backend)
        .await
        .map_err(|e| e.to_string())?;
    let drift = state.drift(&config.backend);

    if cli.output == OutputFormat::Json {
        print_json(&serde_json::json!({ "state": state, "drift": drift }))?;
        return Ok(0);
    }

    println!("{}", format!("Backend {}:", config.backend.name).cyan().bold());
    let flags = [
        ("exists", state.exists),
        ("managed", state.managed),
        ("versioning", state.versioning_enabled),
        ("encryption", state.encryption_enabled),
        ("public access blocked", state.public_access_blocked),
        ("lock capable", state.lock_capable),
        ("state object", state.state_object_present),
    ];
    for (label, value) in flags {
        let mark = if value { "yes".green() } else { "no".red() };
        println!("  {:<22} {}", label, mark);
    }
    if let Some(arn) = &state.trust_role_arn {
        println!("  {:<22} {}", "trust role", arn);
    }

    if drift.is_empty() {
        println!("{}", "No drift.".green());
    } else {
        println!("{}", "Drift:".yellow().bold());
        for d in &drift {
            println!("  {} {}", "~".yellow(), d);
        }
    }
    Ok(0)
}

fn run_validate(cli: &Cli, overrides: &Overrides) -> Result<i32, String> {
    let config = load_config(&cli.config, overrides)?;
    if let Some(snapshot) = &config.snapshot
        && !snapshot.path.is_file()
    {
        return Err(format!(
            "Snapshot {} does not exist",
            snapshot.path.display()
        ));
    }
    println!("{}", "Configuration is valid.".green());
    Ok(0)
}

async fn run_force_unlock(cli: &Cli, overrides: &Overrides, lock_id: &str) -> Result<i32, String> {
    let config = load_config(&cli.config, overrides)?;
    let cloud = get_cloud(&config).await;
    let policy = config.retry.policy();
    let store = StoreId::new(&config.backend.name);
    let lock_key = config.backend.lock_key();

    policy
        .call("force_unlock", || cloud.force_unlock(&store, &lock_key, lock_id))
        .await
        .map_err(|e| format!("Failed to force unlock: {}", e))?;

    println!(
        "{}",
        format!("Lock {} removed from {}/{}.", lock_id, store, lock_key).green()
    );
    Ok(0)
}
