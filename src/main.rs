use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use limbo_bridge::artifact::{DirectoryBundle, EmbeddedNatives, ExitCleanupGuard, ResourceBundle};
use limbo_bridge::config::LauncherSettings;
use limbo_bridge::lifecycle::CONFIG_FILE_NAME;
use limbo_bridge::{platform, BridgeError, ExitStatus, InvocationArgs, BRIDGE_FAILURE_EXIT_CODE};

/// limbo-bridge - run the bundled limbo server for this platform
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the server configuration file (server.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory holding server.toml
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Launcher settings file (YAML)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Load native artifacts from this directory instead of the embedded bundle
    #[arg(long)]
    natives_dir: Option<PathBuf>,

    /// Print the resolved platform and available artifacts, then exit
    #[arg(long)]
    list_artifacts: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Arguments forwarded to the server after `--`
    #[arg(last = true)]
    native_args: Vec<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.debug) {
        eprintln!("limbo-bridge: {e:#}");
        return ExitCode::from(BRIDGE_FAILURE_EXIT_CODE);
    }

    // Dropped last, after the native call has returned
    let _cleanup = ExitCleanupGuard;

    match run(args) {
        Ok(status) => status.into(),
        Err(e) => {
            error!("{:#}", e);
            let code = e
                .downcast_ref::<BridgeError>()
                .map_or(BRIDGE_FAILURE_EXIT_CODE, BridgeError::exit_code);
            ExitCode::from(code)
        }
    }
}

fn init_logging(debug: bool) -> Result<()> {
    // Logs go to stderr; stdout belongs to the server
    let log_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global default subscriber")
}

fn run(args: Args) -> Result<ExitStatus> {
    let mut settings = match &args.settings {
        Some(path) => LauncherSettings::load_from_file(path)?,
        None => LauncherSettings::load_default()?,
    };

    // Command line wins over the settings file
    if let Some(dir) = args.data_dir {
        settings.data_dir = dir;
    }
    if let Some(dir) = args.natives_dir {
        settings.natives_dir = Some(dir);
    }
    settings.extra_args.extend(args.native_args);

    let bundle: Arc<dyn ResourceBundle> = match &settings.natives_dir {
        Some(dir) => Arc::new(DirectoryBundle::new(dir)),
        None => Arc::new(EmbeddedNatives),
    };

    if args.list_artifacts {
        list_artifacts(bundle.as_ref());
        return Ok(ExitStatus::SUCCESS);
    }

    let config_path = match args.config {
        Some(path) => std::path::absolute(&path)
            .with_context(|| format!("Failed to resolve {}", path.display()))?,
        None => settings.config_path()?,
    };
    if let Some(dir) = config_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
    }
    if !config_path.exists() {
        info!(
            "{} not found at {}; the server will create its defaults",
            CONFIG_FILE_NAME,
            config_path.display()
        );
    }

    let invocation = InvocationArgs::with_program_name(&settings.program_name, &config_path)
        .extra(settings.extra_args);

    let status = limbo_bridge::launch(bundle.as_ref(), &invocation)?;
    Ok(status)
}

fn list_artifacts(bundle: &dyn ResourceBundle) {
    match platform::resolve() {
        Ok(descriptor) => {
            let available = bundle.resource_paths().contains(&descriptor.resource_subpath);
            println!(
                "platform: {} -> {} ({})",
                descriptor,
                descriptor.resource_subpath,
                if available { "bundled" } else { "missing" }
            );
        }
        Err(e) => println!("platform: {e}"),
    }

    for path in bundle.resource_paths() {
        println!("  {path}");
    }
}
