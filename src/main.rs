use clap::{Parser, Subcommand};
use droid_runner::avd::AvdManager;
use droid_runner::config::{Config, ConfigLoader};
use droid_runner::core::Context;
use droid_runner::package::ApkSigner;
use droid_runner::runner::{CommandRunner, SystemRunner};
use droid_runner::target::TargetSelector;
use droid_runner::util::ToolPaths;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "droid-runner")]
#[command(about = "Provision Android emulators and instrumentation agents for test runs")]
struct Cli {
    /// Standalone configuration file, layered over Cargo.toml metadata
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace root. Skips Cargo.toml metadata when set.
    #[arg(long, global = true)]
    workspace_root: Option<PathBuf>,

    /// Configuration profile, overriding DROID_RUNNER_PROFILE
    #[arg(short, long, global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved configuration, tools and active env overrides
    Check,
    /// List installable targets and the one that would be selected
    Targets,
    /// Start a container, optionally hold it, then tear it down
    Boot {
        /// Seconds to keep the device up before teardown
        #[arg(long, default_value_t = 0)]
        hold: u64,
    },
    /// Strip signatures from an APK and sign it with the configured keystore
    Resign {
        apk: PathBuf,
        /// Directory for the signed copy
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, workspace_root) = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("droid-runner: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config);

    let outcome = match cli.command {
        Commands::Check => check(config, workspace_root),
        Commands::Targets => targets(config, workspace_root),
        Commands::Boot { hold } => boot(config, workspace_root, Duration::from_secs(hold)),
        Commands::Resign { apk, output_dir } => resign(config, workspace_root, apk, output_dir),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> droid_runner::Result<(Config, PathBuf)> {
    let mut loader = ConfigLoader::new();
    if let Some(root) = &cli.workspace_root {
        loader = loader.no_cargo_metadata().workspace_root(root);
    }
    if let Some(path) = &cli.config {
        loader = loader.config_file(path);
    }
    if let Some(profile) = &cli.profile {
        loader = loader.profile(profile);
    }
    loader.load()
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if config.verbose { "debug" } else { config.log.level.as_str() };
        EnvFilter::new(level)
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn check(config: Config, workspace_root: PathBuf) -> droid_runner::Result<()> {
    config.validate()?;
    let tools = ToolPaths::discover(&config.sdk);

    println!("workspace: {}", workspace_root.display());
    match &tools.sdk_root {
        Some(root) => println!("sdk root:  {}", root.display()),
        None => println!("sdk root:  (not set, tools resolved from PATH)"),
    }
    println!();
    for (name, path) in tools.entries() {
        let status = if ToolPaths::is_available(path) { "ok" } else { "missing" };
        println!("{name:<10} {status:<8} {}", path.display());
    }

    let overrides = droid_runner::config::env::detect_active_overrides();
    if !overrides.is_empty() {
        println!();
        for (key, value) in overrides {
            println!("{key}={value}");
        }
    }

    println!();
    let rendered = toml::to_string_pretty(&config)
        .map_err(|e| droid_runner::Error::config(format!("failed to render configuration: {e}")))?;
    print!("{rendered}");
    Ok(())
}

fn targets(config: Config, workspace_root: PathBuf) -> droid_runner::Result<()> {
    let ctx = Context::new(config, workspace_root)?;
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
    let avds = AvdManager::new(
        runner,
        &ctx.tools.android,
        &ctx.tools.mksdcard,
        ctx.config.commands.clone(),
    )
    .with_vars(ctx.template_vars.clone());
    let catalog = avds.list_targets()?;

    for target in catalog.targets() {
        let api = target.api_level.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string());
        let pairs: Vec<String> = target.tag_abis.iter().map(ToString::to_string).collect();
        println!(
            "{:>3}  {:<40} api {:<4} {:?}  {}",
            target.id,
            target.id_label,
            api,
            target.kind,
            pairs.join(", ")
        );
    }

    let emulator = &ctx.config.emulator;
    let selection = TargetSelector::new()
        .with_target(emulator.target.clone())
        .with_tag_abi(emulator.tag_abi.clone())
        .with_abi(emulator.abi.clone())
        .select(&catalog)?;
    match selection.tag_abi {
        Some(pair) => println!("\nselected: {} ({pair})", selection.target.id_label),
        None => println!(
            "\nselected: {} (no tag/ABI, physical device only)",
            selection.target.id_label
        ),
    }
    Ok(())
}

fn boot(config: Config, workspace_root: PathBuf, hold: Duration) -> droid_runner::Result<()> {
    let mut session = droid_runner::builder()
        .with_config(config)
        .workspace_root(workspace_root)
        .build()?;
    session.events().on(|event| tracing::info!(?event, "event"));

    let device = match session.start_container() {
        Ok(device) => device,
        Err(e) => {
            if let Err(stop) = session.stop_container() {
                tracing::warn!(error = %stop, "teardown after failed start");
            }
            return Err(e);
        }
    };
    println!("device ready: {device}");
    if !hold.is_zero() {
        tracing::info!(seconds = hold.as_secs(), "holding device");
        std::thread::sleep(hold);
    }
    session.stop_container()
}

fn resign(
    config: Config,
    workspace_root: PathBuf,
    apk: PathBuf,
    output_dir: Option<PathBuf>,
) -> droid_runner::Result<()> {
    let keystore = config
        .signing
        .keystore
        .clone()
        .unwrap_or_else(|| workspace_root.join("target/droid-runner/debug.keystore"));
    let tools = ToolPaths::discover(&config.sdk);
    let signer = ApkSigner::new(
        Arc::new(SystemRunner::new()),
        &tools.jarsigner,
        &tools.keytool,
        config.signing,
        keystore,
    )
    .with_commands(config.commands);
    let output_dir = output_dir.unwrap_or_else(|| workspace_root.join("target/droid-runner"));
    let signed = signer.resign(&apk, &output_dir)?;
    println!("{}", signed.display());
    Ok(())
}
