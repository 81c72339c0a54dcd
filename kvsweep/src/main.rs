use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use kvsweep_core::config::{Settings, SweepConfig};
use kvsweep_core::sweep::{PlanReport, RunSummary};
use kvsweep_core::{Sweeper, logging};
use kvsweep_vault::VaultConnector;

const ENV_CONFIG: &str = "KVSWEEP_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    Plan,
    Help,
}

#[derive(Debug, PartialEq, Eq)]
struct Cli {
    command: Command,
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(msg) => {
            eprintln!("error: {msg}");
            print_help();
            std::process::exit(1);
        }
    };
    if cli.command == Command::Help {
        print_help();
        return Ok(());
    }

    let config_path = cli
        .config
        .unwrap_or_else(|| default_config_path(|k| std::env::var_os(k).map(PathBuf::from)));
    let config = load_config(&config_path)?;

    logging::init(&config.log).context("failed to initialise logging")?;
    warn_if_exposed(&config_path);

    let connector = VaultConnector::new(&config.vault)?;
    let sweeper = Sweeper::new(Arc::new(connector));

    match cli.command {
        Command::Run => {
            let summary = sweeper.run(&config.plan).await.context("sweep failed")?;
            print_summary(&summary);
        }
        Command::Plan => {
            let report = sweeper.preview(&config.plan).await.context("plan failed")?;
            print_report(&config, &report);
        }
        Command::Help => {}
    }
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Cli, String> {
    let mut command = None;
    let mut config = None;
    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        if arg == "--config" || arg == "-c" {
            let path = args
                .get(i + 1)
                .ok_or_else(|| "--config requires a path argument".to_string())?;
            config = Some(PathBuf::from(path));
            i += 2;
            continue;
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            config = Some(PathBuf::from(path));
            i += 1;
            continue;
        }

        let next = match arg {
            "run" => Command::Run,
            "plan" => Command::Plan,
            "help" | "--help" | "-h" => Command::Help,
            other if other.starts_with('-') => return Err(format!("unknown option: {other}")),
            other => return Err(format!("unknown command: {other}")),
        };
        if command.replace(next).is_some() {
            return Err(format!("unexpected argument: {arg}"));
        }
        i += 1;
    }

    Ok(Cli {
        command: command.unwrap_or(Command::Run),
        config,
    })
}

fn default_config_path(var: impl Fn(&str) -> Option<PathBuf>) -> PathBuf {
    if let Some(path) = var(ENV_CONFIG).filter(|p| !p.as_os_str().is_empty()) {
        return path;
    }
    let base = var("XDG_CONFIG_HOME")
        .or_else(|| var("HOME").map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("kvsweep").join("config.toml")
}

/// File, then `.env`, then the process environment.
fn load_config(path: &Path) -> Result<SweepConfig> {
    let mut settings = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Settings::from_toml(&content).with_context(|| format!("in {}", path.display()))?
    } else {
        Settings::default()
    };

    // Existing variables win over `.env`.
    dotenvy::dotenv().ok();
    settings.apply_env(|k| std::env::var(k).ok())?;
    Ok(settings.resolve()?)
}

fn warn_if_exposed(path: &Path) {
    if !path.exists() {
        tracing::debug!("no config file at {}, using environment only", path.display());
        return;
    }
    tracing::info!("loaded config from {}", path.display());

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        match std::fs::metadata(path) {
            Ok(meta) => {
                let mode = meta.mode();
                if mode & 0o077 != 0 {
                    tracing::warn!(
                        path = %path.display(),
                        mode = format!("{:o}", mode & 0o777),
                        "config file is readable by group or others, recommend: chmod 600 {}",
                        path.display()
                    );
                }
            }
            Err(e) => tracing::warn!("could not check config file permissions: {e}"),
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("copied:              {}", summary.copied.len());
    println!("deleted (source):    {}", summary.source_deleted.len());
    println!("deleted (archive):   {}", summary.destination_deleted.len());
}

fn print_report(config: &SweepConfig, report: &PlanReport) {
    let plan = &config.plan;
    println!(
        "{} (older than {} days, would be copied to {} and deleted):",
        plan.source_mount, plan.source_max_age_days, plan.destination_mount
    );
    for path in &report.source_aged {
        println!("  {path}");
    }
    println!(
        "{} (older than {} days, would be deleted):",
        plan.destination_mount, plan.destination_max_age_days
    );
    for path in &report.destination_aged {
        println!("  {path}");
    }
}

fn print_help() {
    println!(
        "\
kvsweep - archive and purge aged secrets in Vault KV v2

USAGE:
    kvsweep [command] [-c|--config <path>]

COMMANDS:
    run                 Copy aged secrets to the destination mount, delete them
                        from the source, then purge the destination [default]
    plan                List the paths a run would touch, change nothing
    help                Show this help

OPTIONS:
    -c, --config <path> Config file (default: $KVSWEEP_CONFIG, else
                        $XDG_CONFIG_HOME/kvsweep/config.toml)

ENVIRONMENT:
    VAULT_ADDR, VAULT_NAMESPACE, VAULT_ROLE_ID, VAULT_SECRET_ID
    VAULT_SOURCE_MOUNT, VAULT_DESTINATION_MOUNT
    VAULT_SOURCE_AGE, VAULT_DESTINATION_AGE (days)
    KVSWEEP_LOG (log filter, e.g. debug)

Variables may also be placed in a .env file in the working directory."
    );
}
