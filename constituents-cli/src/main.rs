//! Constituents CLI — fetch holdings, rebuild weight matrices, report status.
//!
//! Commands:
//! - `run` — fetch every configured fund, write snapshots, merge matrices
//! - `update` — rebuild or extend matrices from snapshots already on disk
//! - `status` — report snapshot counts and matrix date ranges per fund
//! - `init-config` — write a config file with the stock fund list

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use constituents_core::config::PipelineConfig;
use constituents_core::data::{
    run_pipeline, update_from_snapshots, CommandTrigger, HoldingsFetcher, ISharesFetcher,
    LogProgress, MatrixStore, MergeOutcome, SnapshotStore, SpdrFetcher,
};
use constituents_core::domain::ProviderKind;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "constituents",
    about = "Constituents CLI — daily ETF holdings snapshots and weight matrices"
)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch holdings for every configured fund and merge them.
    Run {
        /// Path to a TOML config file.
        #[arg(long, default_value = "constituents.toml")]
        config: PathBuf,

        /// Only run funds of this provider (ishares, spdr).
        #[arg(long)]
        provider: Option<ProviderKind>,

        /// Only run these funds.
        #[arg(long = "fund")]
        funds: Vec<String>,
    },
    /// Rebuild or extend weight matrices from stored snapshots.
    Update {
        /// Path to a TOML config file.
        #[arg(long, default_value = "constituents.toml")]
        config: PathBuf,
    },
    /// Report stored snapshots and matrix coverage per fund.
    Status {
        /// Path to a TOML config file.
        #[arg(long, default_value = "constituents.toml")]
        config: PathBuf,
    },
    /// Write a config file with the default fund list.
    InitConfig {
        /// Where to write the config.
        #[arg(long, default_value = "constituents.toml")]
        output: PathBuf,

        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            provider,
            funds,
        } => run_fetch(&config, provider, &funds),
        Commands::Update { config } => run_update(&config),
        Commands::Status { config } => run_status(&config),
        Commands::InitConfig { output, force } => run_init_config(&output, force),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "constituents=debug,constituents_core=debug"
    } else {
        "constituents=info,constituents_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::from_file(path)
        .with_context(|| format!("loading config {}", path.display()))
}

fn run_fetch(config_path: &Path, provider: Option<ProviderKind>, funds: &[String]) -> Result<()> {
    let mut config = load_config(config_path)?;
    if !funds.is_empty() {
        config.retain_funds(funds);
    }

    let wanted = |kind: ProviderKind| provider.map_or(true, |p| p == kind);

    let ishares = if wanted(ProviderKind::IShares) && !config.ishares.funds.is_empty() {
        Some(ISharesFetcher::new(&config)?)
    } else {
        None
    };
    let spdr = if wanted(ProviderKind::Spdr) && !config.spdr.funds.is_empty() {
        let trigger = CommandTrigger::new(&config.browser_command)?;
        Some(SpdrFetcher::new(&config, Box::new(trigger)))
    } else {
        None
    };

    let mut fetchers: Vec<&dyn HoldingsFetcher> = Vec::new();
    if let Some(f) = &ishares {
        fetchers.push(f);
    }
    if let Some(f) = &spdr {
        fetchers.push(f);
    }
    if fetchers.is_empty() {
        bail!("no funds selected");
    }

    let summary = run_pipeline(&config, &fetchers, &LogProgress)?;

    for report in &summary.reports {
        let merged = match &report.merge {
            MergeOutcome::Appended { new_columns, .. } => {
                format!("appended ({new_columns} new ids)")
            }
            MergeOutcome::Skipped { latest, .. } => format!("skipped (matrix at {latest})"),
        };
        println!(
            "{:<6} {} {:>5} holdings {:>4} unmatched  {merged}",
            report.fund,
            report.as_of,
            report.holdings,
            report.unmatched.len()
        );
    }

    if !summary.all_succeeded() {
        for (fund, err) in &summary.errors {
            eprintln!("Error for {fund}: {err}");
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run_update(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let summary = update_from_snapshots(&config, &LogProgress)?;

    for report in &summary.reports {
        println!(
            "{:<6} {:>4} snapshots, {:>4} dates appended, {:>4} unusable",
            report.fund,
            report.snapshots_seen,
            report.appended.len(),
            report.unusable.len()
        );
    }

    if !summary.all_succeeded() {
        for (fund, err) in &summary.errors {
            eprintln!("Error for {fund}: {err}");
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run_status(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let snapshots = SnapshotStore::new(config.snapshot_root());
    let matrices = MatrixStore::new(config.matrix_root());

    let mut funds = snapshots.funds()?;
    for kind in ProviderKind::ALL {
        for spec in config.fund_specs(kind) {
            if !funds.contains(&spec.name) {
                funds.push(spec.name);
            }
        }
    }
    funds.sort();

    if funds.is_empty() {
        println!("No funds configured or stored under {}", config.storage_root.display());
        return Ok(());
    }

    println!("Storage: {}", config.storage_root.display());
    println!();
    println!(
        "{:<8} {:>9} {:<12} {:<25} {:>6} {:>9}",
        "Fund", "Snapshots", "Latest", "Matrix Range", "Dates", "Ids"
    );
    println!("{}", "-".repeat(74));

    for fund in &funds {
        let dates = snapshots.list(fund)?;
        let latest = dates
            .last()
            .map(|(d, _)| d.to_string())
            .unwrap_or_else(|| "-".into());

        let (range, rows, ids) = match matrices.load(fund) {
            Ok(Some(m)) => match (m.first_date(), m.latest_date()) {
                (Some(first), Some(last)) => (
                    format!("{first} to {last}"),
                    m.row_count().to_string(),
                    m.columns().len().to_string(),
                ),
                _ => ("(empty)".into(), "0".into(), "0".into()),
            },
            Ok(None) => ("(no matrix)".into(), "-".into(), "-".into()),
            Err(e) => {
                warn!("{fund}: {e}");
                ("(corrupt matrix)".into(), "-".into(), "-".into())
            }
        };

        println!(
            "{:<8} {:>9} {:<12} {:<25} {:>6} {:>9}",
            fund,
            dates.len(),
            latest,
            range,
            rows,
            ids
        );
    }
    Ok(())
}

fn run_init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }
    let toml = PipelineConfig::default_funds().to_toml()?;
    std::fs::write(output, toml).with_context(|| format!("writing {}", output.display()))?;
    println!("Config written to: {}", output.display());
    Ok(())
}
