/// Evener - level WAVE files to a common weighted-average amplitude
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use evener_cli::{
    report::{self, FileInfo},
    scan, EvenerConfig, OutputTarget,
};
use evener_core::{BatchEvent, CancelFlag, FileRegistry};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status when `check` finds files that would clip
const EXIT_OVERMODULATION: u8 = 2;

#[derive(Parser)]
#[command(name = "evener")]
#[command(about = "Level WAVE files to a common weighted-average amplitude", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./evener.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show format and level of WAVE files
    Info {
        /// Files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Report files that would clip at the target level
    Check {
        /// Files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        level: LevelArgs,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Scale files to the target level
    Adjust {
        /// Files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        level: LevelArgs,

        /// Write adjusted files into this directory
        #[arg(long, conflicts_with = "suffix")]
        out_dir: Option<PathBuf>,

        /// Write adjusted files next to the source with this name suffix
        #[arg(long)]
        suffix: Option<String>,

        /// Print the batch summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct LevelArgs {
    /// Reference file whose level defines the target; repeat to average several
    #[arg(short, long = "reference")]
    reference: Vec<PathBuf>,

    /// Multiplier on the reference level (or each file's own level)
    #[arg(short, long)]
    factor: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evener=info,evener_core=info,evener_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = EvenerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Info { paths, json } => info(&config, &paths, json),
        Commands::Check { paths, level, json } => {
            let config = config.with_overrides(level.factor, None, None);
            check(&config, &paths, &level.reference, json).await
        }
        Commands::Adjust {
            paths,
            level,
            out_dir,
            suffix,
            json,
        } => {
            let config = config.with_overrides(level.factor, out_dir, suffix);
            adjust(&config, &paths, &level.reference, json).await
        }
    }
}

fn info(config: &EvenerConfig, paths: &[PathBuf], json: bool) -> anyhow::Result<ExitCode> {
    config.validate()?;
    let files = scan::collect_inputs(paths, &config.extensions, config.recursive)?;

    let mut registry = FileRegistry::new();
    let mut infos = Vec::new();
    let mut failed = false;

    for path in &files {
        match registry.open_detailed(path) {
            Ok(metrics) => {
                if let Some(handle) = registry.handle(path) {
                    infos.push(FileInfo {
                        path: handle.path().to_path_buf(),
                        layout: *handle.layout(),
                        metrics,
                        duration_seconds: handle.layout().duration_seconds(),
                    });
                }
                // Only the measurements are needed
                registry.close(path);
            }
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                failed = true;
            }
        }
    }

    if json {
        println!("{}", report::to_json(&infos)?);
    } else {
        for info in &infos {
            println!("{}", report::format_info(info));
        }
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn check(
    config: &EvenerConfig,
    paths: &[PathBuf],
    reference: &[PathBuf],
    json: bool,
) -> anyhow::Result<ExitCode> {
    config.validate()?;
    let files = scan::collect_inputs(paths, &config.extensions, config.recursive)?;
    let registry = open_all(&files, reference);

    let mut task = registry.spawn_check_overmodulation(&files, reference, config.factor)?;
    cancel_on_ctrl_c(task.cancel_flag());

    while let Some(event) = task.next_event().await {
        if let BatchEvent::Progress(fraction) = event {
            show_progress(fraction);
        }
    }
    eprintln!();
    let report = task.join().await?;

    if json {
        println!("{}", report::to_json(&report)?);
    } else {
        println!("{}", report::format_check(&report));
    }

    Ok(if report.all_fit() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_OVERMODULATION)
    })
}

async fn adjust(
    config: &EvenerConfig,
    paths: &[PathBuf],
    reference: &[PathBuf],
    json: bool,
) -> anyhow::Result<ExitCode> {
    config.validate()?;
    let files = scan::collect_inputs(paths, &config.extensions, config.recursive)?;

    if let OutputTarget::Directory(dir) = &config.output {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    }

    let registry = open_all(&files, reference);
    let output = config.output.clone();

    let mut task = registry.spawn_adjust_files(&files, reference, config.factor, move |path: &Path| {
        output.resolve(path)
    })?;
    cancel_on_ctrl_c(task.cancel_flag());

    while let Some(event) = task.next_event().await {
        match event {
            BatchEvent::Progress(fraction) => show_progress(fraction),
            BatchEvent::Failed { path, error } => {
                tracing::debug!("{} failed: {}", path.display(), error);
            }
            BatchEvent::Succeeded(_) | BatchEvent::Overmodulating(_) => {}
        }
    }
    eprintln!();
    let summary = task.join().await?;

    if json {
        println!("{}", report::to_json(&summary)?);
    } else {
        println!("{}", report::format_summary(&summary));
    }

    Ok(if summary.failed.is_empty() && !summary.cancelled {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Open every input and reference file, logging the ones that fail
fn open_all(files: &[PathBuf], reference: &[PathBuf]) -> FileRegistry {
    let mut registry = FileRegistry::new();
    for path in files.iter().chain(reference) {
        if registry.is_open(path) {
            continue;
        }
        if let Err(e) = registry.open_detailed(path) {
            tracing::warn!("Cannot open {}: {}", path.display(), e);
        }
    }
    tracing::info!("Opened {} of {} files", registry.len(), files.len());
    registry
}

fn cancel_on_ctrl_c(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current file");
            cancel.cancel();
        }
    });
}

fn show_progress(fraction: f64) {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "\r{}", report::format_progress(fraction));
    let _ = stderr.flush();
}
