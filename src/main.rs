use anyhow::Context;
use clap::{Parser, Subcommand};
use drug_stock_limits::{run_batch, shortage_for_file, AnalysisConfig, ShortageRate};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

#[derive(Parser)]
#[command(
    name = "stock-limits",
    about = "Derive reorder limits and shortage rates from drug consumption ledgers."
)]
struct Cli {
    /// Directory receiving app.log and errors.log
    #[arg(long = "log-dir", default_value = "logs", global = true)]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze every ledger in a directory and export the summary table.
    Analyze {
        /// Directory of .xls/.xlsx/.csv ledgers
        #[arg(long)]
        input: PathBuf,
        /// Output directory for tables and charts
        #[arg(long)]
        export: PathBuf,
        /// JSON config file; --input/--export and the flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Inclusive start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,
        /// Inclusive end date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
        #[arg(long = "no-charts")]
        no_charts: bool,
        /// Process files in parallel
        #[arg(long)]
        parallel: bool,
    },
    /// Print the JSON schema of the config file.
    Schema,
    /// Print the shortage rate of a single ledger.
    Shortage {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
}

fn init_logging(log_dir: &Path) -> anyhow::Result<Vec<WorkerGuard>> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let (app_writer, app_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, "app.log"));
    let (error_writer, error_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, "errors.log"));

    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // `log` records from the library are bridged through tracing-log by `try_init`
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(app_writer)
                .with_filter(LevelFilter::INFO),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(error_writer)
                .with_filter(LevelFilter::ERROR),
        )
        .try_init()
        .context("installing the log subscriber")?;

    Ok(vec![app_guard, error_guard])
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Schema => {
            println!("{}", AnalysisConfig::schema_as_json()?);
        }
        Commands::Analyze {
            input,
            export,
            config,
            start,
            end,
            no_charts,
            parallel,
        } => {
            let _guards = init_logging(&cli.log_dir)?;

            let mut cfg = match config {
                Some(path) => AnalysisConfig::from_json_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => AnalysisConfig::new(&input, &export),
            };
            cfg.input_dir = input;
            cfg.export_dir = export;
            if start.is_some() {
                cfg.start_date = start;
            }
            if end.is_some() {
                cfg.end_date = end;
            }
            if no_charts {
                cfg.render_charts = false;
            }
            cfg.parallel |= parallel;

            let summary = run_batch(&cfg)?;
            info!(
                processed = summary.processed,
                skipped = summary.skipped.len(),
                "analysis complete"
            );

            println!(
                "Analyzed {} ledgers, {} without sales, {} skipped",
                summary.processed,
                summary.no_sales.len(),
                summary.skipped.len()
            );
            for skipped in &summary.skipped {
                println!("  skipped {}: {}", skipped.file_name, skipped.reason);
            }
            for path in &summary.exported {
                println!("  wrote {}", path.display());
            }
        }
        Commands::Shortage { file, start, end } => {
            let _guards = init_logging(&cli.log_dir)?;

            let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
            let mut cfg = AnalysisConfig::new(&dir, &dir);
            cfg.start_date = start;
            cfg.end_date = end;
            cfg.validate()?;

            let report = shortage_for_file(&file, &cfg)?;
            match report.rate {
                ShortageRate::Rate(rate) => println!(
                    "{}..{}: {} shortage days / {} on-sale days = {:.4}",
                    report.effective_start,
                    report.effective_end,
                    report.shortage_days,
                    report.on_sale_days,
                    rate
                ),
                ShortageRate::NoOnSaleDays => println!(
                    "{}..{}: no on-sale days, shortage rate undefined",
                    report.effective_start, report.effective_end
                ),
            }
        }
    }

    Ok(())
}
