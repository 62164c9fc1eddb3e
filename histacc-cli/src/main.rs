use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use histacc_lib::{
    BinAddress, BinCount, CancellationToken, Driver, DriverConfig, HistError, HistogramSession, SerialConfig,
    Transport, transport,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Drive a histogram-accumulator peripheral over a serial port.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial port the peripheral is attached to (e.g. /dev/ttyUSB0, COM3).
    #[arg(short, long, global = true, default_value = "/dev/ttyUSB0")]
    port: String,
    /// Baud rate.
    #[arg(short, long, global = true, default_value_t = 115_200)]
    baud: u32,
    /// Response timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 1000)]
    timeout_ms: u64,
    /// Wall time of one peripheral clock cycle in milliseconds, used for settle delays.
    #[arg(long, global = true, default_value_t = 10)]
    settle_ms: u64,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long, global = true)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Accumulate, stop, configure bins and upload: the full test sequence.
    Run {
        /// Accumulation time in peripheral cycles.
        #[arg(long, default_value_t = 3000)]
        accumulate_cycles: u32,
        /// Clear the bins before accumulating.
        #[arg(long)]
        clear: bool,
        #[command(flatten)]
        upload: UploadArgs,
    },
    /// Start accumulation.
    Start,
    /// Stop accumulation.
    Stop,
    /// Clear all bins.
    Clear,
    /// Configure bins and upload without touching accumulation.
    Upload(UploadArgs),
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// Number of bins to upload.
    #[arg(short = 'n', long, default_value_t = 512)]
    bins: u16,
    /// First bin to upload.
    #[arg(short, long, default_value_t = 0)]
    address: u16,
    /// Number of consecutive uploads.
    #[arg(short, long, default_value_t = 1)]
    uploads: usize,
    /// Write the decoded session as JSON to this file.
    #[arg(long)]
    json: Option<PathBuf>,
    /// Include the raw upload bytes in the JSON output.
    #[arg(long)]
    raw: bool,
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_thread_ids(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file =
            File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // INFO by default, DEBUG with -v, TRACE (every serial byte) with -vv
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, cancelling the current transaction.");
            ctrl_c.cancel();
        }
    });

    if let Err(e) = run(cli, cancel).await {
        error!("Application failed: {:?}", e);
        process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let serial = SerialConfig::new(&cli.port)
        .with_baud_rate(cli.baud)
        .with_read_timeout(Duration::from_millis(cli.timeout_ms));
    let mut config = DriverConfig::default()
        .with_settle_unit(Duration::from_millis(cli.settle_ms))
        .with_response_timeout(Duration::from_millis(cli.timeout_ms));
    if let Cmd::Run { upload, .. } | Cmd::Upload(upload) = &cli.command {
        config = config.with_raw_uploads(upload.raw);
    }

    let stream = transport::open(&serial).with_context(|| format!("Failed to open {}", cli.port))?;
    info!("Connected to {}.", cli.port);
    let mut driver = Driver::new(stream, config).with_cancellation(cancel);

    let result = execute(&mut driver, cli.command).await;
    if let Err(e) = &result {
        if let Some(hist) = e.downcast_ref::<HistError>() {
            if hist.is_recoverable() {
                warn!("Link left mid-transaction; draining before closing");
                if let Err(drain) = driver.resync().await {
                    warn!("Drain failed: {}", drain);
                }
            }
        }
    }

    driver.close().await.context("Failed to close serial port")?;
    info!("Serial connection closed.");
    result
}

async fn execute<T: Transport>(driver: &mut Driver<T>, command: Cmd) -> Result<()> {
    match command {
        Cmd::Run {
            accumulate_cycles,
            clear,
            upload,
        } => {
            if clear {
                driver.clear_results().await?;
            }
            let accumulate = driver.config().cycles(accumulate_cycles);
            driver.acquire(accumulate).await.context("Accumulation failed")?;
            upload_session(driver, &upload).await
        }
        Cmd::Start => Ok(driver.start_histogram().await?),
        Cmd::Stop => Ok(driver.stop_histogram().await?),
        Cmd::Clear => Ok(driver.clear_results().await?),
        Cmd::Upload(upload) => upload_session(driver, &upload).await,
    }
}

async fn upload_session<T: Transport>(driver: &mut Driver<T>, args: &UploadArgs) -> Result<()> {
    if args.uploads == 0 {
        bail!("--uploads must be at least 1");
    }
    driver
        .configure(BinCount(args.bins), BinAddress(args.address))
        .await
        .context("Failed to configure bins")?;

    let session = driver.collect_session(args.uploads).await.context("Upload failed")?;
    report(&session);

    if let Some(path) = &args.json {
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &session)
            .with_context(|| format!("Failed to write {:?}", path))?;
        info!("Histogram data saved to {:?}", path);
    }
    Ok(())
}

fn report(session: &HistogramSession) {
    for (i, histogram) in session.histograms.iter().enumerate() {
        let peak = histogram
            .peak()
            .map(|(bin, count)| format!("bin {} ({} counts)", bin, count))
            .unwrap_or_else(|| "none".to_string());
        info!(
            "Upload {}: {} bins from {}, {} total counts, peak {}",
            i + 1,
            histogram.bin_count(),
            histogram.start,
            histogram.total_counts(),
            peak
        );
    }
    if session.len() > 1 {
        let summed = session.summed();
        let total: u64 = summed.iter().sum();
        if let Some((bin, count)) = summed.iter().enumerate().max_by_key(|&(_, count)| *count) {
            info!(
                "Summed over {} uploads: {} total counts, peak at row {} ({} counts)",
                session.len(),
                total,
                bin,
                count
            );
        }
    }
    if let Some(mean) = session.timing.mean() {
        info!(
            "{} upload(s) in {:.3} s, {:.3} s each on average",
            session.timing.upload_count(),
            session.timing.total.as_secs_f64(),
            mean.as_secs_f64()
        );
    }
}
