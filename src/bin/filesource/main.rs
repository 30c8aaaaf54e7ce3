// SPDX-License-Identifier: Apache-2.0

use clap::{ArgGroup, Parser, ValueEnum};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::timeout;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use filesource::acquisition::event::LineEvent;
use filesource::acquisition::file::{FileSource, FileSourceConfig};
use filesource::acquisition::supervisor::Supervisor;
use filesource::acquisition::{BoxError, DataSource, MetricsLevel, get_meter};
use filesource::bounded_channel::{BoundedReceiver, bounded};

const DEFAULT_QUEUE_SIZE: usize = 1_000;

const DRAIN_TIMEOUT_MILLIS: u64 = 2_000;

#[derive(Debug, Parser)]
#[command(name = "filesource")]
#[command(bin_name = "filesource")]
#[command(version, about, long_about = None)]
#[command(group(ArgGroup::new("source").required(true).args(["config", "dsn"])))]
struct Arguments {
    /// YAML acquisition file
    #[arg(long, env = "FILESOURCE_CONFIG")]
    config: Option<PathBuf>,

    /// One-shot descriptor, e.g. file:///var/log/auth.log?log_level=debug
    #[arg(long)]
    dsn: Option<String>,

    /// Label attached to events read through --dsn, as key=value
    #[arg(long = "label", value_parser = parse_label)]
    labels: Vec<(String, String)>,

    /// Line counter verbosity: none, aggregated or full
    #[arg(long, env = "FILESOURCE_METRICS_LEVEL", default_value = "full")]
    metrics_level: MetricsLevel,

    #[arg(
        value_enum,
        long,
        env = "FILESOURCE_LOG_FORMAT",
        default_value = "text"
    )]
    /// Log format
    log_format: LogFormatArg,

    /// Capacity of the shared output queue
    #[arg(long, default_value_t = DEFAULT_QUEUE_SIZE)]
    queue_size: usize,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

fn parse_label(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid label '{}', expected key=value", s)),
    }
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    let _guard = match setup_logging(&opt.log_format) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to setup logging: {}", e);
            return ExitCode::from(1);
        }
    };

    match run(opt) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = e, "Acquisition failed.");
            ExitCode::from(1)
        }
    }
}

fn build_source(opt: &Arguments) -> Result<DataSource, BoxError> {
    let meter = get_meter();
    let source = match (&opt.config, &opt.dsn) {
        (Some(path), _) => FileSource::from_config(
            FileSourceConfig::from_yaml_file(path)?,
            opt.metrics_level,
            &meter,
        )?,
        (None, Some(dsn)) => {
            let labels: BTreeMap<String, String> = opt.labels.iter().cloned().collect();
            FileSource::configure_by_dsn(dsn, labels, dsn, opt.metrics_level, &meter)?
        }
        (None, None) => return Err("one of --config or --dsn is required".into()),
    };
    Ok(source.into())
}

#[tokio::main]
async fn run(opt: Arguments) -> Result<(), BoxError> {
    let source = build_source(&opt)?;
    info!(
        module = source.name(),
        mode = %source.mode(),
        unique_id = source.unique_id(),
        "Starting acquisition"
    );

    let (tx, rx) = bounded(opt.queue_size.max(1));
    let printer = tokio::spawn(print_events(rx));

    let supervisor = Supervisor::new();
    if let Err(e) = source.start(tx, &supervisor).await {
        supervisor.kill(Some(e));
    }

    select! {
        _ = signal_wait() => {
            info!("Shutdown signal received.");
            supervisor.kill(None);
        },
        _ = supervisor.cancelled() => {},
    }

    let result = supervisor.wait().await;

    // Workers hold the only senders, so the printer ends once they are gone.
    match timeout(Duration::from_millis(DRAIN_TIMEOUT_MILLIS), printer).await {
        Ok(Ok(count)) => info!(count, "Finished printing events"),
        Ok(Err(e)) => warn!(error = %e, "Event printer failed"),
        Err(_) => warn!("Timeout waiting for event printer to drain"),
    }

    for (src, lines) in source.metrics() {
        info!(source = %src, lines, "Lines read");
    }

    result.map_err(|e| e.to_string().into())
}

async fn print_events(rx: BoundedReceiver<LineEvent>) -> u64 {
    let mut count = 0;
    while let Some(event) = rx.next().await {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Could not serialize event");
                continue;
            }
        };
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", line) {
            error!(error = %e, "Could not write event to stdout");
            break;
        }
        count += 1;
    }
    count
}

async fn signal_wait() {
    let (mut sig_term, mut sig_int) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Could not install signal handlers");
            return std::future::pending().await;
        }
    };

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init().map_err(|e| e.to_string())?;

    // Events go to stdout, logs to stderr.
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?
        .add_directive("opentelemetry=warn".parse()?)
        .add_directive("notify=warn".parse()?);

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io::IsTerminal;

        let use_ansi = std::io::stderr().is_terminal();

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}
