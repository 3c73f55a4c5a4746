// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use tower::BoxError;
use tracing::metadata::LevelFilter;
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

pub type LoggerGuard = WorkerGuard;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

#[derive(Debug, Args, Clone)]
pub struct LogArgs {
    /// Log format
    #[arg(
        value_enum,
        long,
        global = true,
        env = "CDRSENDER_LOG_FORMAT",
        default_value = "text"
    )]
    pub log_format: LogFormatArg,

    /// Write logs to daily rolling files in this directory instead of stdout
    #[arg(long, global = true, env = "CDRSENDER_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// File name prefix of the rolling log files
    #[arg(
        long,
        global = true,
        env = "CDRSENDER_LOG_FILE_PREFIX",
        default_value = "cdrsender"
    )]
    pub log_file_prefix: String,

    /// Number of rolling log files to keep
    #[arg(long, global = true, env = "CDRSENDER_LOG_MAX_FILES", default_value = "30")]
    pub log_max_files: usize,

    /// Log lines buffered before writers block
    #[arg(
        long,
        global = true,
        env = "CDRSENDER_LOG_QUEUE_SIZE",
        default_value = "128000"
    )]
    pub log_queue_size: usize,
}

/// Install the global subscriber. Keep the guard alive until exit so queued
/// lines are flushed.
pub fn setup_logging(args: &LogArgs, app_name: String) -> Result<LoggerGuard, BoxError> {
    LogTracer::init().map_err(|e| format!("unable to setup log tracer: {}", e))?;

    let writer = make_writer(args)?;
    let (non_blocking_writer, guard) = NonBlockingBuilder::default()
        .lossy(false)
        .buffered_lines_limit(args.log_queue_size)
        .thread_name("cdrsender-log")
        .finish(writer);

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?
        .add_directive("hyper=warn".parse()?)
        .add_directive("hyper_util=warn".parse()?)
        .add_directive("opentelemetry=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?);

    if args.log_format == LogFormatArg::Json {
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        // Skip color codes when not writing to a terminal
        let use_ansi = args.log_dir.is_none() && io::stdout().is_terminal();

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(guard)
}

fn make_writer(args: &LogArgs) -> Result<Box<dyn Write + Send>, BoxError> {
    if args.log_queue_size == 0 {
        return Err("log queue size must be at least 1".into());
    }

    let Some(dir) = &args.log_dir else {
        return Ok(Box::new(io::stdout()));
    };

    if args.log_max_files == 0 {
        return Err("log max files must be at least 1".into());
    }

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(args.log_file_prefix.as_str())
        .filename_suffix("log")
        .max_log_files(args.log_max_files)
        .build(dir)
        .map_err(|e| format!("unable to create log files in {:?}: {}", dir, e))?;

    Ok(Box::new(appender))
}
