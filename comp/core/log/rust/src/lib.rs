// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Process-wide logger for detectmate services.
//!
//! Records go through the `log` facade and are written to stderr and/or a
//! log file as `2026-01-02 03:04:05.678 UTC | INFO | target | message`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::{LevelFilter, Log, Metadata, Record};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LevelFilter,
    pub console: bool,
    /// Append-only log file. Parent directories are created on init.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            console: true,
            file: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {}: {source}", path.display())]
    OpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("a global logger is already installed")]
    AlreadyInstalled(#[from] log::SetLoggerError),
}

pub struct Logger {
    level: LevelFilter,
    console: bool,
    file: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(config: &LogConfig) -> Result<Self, InitError> {
        let file = match &config.file {
            Some(path) => Some(Mutex::new(open_log_file(path)?)),
            None => None,
        };
        Ok(Self {
            level: config.level,
            console: config.console,
            file,
        })
    }
}

fn open_log_file(path: &Path) -> Result<File, InitError> {
    let open = || -> io::Result<File> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(path)
    };
    open().map_err(|source| InitError::OpenFile {
        path: path.to_path_buf(),
        source,
    })
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_record(record, OffsetDateTime::now_utc());
        if self.console {
            let _ = writeln!(io::stderr().lock(), "{line}");
        }
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = writeln!(file, "{line}");
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            let _ = file.lock().unwrap_or_else(PoisonError::into_inner).flush();
        }
        let _ = io::stderr().flush();
    }
}

/// Install the global logger. Can only succeed once per process.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    let logger = Logger::new(config)?;
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(config.level);
    Ok(())
}

/// Parse a log level name. Unknown levels silently default to Info.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" | "warning" => LevelFilter::Warn,
        "error" | "critical" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

pub fn format_record(record: &Record<'_>, now: OffsetDateTime) -> String {
    let format =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");
    let timestamp = now
        .format(format)
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    format!(
        "{timestamp} UTC | {} | {} | {}",
        record.level(),
        record.target(),
        record.args()
    )
}
