use std::{fs::OpenOptions, io::Write, path::PathBuf};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

static TELEMETRY_ENABLED: Lazy<std::sync::RwLock<bool>> =
    Lazy::new(|| std::sync::RwLock::new(false));

const LOG_FILE: &str = "polychat.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Error,
}

impl Level {
    fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Error => "ERROR",
        }
    }
}

/**
 * \brief Turns file logging on or off for the whole process.
 */
pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = TELEMETRY_ENABLED.write() {
        *guard = enabled;
    }
}

pub fn is_enabled() -> bool {
    TELEMETRY_ENABLED.read().map(|g| *g).unwrap_or(false)
}

/**
 * \brief Log directory: `POLYCHAT_LOG_DIR` or `./logs`.
 */
pub fn log_dir() -> PathBuf {
    std::env::var_os("POLYCHAT_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/**
 * \brief Records a routine event. Never pass API keys or message bodies.
 */
pub fn log_event(category: &str, message: &str) {
    record(Level::Info, category, message);
}

pub fn log_error(category: &str, message: &str) {
    record(Level::Error, category, message);
}

fn record(level: Level, category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line(level, category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

fn format_line(timestamp: &str, level: Level, category: &str, message: &str) -> String {
    format!(
        "{} [{}] {} - {}",
        timestamp,
        level.as_str(),
        category,
        message.replace('\n', " ")
    )
}

fn write_line(level: Level, category: &str, message: &str) -> Result<()> {
    let dir = log_dir();
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))?;
    writeln!(file, "{}", format_line(&timestamp, level, category, message))?;
    Ok(())
}
