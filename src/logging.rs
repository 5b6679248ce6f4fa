use crate::config::LogSettings;
use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use std::fs::{self, OpenOptions};
use std::io::Write;

fn format_record(buf: &mut env_logger::fmt::Formatter, record: &log::Record) -> std::io::Result<()> {
    writeln!(
        buf,
        "[{} {:>5} {}] {}",
        buf.timestamp_millis(),
        record.level(),
        record.target(),
        record.args()
    )
}

/// Installs the global logger. `RUST_LOG` overrides the configured level;
/// with a log file configured, records go there instead of stderr.
pub fn init(settings: &LogSettings) -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(settings.level.as_str()));
    builder.format(format_record);
    if let Some(path) = &settings.file {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.try_init().context("logger is already installed")
}
