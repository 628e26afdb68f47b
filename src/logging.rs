use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// `automation_20240101_120000.log`
pub fn log_file_name(started: &chrono::DateTime<Local>) -> String {
    format!("automation_{}.log", started.format("%Y%m%d_%H%M%S"))
}

/// Install the global subscriber: stdout plus a fresh log file under
/// `log_dir`. Level comes from `RUST_LOG`, defaulting to `info`.
pub fn init(log_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(log_dir).with_context(|| format!("failed to create {}", log_dir.display()))?;
    let path = log_dir.join(log_file_name(&Local::now()));
    let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_log_file_name() {
        let started = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(log_file_name(&started), "automation_20240309_070501.log");
    }
}
