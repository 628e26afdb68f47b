use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

use beckon::config::Config;
use beckon::contacts::XlsxBook;
use beckon::coordinates::CoordinateStore;
use beckon::desktop::EnigoDesktop;
use beckon::driver::{AutomationDriver, CIRCUIT_BREAKER_HINTS, RunOutcome};
use beckon::hotkeys::{self, InputHub, RunControl};
use beckon::logging;
use beckon::matcher::TemplateMatcher;
use beckon::recorder::{Recorder, record_to_file};
use beckon::sampler::XcapScreen;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuChoice {
    Record,
    Run,
    Exit,
}

impl MenuChoice {
    fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "1" => Some(MenuChoice::Record),
            "2" => Some(MenuChoice::Run),
            "3" => Some(MenuChoice::Exit),
            _ => None,
        }
    }
}

/// Blank means no limit.
fn parse_step_limit(input: &str) -> Result<Option<usize>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    let limit = input
        .parse::<usize>()
        .with_context(|| format!("not a step count: {input:?}"))?;
    Ok(Some(limit).filter(|n| *n > 0))
}

type Input = Lines<BufReader<Stdin>>;

async fn prompt(input: &mut Input, text: &str) -> Result<Option<String>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await?;
    Ok(input.next_line().await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let log_path = logging::init(&config.log_dir)?;

    tracing::info!(
        "beckon starting, sheet: {}, coordinates: {}, log: {}",
        config.sheet_path.display(),
        config.coordinates_path.display(),
        log_path.display(),
    );

    // Ctrl+C ends a recording through the global listener; it must not also
    // terminate the process.
    tokio::spawn(async {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("SIGINT ignored, choose 3 to exit");
        }
    });

    let hub = InputHub::start()?;
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!();
        println!("1: record coordinates");
        println!("2: run automation");
        println!("3: exit");
        let Some(line) = prompt(&mut input, "choice (1/2/3): ").await? else {
            break;
        };
        tracing::info!("menu choice: {}", line.trim());

        match MenuChoice::parse(&line) {
            Some(MenuChoice::Record) => {
                let Some(raw) = prompt(&mut input, "number of steps to record (blank for no limit): ").await? else {
                    break;
                };
                let limit = match parse_step_limit(&raw) {
                    Ok(limit) => limit,
                    Err(e) => {
                        tracing::warn!("{e:#}");
                        continue;
                    }
                };
                if let Err(e) = record(&config, &hub, limit).await {
                    tracing::error!("recording failed: {e:#}");
                }
            }
            Some(MenuChoice::Run) => {
                if let Err(e) = run(&config, &hub).await {
                    tracing::error!("run failed: {e:#}");
                }
            }
            Some(MenuChoice::Exit) => break,
            None => tracing::warn!("invalid choice {:?}, enter 1, 2 or 3", line.trim()),
        }
    }

    tracing::info!("exiting");
    Ok(())
}

async fn record(config: &Config, hub: &InputHub, limit: Option<usize>) -> Result<()> {
    let subscription = hub.subscribe();
    let recorder = Recorder::new(XcapScreen, config.templates_dir.clone());
    let path = config.coordinates_path.clone();

    println!("hold CapsLock and left-click each target in order; Ctrl+C or Esc to finish");

    let store = tokio::task::spawn_blocking(move || record_to_file(&recorder, subscription.events(), limit, &path))
        .await
        .context("recording task panicked")??;

    for record in store.records() {
        println!("{}: ({}, {})", record.step_name, record.x, record.y);
    }
    Ok(())
}

async fn run(config: &Config, hub: &InputHub) -> Result<()> {
    let coordinates = CoordinateStore::load(&config.coordinates_path)
        .with_context(|| format!("failed to load {}", config.coordinates_path.display()))?;
    let book = XlsxBook::new(&config.sheet_path, &config.phone_column, &config.status_column);
    let matcher = TemplateMatcher::new(XcapScreen, config.match_policy(), &config.debug_dir);
    let desktop = EnigoDesktop::new()?;
    let control = RunControl::new();

    let mut driver = AutomationDriver::new(matcher, desktop, book, control.clone(), config.driver_settings());
    let guard = hotkeys::register(hub, control)?;
    let report = driver.run(&coordinates).await;
    drop(guard);
    let report = report?;

    match &report.outcome {
        RunOutcome::Completed => println!("all rows handled"),
        RunOutcome::Stopped => println!("stopped"),
        RunOutcome::CircuitBroken { failures } => {
            println!("aborted after {failures} consecutive failures; check that:");
            for hint in CIRCUIT_BREAKER_HINTS {
                println!("  - {hint}");
            }
        }
        RunOutcome::Misconfigured(reason) => println!("aborted: {reason}"),
        RunOutcome::SaveFailed(reason) => println!("aborted, progress not saved: {reason}"),
    }
    println!("{}", report.summary);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menu_choice() {
        assert_eq!(MenuChoice::parse("1\n"), Some(MenuChoice::Record));
        assert_eq!(MenuChoice::parse(" 2 "), Some(MenuChoice::Run));
        assert_eq!(MenuChoice::parse("3"), Some(MenuChoice::Exit));
        assert_eq!(MenuChoice::parse("4"), None);
        assert_eq!(MenuChoice::parse(""), None);
    }

    #[test]
    fn test_step_limit() {
        assert_eq!(parse_step_limit("").unwrap(), None);
        assert_eq!(parse_step_limit(" 5\n").unwrap(), Some(5));
        assert_eq!(parse_step_limit("0").unwrap(), None);
        assert!(parse_step_limit("five").is_err());
    }
}
