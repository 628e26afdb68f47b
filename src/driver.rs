use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;

use crate::contacts::{ContactBook, ContactSheet, RowStatus, SheetError, Summary, is_valid_phone};
use crate::coordinates::{CoordinateError, CoordinateRecord, CoordinateStore};
use crate::desktop::Desktop;
use crate::hotkeys::RunControl;
use crate::matcher::{Checkpoint, MatchOutcome, TemplateMatcher};
use crate::sampler::ScreenSource;

/// Shown when the run aborts on consecutive verification failures.
pub const CIRCUIT_BREAKER_HINTS: &[&str] = &[
    "the chat window is minimised or covered by another window",
    "the application UI changed after an update or a scaling change",
    "the recorded coordinates are stale and need to be recorded again",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Click,
    /// Click the search field, then paste the phone number and submit it.
    ClickAndEnterPhone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStep {
    pub label: &'static str,
    pub action: StepAction,
    /// Wait after the step so the next screen can appear.
    pub settle: Duration,
}

/// The add-contact click sequence, one entry per recorded coordinate.
pub fn default_workflow() -> Vec<WorkflowStep> {
    let step = |label, action, settle_secs| WorkflowStep {
        label,
        action,
        settle: Duration::from_secs(settle_secs),
    };
    vec![
        step("add-button", StepAction::Click, 2),
        step("input-field", StepAction::ClickAndEnterPhone, 3),
        step("add-confirm", StepAction::Click, 3),
        step("send-invite", StepAction::Click, 3),
        step("final-confirm", StepAction::Click, 3),
    ]
}

/// Human-like waits around each simulated action.
#[derive(Debug, Clone)]
pub struct Pacing {
    /// Random wait before every verification.
    pub pre_check: RangeInclusive<Duration>,
    pub before_paste: RangeInclusive<Duration>,
    pub before_enter: RangeInclusive<Duration>,
    pub after_enter: Duration,
    pub pause_poll: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing {
            pre_check: Duration::from_secs(3)..=Duration::from_secs(6),
            before_paste: Duration::from_millis(500)..=Duration::from_millis(1500),
            before_enter: Duration::from_millis(300)..=Duration::from_millis(800),
            after_enter: Duration::from_secs(1),
            pause_poll: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub workflow: Vec<WorkflowStep>,
    /// Consecutive failed rows that abort the run.
    pub failure_limit: u32,
    pub pacing: Pacing,
}

impl Default for DriverSettings {
    fn default() -> Self {
        DriverSettings {
            workflow: default_workflow(),
            failure_limit: 2,
            pacing: Pacing::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Stopped,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Stopped,
    CircuitBroken { failures: u32 },
    Misconfigured(String),
    /// Progress could not be written back; rows after the last good save
    /// may be attempted again on the next run.
    SaveFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub summary: Summary,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Coordinates(#[from] CoordinateError),

    #[error(transparent)]
    Sheet(#[from] SheetError),
}

enum RowResult {
    Finished(RowStatus),
    Misconfigured(String),
}

/// Works through the contact sheet, verifying every target before it is
/// clicked and writing each row's outcome back immediately.
pub struct AutomationDriver<S, D, B> {
    matcher: TemplateMatcher<S>,
    desktop: D,
    book: B,
    control: RunControl,
    settings: DriverSettings,
    state: RunState,
    consecutive_failures: u32,
}

impl<S, D, B> AutomationDriver<S, D, B>
where
    S: ScreenSource,
    D: Desktop,
    B: ContactBook,
{
    pub fn new(matcher: TemplateMatcher<S>, desktop: D, book: B, control: RunControl, settings: DriverSettings) -> Self {
        AutomationDriver {
            matcher,
            desktop,
            book,
            control,
            settings,
            state: RunState::Idle,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn book(&self) -> &B {
        &self.book
    }

    pub fn desktop(&self) -> &D {
        &self.desktop
    }

    pub async fn run(&mut self, coordinates: &CoordinateStore) -> Result<RunReport, RunError> {
        let steps = coordinates.require(self.settings.workflow.len())?.to_vec();
        let mut sheet = self.book.load()?;

        if sheet.is_empty() {
            tracing::warn!("contact sheet has no rows");
        }

        self.control.start();
        self.state = RunState::Running;
        self.consecutive_failures = 0;
        tracing::info!(
            "starting run over {} row(s), {} step(s) per row",
            sheet.len(),
            steps.len()
        );

        let outcome = match self.process_rows(&mut sheet, &steps).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("failed to save progress, aborting run: {e}");
                RunOutcome::SaveFailed(e.to_string())
            }
        };

        self.finish(match outcome {
            RunOutcome::Completed => RunState::Completed,
            RunOutcome::Stopped => RunState::Stopped,
            RunOutcome::CircuitBroken { .. } | RunOutcome::Misconfigured(_) | RunOutcome::SaveFailed(_) => {
                RunState::Aborted
            }
        });

        let summary = sheet.summary();
        tracing::info!("run finished: {outcome:?}");
        for line in summary.to_string().lines() {
            tracing::info!("{line}");
        }

        Ok(RunReport { outcome, summary })
    }

    async fn process_rows(&mut self, sheet: &mut ContactSheet, steps: &[CoordinateRecord]) -> Result<RunOutcome, RunError> {
        let total = sheet.len();

        for row in 0..total {
            if !self.control.is_running() {
                tracing::info!("stopped before row {}", row + 1);
                return Ok(RunOutcome::Stopped);
            }

            if let Some(status) = sheet.status(row) {
                tracing::debug!("row {}: already {status}, skipping", row + 1);
                continue;
            }

            let phone = sheet.phone(row);
            if !is_valid_phone(&phone) {
                tracing::warn!("row {}: invalid phone number {phone:?}", row + 1);
                sheet.set_status(row, RowStatus::InvalidPhone);
                self.book.save(sheet)?;
                continue;
            }

            if !self.wait_while_paused().await {
                tracing::info!("stopped while paused");
                return Ok(RunOutcome::Stopped);
            }

            tracing::info!("row {}/{total}: adding {phone}", row + 1);
            let status = match self.process_row(&phone, steps).await {
                RowResult::Finished(status) => status,
                RowResult::Misconfigured(reason) => {
                    tracing::error!("configuration error, aborting run: {reason}");
                    self.book.save(sheet)?;
                    return Ok(RunOutcome::Misconfigured(reason));
                }
            };

            tracing::info!("row {}: {status}", row + 1);
            let failed = status == RowStatus::AddFailed;
            sheet.set_status(row, status);
            self.book.save(sheet)?;

            if failed {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.settings.failure_limit {
                    tracing::error!(
                        "{} consecutive rows failed verification, aborting. Check that:",
                        self.consecutive_failures
                    );
                    for hint in CIRCUIT_BREAKER_HINTS {
                        tracing::error!("  - {hint}");
                    }
                    return Ok(RunOutcome::CircuitBroken {
                        failures: self.consecutive_failures,
                    });
                }
            }
        }

        Ok(RunOutcome::Completed)
    }

    async fn process_row(&mut self, phone: &str, steps: &[CoordinateRecord]) -> RowResult {
        let workflow = self.settings.workflow.clone();

        for (step, record) in workflow.iter().zip(steps) {
            sleep(jitter(&self.settings.pacing.pre_check)).await;

            let checkpoint = Checkpoint {
                x: record.x,
                y: record.y,
                template: &record.template_path,
                step: &record.step_name,
                phone,
            };
            match self.matcher.verify(&checkpoint).await {
                MatchOutcome::Matched(_) => self.consecutive_failures = 0,
                MatchOutcome::TransientMismatch { artifact, .. } => {
                    tracing::warn!(
                        "{} did not match, see {}",
                        step.label,
                        artifact.map_or_else(|| "no capture".to_string(), |p| p.display().to_string())
                    );
                    return RowResult::Finished(RowStatus::AddFailed);
                }
                MatchOutcome::ConfigurationError(reason) => return RowResult::Misconfigured(reason),
                MatchOutcome::UnexpectedFault(detail) => {
                    tracing::error!("{}: {detail}", step.label);
                    return RowResult::Finished(RowStatus::Error(detail));
                }
            }

            if let Err(e) = self.perform(step, record, phone).await {
                tracing::error!("{}: {e:#}", step.label);
                return RowResult::Finished(RowStatus::Error(format!("{e:#}")));
            }
            sleep(step.settle).await;
        }

        RowResult::Finished(RowStatus::Processed)
    }

    async fn perform(&mut self, step: &WorkflowStep, record: &CoordinateRecord, phone: &str) -> anyhow::Result<()> {
        self.desktop.click(record.x, record.y)?;
        tracing::debug!("{}: clicked ({}, {})", step.label, record.x, record.y);

        if step.action == StepAction::ClickAndEnterPhone {
            let pacing = &self.settings.pacing;
            self.desktop.set_clipboard(phone)?;
            sleep(jitter(&pacing.before_paste)).await;
            self.desktop.paste()?;
            sleep(jitter(&pacing.before_enter)).await;
            self.desktop.press_enter()?;
            sleep(pacing.after_enter).await;
        }
        Ok(())
    }

    /// Blocks while paused. Returns false if the run was stopped meanwhile.
    async fn wait_while_paused(&mut self) -> bool {
        if !self.control.is_paused() {
            return self.control.is_running();
        }

        self.state = RunState::Paused;
        tracing::info!("paused");
        while self.control.is_paused() {
            if !self.control.is_running() {
                return false;
            }
            sleep(self.settings.pacing.pause_poll).await;
        }
        self.state = RunState::Running;
        tracing::info!("resumed");
        self.control.is_running()
    }

    fn finish(&mut self, state: RunState) {
        self.state = state;
        self.control.stop();
    }
}

fn jitter(range: &RangeInclusive<Duration>) -> Duration {
    if range.start() >= range.end() {
        return *range.start();
    }
    rand::rng().random_range(range.clone())
}
