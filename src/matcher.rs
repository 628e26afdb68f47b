use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use image::{DynamicImage, RgbImage};
use tokio::time::sleep;

use crate::sampler::{ScreenRegion, ScreenSource};
use crate::similarity::{self, Similarity};

pub const DEFAULT_THRESHOLD: f64 = 0.6;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Pause between attempts, long enough for UI animations and loading to settle.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct MatchPolicy {
    /// Minimum score for the screen to count as matching the template.
    pub threshold: f64,
    /// Total number of comparisons before giving up.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        MatchPolicy {
            threshold: DEFAULT_THRESHOLD,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// One point to verify before clicking it.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint<'a> {
    pub x: i32,
    pub y: i32,
    pub template: &'a Path,
    /// Step label, used in logs and the artifact file name.
    pub step: &'a str,
    /// Phone number being processed, used in the artifact file name.
    pub phone: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(Similarity),
    /// The screen never reached the threshold. `artifact` is the capture saved
    /// at the time of the last attempt, when it could be written.
    TransientMismatch {
        artifact: Option<PathBuf>,
        similarity: Similarity,
    },
    /// Missing or unreadable template, or a capture whose size differs from
    /// the template. Never retried.
    ConfigurationError(String),
    /// Capture kept failing until the retry budget ran out.
    UnexpectedFault(String),
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched(_))
    }
}

pub struct TemplateMatcher<S> {
    screen: S,
    policy: MatchPolicy,
    artifact_dir: PathBuf,
}

impl<S: ScreenSource> TemplateMatcher<S> {
    pub fn new(screen: S, policy: MatchPolicy, artifact_dir: impl Into<PathBuf>) -> Self {
        TemplateMatcher {
            screen,
            policy,
            artifact_dir: artifact_dir.into(),
        }
    }

    /// Check whether the screen around the checkpoint currently looks like its
    /// template, retrying transient mismatches and capture faults.
    pub async fn verify(&self, checkpoint: &Checkpoint<'_>) -> MatchOutcome {
        let template_path = checkpoint.template;
        if !template_path.exists() {
            tracing::error!("template file does not exist: {}", template_path.display());
            return MatchOutcome::ConfigurationError(format!(
                "template file does not exist: {}",
                template_path.display()
            ));
        }

        let reference = match image::open(template_path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                tracing::error!("failed to decode template {}: {e}", template_path.display());
                return MatchOutcome::ConfigurationError(format!(
                    "failed to decode template {}: {e}",
                    template_path.display()
                ));
            }
        };

        let region = ScreenRegion::around(checkpoint.x, checkpoint.y);
        let attempts = self.policy.max_retries.max(1);
        let mut attempt = 1;

        loop {
            let last_attempt = attempt >= attempts;

            let captured = match self.screen.capture(region) {
                Ok(img) => DynamicImage::ImageRgba8(img).to_rgb8(),
                Err(e) => {
                    tracing::warn!(
                        "{}: capture failed (attempt {attempt}/{attempts}): {e:#}",
                        checkpoint.step
                    );
                    if last_attempt {
                        return MatchOutcome::UnexpectedFault(format!("{e:#}"));
                    }
                    self.wait_before_retry().await;
                    attempt += 1;
                    continue;
                }
            };

            if captured.dimensions() != reference.dimensions() {
                let (cw, ch) = captured.dimensions();
                let (tw, th) = reference.dimensions();
                tracing::error!(
                    "{}: capture is {cw}x{ch} but template is {tw}x{th}",
                    checkpoint.step
                );
                return MatchOutcome::ConfigurationError(format!(
                    "size mismatch: capture {cw}x{ch} vs template {tw}x{th} ({})",
                    template_path.display()
                ));
            }

            let Some(similarity) = similarity::compare(&captured, &reference) else {
                return MatchOutcome::ConfigurationError(format!(
                    "template {} is empty",
                    template_path.display()
                ));
            };

            tracing::info!(
                "{}: similarity {:.4} (threshold {:.2}, attempt {attempt}/{attempts})",
                checkpoint.step,
                similarity.score,
                self.policy.threshold
            );

            if similarity.score >= self.policy.threshold {
                return MatchOutcome::Matched(similarity);
            }

            if !last_attempt {
                self.wait_before_retry().await;
                attempt += 1;
                continue;
            }

            let artifact = match self.save_artifact(&captured, checkpoint) {
                Ok(path) => {
                    tracing::info!("saved failure capture to {}", path.display());
                    Some(path)
                }
                Err(e) => {
                    tracing::warn!("failed to save failure capture: {e:#}");
                    None
                }
            };

            tracing::debug!(
                "template mismatch: template={} at=({}, {}) global={:.4} worst_region={:.4} final={:.4} threshold={} attempts={attempt}/{attempts}",
                template_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                checkpoint.x,
                checkpoint.y,
                similarity.global,
                similarity.worst_region,
                similarity.score,
                self.policy.threshold,
            );

            return MatchOutcome::TransientMismatch {
                artifact,
                similarity,
            };
        }
    }

    async fn wait_before_retry(&self) {
        tracing::info!("retrying in {:?}", self.policy.retry_delay);
        sleep(self.policy.retry_delay).await;
    }

    fn save_artifact(&self, captured: &RgbImage, checkpoint: &Checkpoint<'_>) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.artifact_dir)?;
        let path = self.artifact_dir.join(artifact_file_name(
            checkpoint.step,
            checkpoint.phone,
            &Local::now().format("%Y%m%d_%H%M%S").to_string(),
        ));
        captured.save(&path)?;
        Ok(path)
    }
}

fn artifact_file_name(step: &str, phone: &str, timestamp: &str) -> String {
    format!("{step}_{phone}_{timestamp}.png")
}
