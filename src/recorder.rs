//! Interactive recording of click targets.
//!
//! Hold CapsLock and left-click a UI element to record it as the next step;
//! the 80×50 region around the click is saved as that step's template.
//! Ctrl+C or Escape ends the session, as does reaching the step limit.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rdev::{EventType, Key};

use crate::coordinates::{CoordinateRecord, CoordinateStore, step_name};
use crate::hotkeys::{KeyState, is_left_click};
use crate::sampler::{ScreenRegion, ScreenSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderSignal {
    /// Record the point under the pointer.
    Capture { x: i32, y: i32 },
    Finish,
}

/// Turns raw input events into recording signals. One capture per CapsLock
/// hold: release CapsLock before recording the next point.
#[derive(Debug, Default)]
pub struct RecordingSession {
    keys: KeyState,
    captured_this_hold: bool,
}

impl RecordingSession {
    pub fn feed(&mut self, event: &EventType) -> Option<RecorderSignal> {
        self.keys.update(event);
        match event {
            EventType::KeyRelease(Key::CapsLock) => {
                self.captured_this_hold = false;
                None
            }
            EventType::KeyPress(Key::Escape) => Some(RecorderSignal::Finish),
            EventType::KeyPress(Key::KeyC) if self.keys.ctrl => Some(RecorderSignal::Finish),
            ev if is_left_click(ev) && self.keys.caps_lock && !self.captured_this_hold => {
                let Some((x, y)) = self.keys.pointer_position() else {
                    tracing::warn!("pointer position not known yet, move the mouse and click again");
                    return None;
                };
                self.captured_this_hold = true;
                Some(RecorderSignal::Capture { x, y })
            }
            _ => None,
        }
    }
}

pub struct Recorder<S> {
    screen: S,
    templates_dir: PathBuf,
}

impl<S: ScreenSource> Recorder<S> {
    pub fn new(screen: S, templates_dir: impl Into<PathBuf>) -> Self {
        Recorder {
            screen,
            templates_dir: templates_dir.into(),
        }
    }

    pub fn template_path(&self, index: usize) -> PathBuf {
        self.templates_dir.join(format!("{}_template.png", step_name(index)))
    }

    /// Save the region around `(x, y)` as the template for step `index`.
    pub fn capture_template(&self, x: i32, y: i32, index: usize) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.templates_dir)
            .with_context(|| format!("failed to create {}", self.templates_dir.display()))?;
        let image = self.screen.capture(ScreenRegion::around(x, y))?;
        let path = self.template_path(index);
        image
            .save(&path)
            .with_context(|| format!("failed to save template {}", path.display()))?;
        tracing::info!("saved template {}", path.display());
        Ok(path)
    }

    /// Consume events until Finish, the step limit, or the end of the stream.
    pub fn record<I>(&self, events: I, limit: Option<usize>) -> CoordinateStore
    where
        I: IntoIterator<Item = EventType>,
    {
        let mut store = CoordinateStore::default();
        let mut session = RecordingSession::default();

        tracing::info!(
            "recording started, limit: {}",
            limit.map_or_else(|| "none".to_string(), |n| n.to_string())
        );

        for event in events {
            if limit.is_some_and(|n| store.len() >= n) {
                break;
            }
            match session.feed(&event) {
                Some(RecorderSignal::Capture { x, y }) => {
                    let index = store.len();
                    // a failed capture still records the point; the run later
                    // reports the missing template as a configuration error
                    let template_path = self.capture_template(x, y, index).unwrap_or_else(|e| {
                        tracing::error!("failed to capture template for {}: {e:#}", step_name(index));
                        PathBuf::new()
                    });
                    tracing::info!("recorded {} at ({x}, {y})", step_name(index));
                    store.push(CoordinateRecord {
                        step_name: step_name(index),
                        x,
                        y,
                        template_path,
                    });
                    if limit.is_some_and(|n| store.len() >= n) {
                        tracing::info!("reached {} step(s)", store.len());
                        break;
                    }
                }
                Some(RecorderSignal::Finish) => break,
                None => {}
            }
        }

        if store.is_empty() {
            tracing::warn!("no coordinates recorded");
        } else {
            tracing::info!("recording finished with {} step(s)", store.len());
        }
        store
    }
}

/// Record and, if anything was captured, write the coordinate file.
pub fn record_to_file<S, I>(recorder: &Recorder<S>, events: I, limit: Option<usize>, path: &Path) -> Result<CoordinateStore>
where
    S: ScreenSource,
    I: IntoIterator<Item = EventType>,
{
    let store = recorder.record(events, limit);
    if !store.is_empty() {
        store.save(path)?;
    }
    Ok(store)
}
