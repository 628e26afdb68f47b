//! Global keyboard/mouse listener and the pause/stop hotkeys.
//!
//! `rdev::listen` never returns and may only be started once per process, so
//! one [`InputHub`] owns the listener thread and fans events out to
//! [`Subscription`]s. Dropping a subscription detaches it from the hub.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use rdev::{Button, EventType, Key};

/// Run-state shared between the automation loop and the hotkey thread.
/// The loop is the only reader; hotkeys are the only writers once a run
/// has started.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Flip pause; returns the new paused state.
    pub fn toggle_pause(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

type Subscribers = Arc<Mutex<Vec<(u64, Sender<EventType>)>>>;

pub struct InputHub {
    subscribers: Subscribers,
    next_id: AtomicU64,
}

impl InputHub {
    /// Spawn the process-wide listener thread.
    pub fn start() -> Result<Arc<InputHub>> {
        let hub = Arc::new(InputHub {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        });

        let subscribers = hub.subscribers.clone();
        thread::Builder::new()
            .name("input-listener".into())
            .spawn(move || {
                let result = rdev::listen(move |event| {
                    if let Ok(mut subs) = subscribers.lock() {
                        subs.retain(|(_, tx)| tx.send(event.event_type).is_ok());
                    }
                });
                if let Err(e) = result {
                    tracing::error!("global input listener failed: {e:?}");
                }
            })
            .context("failed to spawn input listener thread")?;

        Ok(hub)
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push((id, tx));
        }
        Subscription {
            id,
            receiver: rx,
            subscribers: self.subscribers.clone(),
        }
    }
}

pub struct Subscription {
    id: u64,
    receiver: Receiver<EventType>,
    subscribers: Subscribers,
}

impl Subscription {
    pub fn recv_timeout(&self, timeout: Duration) -> Result<EventType, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Blocking iterator over incoming events.
    pub fn events(&self) -> impl Iterator<Item = EventType> + '_ {
        self.receiver.iter()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Modifier and pointer state reconstructed from raw events.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyState {
    pub ctrl: bool,
    pub caps_lock: bool,
    /// Last pointer position seen; unknown until the first move event.
    pub pointer: Option<(f64, f64)>,
}

impl KeyState {
    pub fn update(&mut self, event: &EventType) {
        match event {
            EventType::KeyPress(Key::ControlLeft | Key::ControlRight) => self.ctrl = true,
            EventType::KeyRelease(Key::ControlLeft | Key::ControlRight) => self.ctrl = false,
            EventType::KeyPress(Key::CapsLock) => self.caps_lock = true,
            EventType::KeyRelease(Key::CapsLock) => self.caps_lock = false,
            EventType::MouseMove { x, y } => self.pointer = Some((*x, *y)),
            _ => {}
        }
    }

    pub fn pointer_position(&self) -> Option<(i32, i32)> {
        self.pointer.map(|(x, y)| (x.round() as i32, y.round() as i32))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hotkey {
    /// Ctrl+F1
    TogglePause,
    /// Ctrl+F2
    Stop,
}

/// Feeds events through a [`KeyState`] and reports completed hotkey chords.
#[derive(Debug, Default)]
pub struct HotkeyDetector {
    keys: KeyState,
}

impl HotkeyDetector {
    pub fn feed(&mut self, event: &EventType) -> Option<Hotkey> {
        self.keys.update(event);
        match event {
            EventType::KeyPress(Key::F1) if self.keys.ctrl => Some(Hotkey::TogglePause),
            EventType::KeyPress(Key::F2) if self.keys.ctrl => Some(Hotkey::Stop),
            _ => None,
        }
    }
}

pub fn apply(hotkey: Hotkey, control: &RunControl) {
    match hotkey {
        Hotkey::TogglePause => {
            if control.toggle_pause() {
                tracing::info!("paused (Ctrl+F1 to resume)");
            } else {
                tracing::info!("resumed");
            }
        }
        Hotkey::Stop => {
            tracing::info!("stop requested, finishing current row");
            control.stop();
        }
    }
}

const RELEASE_POLL: Duration = Duration::from_millis(100);

/// Keeps the pause/stop hotkeys active until dropped.
pub struct HotkeyGuard {
    released: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

pub fn register(hub: &InputHub, control: RunControl) -> Result<HotkeyGuard> {
    let subscription = hub.subscribe();
    let released = Arc::new(AtomicBool::new(false));
    let thread_released = released.clone();

    let handle = thread::Builder::new()
        .name("hotkeys".into())
        .spawn(move || {
            let mut detector = HotkeyDetector::default();
            loop {
                match subscription.recv_timeout(RELEASE_POLL) {
                    Ok(event) => {
                        if let Some(hotkey) = detector.feed(&event) {
                            apply(hotkey, &control);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                if thread_released.load(Ordering::SeqCst) {
                    break;
                }
            }
        })
        .context("failed to spawn hotkey thread")?;

    tracing::info!("hotkeys active: Ctrl+F1 pause/resume, Ctrl+F2 stop");
    Ok(HotkeyGuard {
        released,
        handle: Some(handle),
    })
}

impl Drop for HotkeyGuard {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("hotkey thread panicked");
        }
        tracing::info!("hotkeys released");
    }
}

/// Left button press, as used by the recorder.
pub fn is_left_click(event: &EventType) -> bool {
    matches!(event, EventType::ButtonPress(Button::Left))
}
