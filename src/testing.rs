//! In-memory stand-ins for the display, the input devices and the workbook.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow, bail};
use image::{Rgba, RgbaImage};

use crate::contacts::{Cell, ContactBook, ContactSheet, SheetError};
use crate::desktop::Desktop;
use crate::sampler::{ScreenRegion, ScreenSource};

/// Serves scripted frames, ignoring the requested region. The last frame
/// repeats once the script is exhausted.
pub struct FakeScreen {
    frames: Mutex<VecDeque<Result<RgbaImage, String>>>,
    captures: AtomicUsize,
}

impl FakeScreen {
    pub fn solid(width: u32, height: u32, pixel: Rgba<u8>) -> Self {
        Self::sequence(vec![Ok(RgbaImage::from_pixel(width, height, pixel))])
    }

    pub fn sequence(frames: Vec<Result<RgbaImage>>) -> Self {
        FakeScreen {
            frames: Mutex::new(frames.into_iter().map(|f| f.map_err(|e| format!("{e:#}"))).collect()),
            captures: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self::sequence(vec![Err(anyhow!(message.to_string()))])
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl ScreenSource for FakeScreen {
    fn capture(&self, _region: ScreenRegion) -> Result<RgbaImage> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let mut frames = self.frames.lock().map_err(|_| anyhow!("frame script poisoned"))?;
        let frame = if frames.len() > 1 {
            frames.pop_front()
        } else {
            frames.front().cloned()
        };
        match frame {
            Some(Ok(image)) => Ok(image),
            Some(Err(message)) => Err(anyhow!(message)),
            None => bail!("no frames scripted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Click(i32, i32),
    Clipboard(String),
    Paste,
    Enter,
}

type ClickHook = Box<dyn FnMut()>;

/// Records input instead of sending it. Clicks are counted from 1.
#[derive(Default)]
pub struct FakeDesktop {
    actions: Vec<Action>,
    clicks: usize,
    fail_on_click: Option<usize>,
    hooks: Vec<(usize, ClickHook)>,
}

impl FakeDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on_click(click: usize) -> Self {
        FakeDesktop {
            fail_on_click: Some(click),
            ..Self::default()
        }
    }

    /// Run `hook` right after the `click`-th click lands.
    pub fn on_click(mut self, click: usize, hook: impl FnMut() + 'static) -> Self {
        self.hooks.push((click, Box::new(hook)));
        self
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn clicks(&self) -> usize {
        self.actions.iter().filter(|a| matches!(a, Action::Click(..))).count()
    }
}

impl Desktop for FakeDesktop {
    fn click(&mut self, x: i32, y: i32) -> Result<()> {
        self.clicks += 1;
        if self.fail_on_click == Some(self.clicks) {
            bail!("input device unavailable");
        }
        self.actions.push(Action::Click(x, y));
        let clicks = self.clicks;
        for (at, hook) in &mut self.hooks {
            if *at == clicks {
                hook();
            }
        }
        Ok(())
    }

    fn set_clipboard(&mut self, text: &str) -> Result<()> {
        self.actions.push(Action::Clipboard(text.to_string()));
        Ok(())
    }

    fn paste(&mut self) -> Result<()> {
        self.actions.push(Action::Paste);
        Ok(())
    }

    fn press_enter(&mut self) -> Result<()> {
        self.actions.push(Action::Enter);
        Ok(())
    }
}

/// Serves a fixed sheet and keeps every saved copy.
pub struct MemoryBook {
    sheet: ContactSheet,
    saved: Vec<ContactSheet>,
    attempts: usize,
    fail_on_save: Option<usize>,
}

impl MemoryBook {
    pub fn new(sheet: ContactSheet) -> Self {
        MemoryBook {
            sheet,
            saved: Vec::new(),
            attempts: 0,
            fail_on_save: None,
        }
    }

    /// The `save`-th save (counted from 1) fails as if the file were locked.
    pub fn failing_on_save(sheet: ContactSheet, save: usize) -> Self {
        MemoryBook {
            fail_on_save: Some(save),
            ..Self::new(sheet)
        }
    }

    pub fn saves(&self) -> usize {
        self.saved.len()
    }

    pub fn last_saved(&self) -> Option<&ContactSheet> {
        self.saved.last()
    }
}

impl ContactBook for MemoryBook {
    fn load(&self) -> Result<ContactSheet, SheetError> {
        Ok(self.sheet.clone())
    }

    fn save(&mut self, sheet: &ContactSheet) -> Result<(), SheetError> {
        self.attempts += 1;
        if self.fail_on_save == Some(self.attempts) {
            return Err(SheetError::Io {
                path: PathBuf::from("phone.xlsx"),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "file is locked"),
            });
        }
        self.saved.push(sheet.clone());
        Ok(())
    }
}

/// `name | phone | status` sheet from `(phone, status)` pairs.
pub fn contact_sheet(rows: &[(&str, &str)]) -> ContactSheet {
    let headers = vec!["name".to_string(), "phone".to_string(), "status".to_string()];
    let rows = rows
        .iter()
        .enumerate()
        .map(|(i, (phone, status))| {
            let status = if status.is_empty() {
                Cell::Empty
            } else {
                Cell::Text(status.to_string())
            };
            vec![Cell::Text(format!("contact {i}")), Cell::Text(phone.to_string()), status]
        })
        .collect();
    ContactSheet::new(headers, rows, "phone", "status").unwrap()
}
