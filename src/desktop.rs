use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use arboard::Clipboard;
use enigo::{Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};

/// Simulated user input against the desktop.
pub trait Desktop {
    fn click(&mut self, x: i32, y: i32) -> Result<()>;
    fn set_clipboard(&mut self, text: &str) -> Result<()>;
    /// Paste the clipboard into the focused field.
    fn paste(&mut self) -> Result<()>;
    fn press_enter(&mut self) -> Result<()>;
}

#[cfg(target_os = "macos")]
const PASTE_MODIFIER: Key = Key::Meta;
#[cfg(not(target_os = "macos"))]
const PASTE_MODIFIER: Key = Key::Control;

/// Gap between moving the pointer and pressing, so the target sees a hover
/// before the click.
const MOVE_SETTLE: Duration = Duration::from_millis(60);

/// OS-level input through `enigo`, clipboard through `arboard`.
pub struct EnigoDesktop {
    enigo: Enigo,
    clipboard: Clipboard,
}

impl EnigoDesktop {
    pub fn new() -> Result<Self> {
        Ok(EnigoDesktop {
            enigo: Enigo::new(&Settings::default()).context("failed to initialise input simulation")?,
            clipboard: Clipboard::new().context("failed to open clipboard")?,
        })
    }
}

impl Desktop for EnigoDesktop {
    fn click(&mut self, x: i32, y: i32) -> Result<()> {
        self.enigo.move_mouse(x, y, Coordinate::Abs)?;
        thread::sleep(MOVE_SETTLE);
        self.enigo.button(Button::Left, Direction::Click)?;
        tracing::debug!("clicked ({x}, {y})");
        Ok(())
    }

    fn set_clipboard(&mut self, text: &str) -> Result<()> {
        self.clipboard
            .set_text(text.to_owned())
            .context("failed to write clipboard")?;
        Ok(())
    }

    fn paste(&mut self) -> Result<()> {
        self.enigo.key(PASTE_MODIFIER, Direction::Press)?;
        let pasted = self.enigo.key(Key::Unicode('v'), Direction::Click);
        // release the modifier even when the key press failed
        self.enigo.key(PASTE_MODIFIER, Direction::Release)?;
        pasted?;
        Ok(())
    }

    fn press_enter(&mut self) -> Result<()> {
        self.enigo.key(Key::Return, Direction::Click)?;
        Ok(())
    }
}
