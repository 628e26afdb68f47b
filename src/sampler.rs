use anyhow::{Context, Result};
use image::RgbaImage;
use image::imageops;

/// Width of the region sampled around a click target.
pub const SAMPLE_WIDTH: u32 = 80;
/// Height of the region sampled around a click target.
pub const SAMPLE_HEIGHT: u32 = 50;

const ANCHOR_LEFT: i32 = 40;
const ANCHOR_UP: i32 = 25;

/// Screen rectangle in global (virtual desktop) pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenRegion {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl ScreenRegion {
    /// The fixed 80×50 sample around a click point: 40px to the left and 25px
    /// above, never starting at a negative offset.
    pub fn around(x: i32, y: i32) -> Self {
        ScreenRegion {
            left: (x - ANCHOR_LEFT).max(0),
            top: (y - ANCHOR_UP).max(0),
            width: SAMPLE_WIDTH,
            height: SAMPLE_HEIGHT,
        }
    }
}

/// Anything that can hand back the pixels currently shown in a screen region.
pub trait ScreenSource {
    fn capture(&self, region: ScreenRegion) -> Result<RgbaImage>;
}

impl<S: ScreenSource + ?Sized> ScreenSource for &S {
    fn capture(&self, region: ScreenRegion) -> Result<RgbaImage> {
        (**self).capture(region)
    }
}

/// Live display capture through `xcap`.
#[derive(Debug, Default, Clone, Copy)]
pub struct XcapScreen;

impl ScreenSource for XcapScreen {
    fn capture(&self, region: ScreenRegion) -> Result<RgbaImage> {
        let monitor = xcap::Monitor::from_point(region.left, region.top)
            .with_context(|| format!("no monitor contains ({}, {})", region.left, region.top))?;
        let origin_x = monitor.x()?;
        let origin_y = monitor.y()?;
        let full = monitor.capture_image().context("monitor capture failed")?;

        let local_x = (region.left - origin_x).max(0) as u32;
        let local_y = (region.top - origin_y).max(0) as u32;
        // crop_imm clamps to the monitor bounds, so edge regions come back short
        let cropped = imageops::crop_imm(&full, local_x, local_y, region.width, region.height).to_image();

        tracing::trace!(
            "captured {}x{} at ({}, {})",
            cropped.width(),
            cropped.height(),
            region.left,
            region.top
        );
        Ok(cropped)
    }
}
