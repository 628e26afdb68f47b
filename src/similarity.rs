use image::{DynamicImage, RgbImage};

/// Per-channel weights (R, G, B). Green carries most of the luminance detail
/// in UI chrome, so it counts for more.
const CHANNEL_WEIGHTS: [f64; 3] = [0.3, 0.4, 0.3];

/// The image is split into a GRID × GRID set of regions; the worst region
/// dominates the final score.
const GRID: u32 = 4;

const GLOBAL_WEIGHT: f64 = 0.4;
const REGIONAL_WEIGHT: f64 = 0.6;

/// Score breakdown for one comparison. All values are in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    /// Weighted channel similarity over the whole image.
    pub global: f64,
    /// Lowest weighted similarity among the grid regions.
    pub worst_region: f64,
    /// `0.4 * global + 0.6 * worst_region`.
    pub score: f64,
}

/// Compare two images of identical size. Returns `None` when the dimensions
/// differ or the images are empty.
pub fn compare(a: &RgbImage, b: &RgbImage) -> Option<Similarity> {
    if a.dimensions() != b.dimensions() {
        return None;
    }
    let (w, h) = a.dimensions();

    let global_loss = weighted_loss(a, b, (0, 0), (w, h))?;

    let worst_loss = (0..GRID)
        .flat_map(|row| (0..GRID).map(move |col| (row, col)))
        .filter_map(|(row, col)| {
            let (y0, y1) = cell_bounds(h, row);
            let (x0, x1) = cell_bounds(w, col);
            weighted_loss(a, b, (x0, y0), (x1, y1))
        })
        .fold(0.0_f64, f64::max);

    // 1 - loss keeps identical images at exactly 1.0
    let score = 1.0 - (GLOBAL_WEIGHT * global_loss + REGIONAL_WEIGHT * worst_loss);

    Some(Similarity {
        global: (1.0 - global_loss).clamp(0.0, 1.0),
        worst_region: (1.0 - worst_loss).clamp(0.0, 1.0),
        score: score.clamp(0.0, 1.0),
    })
}

/// Convenience wrapper converting both images to RGB first.
pub fn compare_images(a: &DynamicImage, b: &DynamicImage) -> Option<Similarity> {
    compare(&a.to_rgb8(), &b.to_rgb8())
}

/// Half-open span of grid cell `index` along an axis of length `len`.
/// The last cell absorbs the remainder.
fn cell_bounds(len: u32, index: u32) -> (u32, u32) {
    let step = len / GRID;
    let start = index * step;
    let end = if index + 1 < GRID { start + step } else { len };
    (start, end)
}

/// Weighted mean absolute difference over `[from, to)`, normalised to
/// `[0, 1]`. `None` for an empty rectangle.
fn weighted_loss(a: &RgbImage, b: &RgbImage, from: (u32, u32), to: (u32, u32)) -> Option<f64> {
    let count = u64::from(to.0 - from.0) * u64::from(to.1 - from.1);
    if count == 0 {
        return None;
    }

    let mut sums = [0u64; 3];
    for y in from.1..to.1 {
        for x in from.0..to.0 {
            let pa = a.get_pixel(x, y);
            let pb = b.get_pixel(x, y);
            for (ch, sum) in sums.iter_mut().enumerate() {
                *sum += u64::from(pa[ch].abs_diff(pb[ch]));
            }
        }
    }

    let denom = count as f64 * 255.0;
    Some(
        CHANNEL_WEIGHTS
            .iter()
            .zip(sums)
            .map(|(weight, sum)| weight * sum as f64 / denom)
            .sum(),
    )
}
