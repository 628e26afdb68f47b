//! Finding a template anywhere in a full screenshot.
//!
//! The run itself only ever compares fixed regions; this is for diagnosing
//! coordinates that went stale after the target window moved.

use image::{DynamicImage, GrayImage, Luma, RgbImage};
use imageproc::template_matching::{MatchTemplateMethod, match_template};

/// Best-scoring template position, as the centre of the matched area in
/// screenshot pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Located {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

fn split_channels(rgb: &RgbImage) -> [GrayImage; 3] {
    let (w, h) = rgb.dimensions();
    let mut channels = [GrayImage::new(w, h), GrayImage::new(w, h), GrayImage::new(w, h)];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for (ch, plane) in channels.iter_mut().enumerate() {
            plane.put_pixel(x, y, Luma([pixel[ch]]));
        }
    }
    channels
}

/// Per-position score: normalised cross-correlation of each RGB channel, the
/// weakest channel winning. Returns one score map per valid offset.
fn score_map(screenshot: &RgbImage, template: &RgbImage) -> Option<(u32, u32, Vec<f32>)> {
    let (sw, sh) = screenshot.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > sw || th > sh {
        return None;
    }

    let screen_channels = split_channels(screenshot);
    let template_channels = split_channels(template);
    let results: Vec<_> = (0..3)
        .map(|ch| {
            match_template(
                &screen_channels[ch],
                &template_channels[ch],
                MatchTemplateMethod::CrossCorrelationNormalized,
            )
        })
        .collect();

    let (w, h) = results[0].dimensions();
    let mut scores = Vec::with_capacity((w * h) as usize);
    for y in 0..h {
        for x in 0..w {
            let score = results
                .iter()
                .map(|r| r.get_pixel(x, y).0[0])
                .fold(f32::INFINITY, f32::min);
            // flat patches divide by zero
            scores.push(if score.is_finite() { score } else { 0.0 });
        }
    }
    Some((w, h, scores))
}

/// Where `template` best matches inside `screenshot`, or `None` if the
/// template does not fit.
pub fn find_best_match(screenshot: &DynamicImage, template: &DynamicImage) -> Option<Located> {
    let template = template.to_rgb8();
    let (w, _, scores) = score_map(&screenshot.to_rgb8(), &template)?;

    let (index, score) = scores
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    let index = index as u32;
    Some(Located {
        x: index % w + template.width() / 2,
        y: index / w + template.height() / 2,
        score,
    })
}

/// Every position scoring at least `threshold`, best first, with matches
/// closer than `min_distance` to a better one dropped.
pub fn find_matches(screenshot: &DynamicImage, template: &DynamicImage, threshold: f32, min_distance: u32) -> Vec<Located> {
    let template = template.to_rgb8();
    let Some((w, _, scores)) = score_map(&screenshot.to_rgb8(), &template) else {
        return Vec::new();
    };

    let mut candidates: Vec<Located> = scores
        .iter()
        .enumerate()
        .filter(|(_, score)| **score >= threshold)
        .map(|(index, &score)| {
            let index = index as u32;
            Located {
                x: index % w + template.width() / 2,
                y: index / w + template.height() / 2,
                score,
            }
        })
        .collect();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Located> = Vec::new();
    for candidate in candidates {
        let crowded = kept
            .iter()
            .any(|k| k.x.abs_diff(candidate.x) < min_distance && k.y.abs_diff(candidate.y) < min_distance);
        if !crowded {
            kept.push(candidate);
        }
    }
    kept
}
