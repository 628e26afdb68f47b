use beckon::locate;
use beckon::matcher::DEFAULT_THRESHOLD;
use beckon::similarity;

/// Positions closer than this to a better match are reported once.
const MIN_DISTANCE: u32 = 20;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: template_scores <template.png> <screenshot.png> [screenshot2.png ...]");
        std::process::exit(1);
    }

    let template_path = &args[1];
    let template = image::open(template_path).unwrap_or_else(|e| {
        eprintln!("Failed to load template {template_path}: {e}");
        std::process::exit(1);
    });
    println!(
        "Template: {} ({}x{})",
        template_path,
        template.width(),
        template.height()
    );
    println!("Threshold: {DEFAULT_THRESHOLD:.2}");
    println!();

    for screenshot_path in &args[2..] {
        let screenshot = match image::open(screenshot_path) {
            Ok(img) => img,
            Err(e) => {
                eprintln!("Failed to load {screenshot_path}: {e}");
                continue;
            }
        };

        let Some(best) = locate::find_best_match(&screenshot, &template) else {
            println!("{screenshot_path}: template does not fit");
            continue;
        };

        // score the located region the same way a run would
        let left = best.x.saturating_sub(template.width() / 2);
        let top = best.y.saturating_sub(template.height() / 2);
        let region = screenshot.crop_imm(left, top, template.width(), template.height());
        let verdict = match similarity::compare_images(&region, &template) {
            Some(s) if s.score >= DEFAULT_THRESHOLD => format!("MATCH similarity={:.4}", s.score),
            Some(s) => format!("no match similarity={:.4}", s.score),
            None => "region cut off at screenshot edge".to_string(),
        };

        let candidates = locate::find_matches(&screenshot, &template, best.score * 0.98, MIN_DISTANCE);
        println!(
            "{screenshot_path}: {verdict} correlation={:.4} center=({}, {}) similar_spots={}",
            best.score,
            best.x,
            best.y,
            candidates.len()
        );
    }
}
