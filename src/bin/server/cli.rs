//! CLI mode for one-shot label recognition.

use crate::config::PipelineConfig;
use crate::ocr::{download_image, load_image_from_path, OcrEngine, OcrError};
use label_ocr::labelocr::PipelineResult;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Recognize a single label image from a local path or an HTTP(S) URL.
pub async fn run_once(
    source: &str,
    config: &PipelineConfig,
    output_format: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();

    let image = if source.starts_with("http://") || source.starts_with("https://") {
        info!("Downloading image from URL...");
        let image = download_image(source).await?;
        info!("Downloaded in {:.2}ms", start.elapsed().as_secs_f64() * 1000.0);
        image
    } else {
        info!("Loading image from file...");
        let image = load_image_from_path(Path::new(source))?;
        info!("Loaded in {:.2}ms", start.elapsed().as_secs_f64() * 1000.0);
        image
    };
    let load_time = start.elapsed();

    info!("Initializing recognition engine...");
    let engine = OcrEngine::new(config)?;
    let init_time = start.elapsed() - load_time;
    info!("Engine initialized in {:.2}ms", init_time.as_secs_f64() * 1000.0);

    info!("Processing image ({}x{})...", image.width(), image.height());
    let result = engine.process(&image);
    info!(
        "Recognition completed in {:.2}ms",
        result.elapsed.as_secs_f64() * 1000.0
    );

    output_result(&result, image.width(), image.height(), output_format)?;

    Ok(())
}

/// Print the pipeline result in the requested format.
fn output_result(
    result: &PipelineResult,
    width: u32,
    height: u32,
    format: &str,
) -> Result<(), OcrError> {
    match format {
        "json" => {
            let response = OcrEngine::result_to_response(result, width, height);
            println!("{}", serde_json::to_string(&response).unwrap());
        }
        "text" => {
            println!("{}", result.text);
        }
        "pretty" | _ => {
            println!("\n=== Label OCR Results ===");
            println!("Image size: {}x{}", width, height);
            println!(
                "Processing time: {:.2}ms",
                result.elapsed.as_secs_f64() * 1000.0
            );
            println!("Text regions: {}", result.regions.len());
            println!();

            if result.regions.is_empty() {
                println!("No text detected.");
            } else {
                println!("--- Detected Regions ---");
                for (idx, region) in result.regions.iter().enumerate() {
                    println!(
                        "[{}] \"{}\" ({:.1}%)",
                        idx + 1,
                        region.text,
                        region.confidence * 100.0
                    );
                    println!(
                        "    Position: [{:.1}, {:.1}] - [{:.1}, {:.1}]",
                        region.quad.points[0].x,
                        region.quad.points[0].y,
                        region.quad.points[2].x,
                        region.quad.points[2].y
                    );
                }
                println!();
                println!("--- Combined Text ---");
                println!("{}", result.text);
                println!("Overall confidence: {:.1}%", result.confidence * 100.0);
            }
        }
    }

    Ok(())
}
