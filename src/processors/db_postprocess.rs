//! DB probability-map postprocessing.
//!
//! Turns the detector's probability map into scored quadrilaterals:
//! binarize at `thresh`, walk connected components, fit a minimum-area
//! rectangle per component, score it over the map, drop weak or tiny boxes,
//! expand the survivors by the unclip formula, and scale everything back to
//! source-image coordinates.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::processors::geometry::{BoundingBox, Point, Quadrilateral, ScanlineBuffer};

fn default_thresh() -> f32 {
    0.1
}

fn default_box_thresh() -> f32 {
    0.3
}

fn default_unclip_ratio() -> f32 {
    2.0
}

fn default_max_candidates() -> usize {
    1000
}

/// Tuning knobs for the DB postprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbPostProcessConfig {
    /// Binarization threshold applied to the probability map.
    #[serde(default = "default_thresh")]
    pub thresh: f32,
    /// Minimum mean score inside a box for it to survive.
    #[serde(default = "default_box_thresh")]
    pub box_thresh: f32,
    /// Expansion factor: offset distance is `area * ratio / perimeter`.
    #[serde(default = "default_unclip_ratio")]
    pub unclip_ratio: f32,
    /// Upper bound on components considered per map.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

impl Default for DbPostProcessConfig {
    fn default() -> Self {
        Self {
            thresh: default_thresh(),
            box_thresh: default_box_thresh(),
            unclip_ratio: default_unclip_ratio(),
            max_candidates: default_max_candidates(),
        }
    }
}

impl DbPostProcessConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the binarization threshold.
    pub fn with_thresh(mut self, thresh: f32) -> Self {
        self.thresh = thresh;
        self
    }

    /// Sets the minimum box score.
    pub fn with_box_thresh(mut self, box_thresh: f32) -> Self {
        self.box_thresh = box_thresh;
        self
    }

    /// Sets the unclip expansion ratio.
    pub fn with_unclip_ratio(mut self, unclip_ratio: f32) -> Self {
        self.unclip_ratio = unclip_ratio;
        self
    }
}

/// Extracts scored quadrilaterals from a DB probability map.
#[derive(Debug, Clone)]
pub struct DbPostProcess {
    config: DbPostProcessConfig,
    /// Boxes whose short side falls below this are noise.
    min_size: f32,
}

impl DbPostProcess {
    /// Creates a postprocessor with the given config.
    pub fn new(config: DbPostProcessConfig) -> Self {
        Self {
            config,
            min_size: 3.0,
        }
    }

    /// Runs the postprocess over one probability map.
    ///
    /// `src_width`/`src_height` are the dimensions of the original image; the
    /// returned quads live in that coordinate space. Quads come out in
    /// component-scan order (roughly top-to-bottom).
    pub fn extract_quads(
        &self,
        prob_map: &ArrayView2<f32>,
        src_width: u32,
        src_height: u32,
    ) -> Vec<(Quadrilateral, f32)> {
        let map_height = prob_map.shape()[0];
        let map_width = prob_map.shape()[1];
        if map_height == 0 || map_width == 0 {
            return Vec::new();
        }

        let bitmap: Vec<bool> = prob_map.iter().map(|&p| p > self.config.thresh).collect();
        let components = connected_components(
            &bitmap,
            map_width,
            map_height,
            self.config.max_candidates,
        );

        let scale_x = src_width as f32 / map_width as f32;
        let scale_y = src_height as f32 / map_height as f32;

        let mut quads = Vec::new();
        for component in components {
            let rect = BoundingBox::new(component).min_area_rect();
            if rect.min_side() < self.min_size {
                continue;
            }

            let quad = rect.to_quad();
            let score = polygon_mean_score(prob_map, &BoundingBox::new(quad.points.to_vec()));
            if score < self.config.box_thresh {
                continue;
            }

            // Offsetting a rectangle outward by d grows each side by 2d.
            let polygon = BoundingBox::new(quad.points.to_vec());
            let distance = polygon.area() * self.config.unclip_ratio / polygon.perimeter();
            let mut expanded = rect;
            expanded.width += 2.0 * distance;
            expanded.height += 2.0 * distance;
            if expanded.min_side() < self.min_size {
                continue;
            }

            let quad = expanded
                .to_quad()
                .clamp((map_width - 1) as f32, (map_height - 1) as f32)
                .scale(scale_x, scale_y)
                .clamp((src_width.saturating_sub(1)) as f32, (src_height.saturating_sub(1)) as f32);
            quads.push((quad, score));
        }

        quads
    }
}

/// Collects connected components of set pixels with a 4-connected stack walk.
fn connected_components(
    bitmap: &[bool],
    width: usize,
    height: usize,
    max_components: usize,
) -> Vec<Vec<Point>> {
    let mut visited = vec![false; bitmap.len()];
    let mut components = Vec::new();
    let mut stack = Vec::new();

    for start in 0..bitmap.len() {
        if !bitmap[start] || visited[start] {
            continue;
        }
        if components.len() >= max_components {
            break;
        }

        let mut pixels = Vec::new();
        visited[start] = true;
        stack.push(start);

        while let Some(idx) = stack.pop() {
            let x = idx % width;
            let y = idx / width;
            pixels.push(Point::new(x as f32, y as f32));

            if x > 0 && bitmap[idx - 1] && !visited[idx - 1] {
                visited[idx - 1] = true;
                stack.push(idx - 1);
            }
            if x + 1 < width && bitmap[idx + 1] && !visited[idx + 1] {
                visited[idx + 1] = true;
                stack.push(idx + 1);
            }
            if y > 0 && bitmap[idx - width] && !visited[idx - width] {
                visited[idx - width] = true;
                stack.push(idx - width);
            }
            if y + 1 < height && bitmap[idx + width] && !visited[idx + width] {
                visited[idx + width] = true;
                stack.push(idx + width);
            }
        }

        components.push(pixels);
    }

    components
}

/// Mean probability inside a polygon, scanline by scanline.
fn polygon_mean_score(pred: &ArrayView2<f32>, polygon: &BoundingBox) -> f32 {
    let map_height = pred.shape()[0];
    let map_width = pred.shape()[1];

    let y_start = polygon.y_min().floor().max(0.0) as usize;
    let y_end = (polygon.y_max().ceil() as usize).min(map_height.saturating_sub(1));
    if y_start > y_end {
        return 0.0;
    }

    let mut buffer = ScanlineBuffer::new(polygon.points.len() + 1);
    let mut total = 0.0;
    let mut pixels = 0usize;
    for y in y_start..=y_end {
        let (line_score, line_pixels) =
            buffer.process_scanline(y as f32, polygon, 0, map_width, pred);
        total += line_score;
        pixels += line_pixels;
    }

    if pixels == 0 {
        0.0
    } else {
        total / pixels as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn map_with_block(
        height: usize,
        width: usize,
        y0: usize,
        y1: usize,
        x0: usize,
        x1: usize,
        value: f32,
    ) -> Array2<f32> {
        let mut map = Array2::<f32>::zeros((height, width));
        for y in y0..y1 {
            for x in x0..x1 {
                map[[y, x]] = value;
            }
        }
        map
    }

    #[test]
    fn test_extract_quads_finds_strong_block() {
        let map = map_with_block(40, 40, 10, 20, 5, 25, 0.9);
        let post = DbPostProcess::new(DbPostProcessConfig::default());

        let quads = post.extract_quads(&map.view(), 40, 40);
        assert_eq!(quads.len(), 1);

        let (quad, score) = &quads[0];
        assert!((score - 0.9).abs() < 0.05, "score: {score}");
        // Expanded box still centers on the block.
        let center = quad.center();
        assert!((center.x - 14.5).abs() < 2.0, "center.x: {}", center.x);
        assert!((center.y - 14.5).abs() < 2.0, "center.y: {}", center.y);
    }

    #[test]
    fn test_extract_quads_drops_weak_block() {
        // Above the binarization threshold but below the box score threshold.
        let map = map_with_block(40, 40, 10, 20, 5, 25, 0.15);
        let post = DbPostProcess::new(DbPostProcessConfig::default());
        assert!(post.extract_quads(&map.view(), 40, 40).is_empty());
    }

    #[test]
    fn test_extract_quads_drops_tiny_component() {
        let map = map_with_block(40, 40, 10, 12, 5, 7, 0.9);
        let post = DbPostProcess::new(DbPostProcessConfig::default());
        assert!(post.extract_quads(&map.view(), 40, 40).is_empty());
    }

    #[test]
    fn test_extract_quads_empty_map() {
        let map = Array2::<f32>::zeros((32, 32));
        let post = DbPostProcess::new(DbPostProcessConfig::default());
        assert!(post.extract_quads(&map.view(), 32, 32).is_empty());
    }

    #[test]
    fn test_extract_quads_scales_to_source() {
        let map = map_with_block(40, 40, 10, 20, 5, 25, 0.9);
        let post = DbPostProcess::new(DbPostProcessConfig::default());

        let quads = post.extract_quads(&map.view(), 80, 80);
        assert_eq!(quads.len(), 1);
        let center = quads[0].0.center();
        assert!((center.x - 29.0).abs() < 4.0, "center.x: {}", center.x);
        assert!((center.y - 29.0).abs() < 4.0, "center.y: {}", center.y);
    }

    #[test]
    fn test_extract_quads_separates_two_blocks() {
        let mut map = map_with_block(60, 60, 5, 15, 5, 40, 0.9);
        for y in 30..42 {
            for x in 10..50 {
                map[[y, x]] = 0.85;
            }
        }
        let post = DbPostProcess::new(DbPostProcessConfig::default());
        let quads = post.extract_quads(&map.view(), 60, 60);
        assert_eq!(quads.len(), 2);
        // Component scan order puts the upper block first.
        assert!(quads[0].0.center().y < quads[1].0.center().y);
    }

    #[test]
    fn test_connected_components_walks_l_shape() {
        let width = 5;
        let height = 5;
        let mut bitmap = vec![false; width * height];
        for x in 0..4 {
            bitmap[2 * width + x] = true;
        }
        for y in 2..5 {
            bitmap[y * width + 3] = true;
        }

        let components = connected_components(&bitmap, width, height, 10);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].len(), 6);
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: DbPostProcessConfig = serde_json::from_str("{}").unwrap();
        assert!((config.thresh - 0.1).abs() < 1e-6);
        assert!((config.box_thresh - 0.3).abs() < 1e-6);
        assert!((config.unclip_ratio - 2.0).abs() < 1e-6);
        assert_eq!(config.max_candidates, 1000);
    }
}
