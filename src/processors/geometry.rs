//! Geometric primitives for the label pipeline.
//!
//! Detected regions travel through the pipeline as [`Quadrilateral`]s whose
//! corners are classified into top-left, top-right, bottom-right, bottom-left
//! by the sum/difference rule. Free-form polygons from the detector
//! postprocess use [`BoundingBox`] together with convex hull and minimum-area
//! rectangle fitting.

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// A 2D point with floating-point coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point {
    /// X-coordinate of the point.
    pub x: f32,
    /// Y-coordinate of the point.
    pub y: f32,
}

impl Point {
    /// Creates a new point with the given coordinates.
    #[inline]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A four-corner region as emitted by the detector.
///
/// Corner order is arbitrary until [`ordered`](Self::ordered) is applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Quadrilateral {
    /// The four corners.
    pub points: [Point; 4],
}

impl Quadrilateral {
    /// Creates a quadrilateral from four corners in any order.
    pub fn new(points: [Point; 4]) -> Self {
        Self { points }
    }

    /// Builds an axis-aligned quadrilateral from two opposite corners.
    pub fn from_rect(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new([
            Point::new(x1, y1),
            Point::new(x2, y1),
            Point::new(x2, y2),
            Point::new(x1, y2),
        ])
    }

    /// Classifies the corners into (top-left, top-right, bottom-right,
    /// bottom-left) order.
    ///
    /// The corner with the minimal `x + y` is top-left and the maximal is
    /// bottom-right; of the remaining two, the larger `x − y` is top-right.
    /// Ties break on `y` then `x`, so the result depends only on the corner
    /// values, never on their input order.
    pub fn ordered(&self) -> Self {
        let p = &self.points;
        let sum_key = |p: &Point| (p.x + p.y, p.y, p.x);
        let diff_key = |p: &Point| (p.x - p.y, p.y, p.x);

        let mut tl = 0;
        let mut br = 0;
        for i in 1..4 {
            if sum_key(&p[i]) < sum_key(&p[tl]) {
                tl = i;
            }
            if sum_key(&p[i]) > sum_key(&p[br]) {
                br = i;
            }
        }
        // All four sums equal means the corners are collinear; any assignment
        // yields a degenerate quad downstream.
        if br == tl {
            br = (tl + 1) % 4;
        }

        let mut rest = [usize::MAX; 2];
        let mut k = 0;
        for i in 0..4 {
            if i != tl && i != br {
                rest[k] = i;
                k += 1;
            }
        }
        let (tr, bl) = if diff_key(&p[rest[0]]) >= diff_key(&p[rest[1]]) {
            (rest[0], rest[1])
        } else {
            (rest[1], rest[0])
        };

        Self::new([p[tl], p[tr], p[br], p[bl]])
    }

    /// Geometric center of the four corners.
    pub fn center(&self) -> Point {
        let sum_x: f32 = self.points.iter().map(|p| p.x).sum();
        let sum_y: f32 = self.points.iter().map(|p| p.y).sum();
        Point::new(sum_x / 4.0, sum_y / 4.0)
    }

    /// Scales all corners by independent x/y factors.
    pub fn scale(&self, fx: f32, fy: f32) -> Self {
        Self::new(self.points.map(|p| Point::new(p.x * fx, p.y * fy)))
    }

    /// Clamps all corners into `[0, max_x] × [0, max_y]`.
    pub fn clamp(&self, max_x: f32, max_y: f32) -> Self {
        Self::new(
            self.points
                .map(|p| Point::new(p.x.clamp(0.0, max_x), p.y.clamp(0.0, max_y))),
        )
    }

    /// Whether every coordinate is a finite number.
    pub fn is_finite(&self) -> bool {
        self.points.iter().all(|p| p.x.is_finite() && p.y.is_finite())
    }
}

/// A polygon represented by a collection of points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    /// The points that define the polygon.
    pub points: Vec<Point>,
}

impl BoundingBox {
    /// Creates a new polygon from a vector of points.
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Creates an axis-aligned rectangle from two opposite corners.
    pub fn from_coords(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(vec![
            Point::new(x1, y1),
            Point::new(x2, y1),
            Point::new(x2, y2),
            Point::new(x1, y2),
        ])
    }

    /// Area of the polygon by the shoelace formula.
    ///
    /// Returns 0.0 for polygons with fewer than 3 points.
    pub fn area(&self) -> f32 {
        if self.points.len() < 3 {
            return 0.0;
        }
        let n = self.points.len();
        let mut area = 0.0;
        for i in 0..n {
            let j = (i + 1) % n;
            area += self.points[i].x * self.points[j].y;
            area -= self.points[j].x * self.points[i].y;
        }
        area.abs() / 2.0
    }

    /// Perimeter of the polygon.
    pub fn perimeter(&self) -> f32 {
        let n = self.points.len();
        let mut perimeter = 0.0;
        for i in 0..n {
            let j = (i + 1) % n;
            let dx = self.points[j].x - self.points[i].x;
            let dy = self.points[j].y - self.points[i].y;
            perimeter += (dx * dx + dy * dy).sqrt();
        }
        perimeter
    }

    /// Minimum x-coordinate of all points, or 0.0 for an empty polygon.
    pub fn x_min(&self) -> f32 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points
            .iter()
            .map(|p| p.x)
            .fold(f32::INFINITY, f32::min)
    }

    /// Minimum y-coordinate of all points, or 0.0 for an empty polygon.
    pub fn y_min(&self) -> f32 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points
            .iter()
            .map(|p| p.y)
            .fold(f32::INFINITY, f32::min)
    }

    /// Maximum x-coordinate of all points, or 0.0 for an empty polygon.
    pub fn x_max(&self) -> f32 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points
            .iter()
            .map(|p| p.x)
            .fold(f32::NEG_INFINITY, f32::max)
    }

    /// Maximum y-coordinate of all points, or 0.0 for an empty polygon.
    pub fn y_max(&self) -> f32 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points
            .iter()
            .map(|p| p.y)
            .fold(f32::NEG_INFINITY, f32::max)
    }

    /// Centroid of the polygon's points.
    pub fn center(&self) -> Point {
        if self.points.is_empty() {
            return Point::new(0.0, 0.0);
        }
        let sum_x: f32 = self.points.iter().map(|p| p.x).sum();
        let sum_y: f32 = self.points.iter().map(|p| p.y).sum();
        let count = self.points.len() as f32;
        Point::new(sum_x / count, sum_y / count)
    }

    /// Computes the convex hull using Graham's scan.
    ///
    /// Polygons with fewer than 3 points are returned unchanged.
    pub(crate) fn convex_hull(&self) -> BoundingBox {
        if self.points.len() < 3 {
            return self.clone();
        }

        let mut points = self.points.clone();

        // Start from the lowest point, leftmost on ties.
        let mut start_idx = 0;
        for i in 1..points.len() {
            if points[i].y < points[start_idx].y
                || (points[i].y == points[start_idx].y && points[i].x < points[start_idx].x)
            {
                start_idx = i;
            }
        }
        points.swap(0, start_idx);
        let start_point = points[0];

        // Sort the rest by polar angle around the start point.
        points[1..].sort_by(|a, b| {
            let cross = Self::cross_product(&start_point, a, b);
            if cross == 0.0 {
                let dist_a = (a.x - start_point.x).powi(2) + (a.y - start_point.y).powi(2);
                let dist_b = (b.x - start_point.x).powi(2) + (b.y - start_point.y).powi(2);
                dist_a
                    .partial_cmp(&dist_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
            } else if cross > 0.0 {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Greater
            }
        });

        let mut hull: Vec<Point> = Vec::new();
        for point in points {
            while hull.len() > 1
                && Self::cross_product(&hull[hull.len() - 2], &hull[hull.len() - 1], &point) <= 0.0
            {
                hull.pop();
            }
            hull.push(point);
        }

        BoundingBox::new(hull)
    }

    /// Cross product of the vectors `p1→p2` and `p1→p3`.
    ///
    /// Positive means counter-clockwise turn, negative clockwise, zero
    /// collinear.
    fn cross_product(p1: &Point, p2: &Point, p3: &Point) -> f32 {
        (p2.x - p1.x) * (p3.y - p1.y) - (p2.y - p1.y) * (p3.x - p1.x)
    }

    /// Fits the minimum-area rectangle around the polygon with rotating
    /// calipers over its convex hull.
    pub fn min_area_rect(&self) -> MinAreaRect {
        let zero = MinAreaRect {
            center: Point::new(0.0, 0.0),
            width: 0.0,
            height: 0.0,
            angle: 0.0,
        };
        if self.points.len() < 3 {
            return zero;
        }

        let hull = self.convex_hull();
        let hull_points = &hull.points;

        // Collinear input collapses the hull; fall back to the axis-aligned box.
        if hull_points.len() < 3 {
            let center = self.center();
            return MinAreaRect {
                center,
                width: self.x_max() - self.x_min(),
                height: self.y_max() - self.y_min(),
                angle: 0.0,
            };
        }

        let mut min_area = f32::MAX;
        let mut min_rect = zero;

        let n = hull_points.len();
        for i in 0..n {
            let j = (i + 1) % n;

            let edge_x = hull_points[j].x - hull_points[i].x;
            let edge_y = hull_points[j].y - hull_points[i].y;
            let edge_length = (edge_x * edge_x + edge_y * edge_y).sqrt();
            if edge_length < f32::EPSILON {
                continue;
            }

            let nx = edge_x / edge_length;
            let ny = edge_y / edge_length;
            let px = -ny;
            let py = nx;

            // Project every hull point onto the edge direction and its normal.
            let mut min_n = f32::MAX;
            let mut max_n = f32::MIN;
            let mut min_p = f32::MAX;
            let mut max_p = f32::MIN;
            for point in hull_points.iter() {
                let proj_n = nx * (point.x - hull_points[i].x) + ny * (point.y - hull_points[i].y);
                min_n = min_n.min(proj_n);
                max_n = max_n.max(proj_n);

                let proj_p = px * (point.x - hull_points[i].x) + py * (point.y - hull_points[i].y);
                min_p = min_p.min(proj_p);
                max_p = max_p.max(proj_p);
            }

            let width = max_n - min_n;
            let height = max_p - min_p;
            let area = width * height;

            if area < min_area {
                min_area = area;

                let center_n = (min_n + max_n) / 2.0;
                let center_p = (min_p + max_p) / 2.0;
                let center_x = hull_points[i].x + center_n * nx + center_p * px;
                let center_y = hull_points[i].y + center_n * ny + center_p * py;

                min_rect = MinAreaRect {
                    center: Point::new(center_x, center_y),
                    width,
                    height,
                    angle: f32::atan2(ny, nx) * 180.0 / PI,
                };
            }
        }

        min_rect
    }
}

/// A rotated rectangle with minimum area that encloses a polygon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinAreaRect {
    /// The center point of the rectangle.
    pub center: Point,
    /// The width of the rectangle.
    pub width: f32,
    /// The height of the rectangle.
    pub height: f32,
    /// The rotation angle of the rectangle in degrees.
    pub angle: f32,
}

impl MinAreaRect {
    /// Materializes the four corners as a corner-ordered quadrilateral.
    pub fn to_quad(&self) -> Quadrilateral {
        let cos_a = (self.angle * PI / 180.0).cos();
        let sin_a = (self.angle * PI / 180.0).sin();

        let w_2 = self.width / 2.0;
        let h_2 = self.height / 2.0;
        let corners = [(-w_2, -h_2), (w_2, -h_2), (w_2, h_2), (-w_2, h_2)];

        let points = corners.map(|(x, y)| {
            Point::new(
                x * cos_a - y * sin_a + self.center.x,
                x * sin_a + y * cos_a + self.center.y,
            )
        });
        Quadrilateral::new(points).ordered()
    }

    /// Length of the shorter side.
    pub fn min_side(&self) -> f32 {
        self.width.min(self.height)
    }
}

/// A reusable buffer for accumulating probability-map scores inside a polygon,
/// one scanline at a time.
pub(crate) struct ScanlineBuffer {
    intersections: Vec<f32>,
}

impl ScanlineBuffer {
    pub(crate) fn new(max_polygon_points: usize) -> Self {
        Self {
            intersections: Vec::with_capacity(max_polygon_points),
        }
    }

    /// Accumulates map values along one scanline inside the polygon.
    ///
    /// Returns the summed score and the number of pixels visited.
    pub(crate) fn process_scanline(
        &mut self,
        y: f32,
        polygon: &BoundingBox,
        start_x: usize,
        end_x: usize,
        pred: &ndarray::ArrayView2<f32>,
    ) -> (f32, usize) {
        self.intersections.clear();

        let n = polygon.points.len();
        for i in 0..n {
            let j = (i + 1) % n;
            let p1 = &polygon.points[i];
            let p2 = &polygon.points[j];

            if ((p1.y <= y && y < p2.y) || (p2.y <= y && y < p1.y))
                && (p2.y - p1.y).abs() > f32::EPSILON
            {
                let x = p1.x + (y - p1.y) * (p2.x - p1.x) / (p2.y - p1.y);
                self.intersections.push(x);
            }
        }

        self.intersections
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let mut line_score = 0.0;
        let mut line_pixels = 0;

        // Interior segments are pairs of edge crossings.
        for chunk in self.intersections.chunks(2) {
            if chunk.len() == 2 {
                let x1 = chunk[0].max(start_x as f32) as usize;
                let x2 = chunk[1].min(end_x as f32) as usize;

                if x1 < x2 && x1 >= start_x && x2 <= end_x {
                    for x in x1..x2 {
                        if (y as usize) < pred.shape()[0] && x < pred.shape()[1] {
                            line_score += pred[[y as usize, x]];
                            line_pixels += 1;
                        }
                    }
                }
            }
        }

        (line_score, line_pixels)
    }
}
