//! Perspective unwarping of detected label regions.
//!
//! Detected quadrilaterals are rarely axis-aligned: labels are photographed
//! at an angle. [`unwarp_quad`] rectifies one region into a flat crop that
//! the recognition tiers can consume. Degenerate geometry never aborts a
//! pipeline call; it degrades to an empty crop the caller skips.

use crate::core::OCRError;
use crate::processors::{Point, Quadrilateral};
use image::{imageops, Rgb, RgbImage};
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use tracing::debug;

/// Euclidean distance between two points.
fn distance(p1: &Point, p2: &Point) -> f32 {
    (p1.x - p2.x).hypot(p1.y - p2.y)
}

/// Rectifies the region under `quad` into a flat crop.
///
/// Corners are classified with the sum/difference rule, the target size is
/// the maximum of each pair of opposing edge lengths (rounded, floored to
/// 1 px), and the source is inverse-mapped through the 4-point perspective
/// transform with bicubic sampling and edge replication.
///
/// Returns an empty (0×0) image when the quad is degenerate: non-finite
/// corners, zero-area geometry, collinear corners, or a region entirely
/// outside the source image. Callers skip empty crops.
pub fn unwarp_quad(src_image: &RgbImage, quad: &Quadrilateral) -> RgbImage {
    match try_unwarp(src_image, quad) {
        Ok(crop) => crop,
        Err(err) => {
            debug!("unwarp degraded to empty crop: {}", err);
            RgbImage::new(0, 0)
        }
    }
}

fn try_unwarp(src_image: &RgbImage, quad: &Quadrilateral) -> Result<RgbImage, OCRError> {
    if !quad.is_finite() {
        return Err(OCRError::invalid_input("quad has non-finite corners"));
    }

    // Crop to the quad's bounding box first so the warp only touches the
    // pixels it can actually sample.
    let mut min_x = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_y = f32::NEG_INFINITY;
    for p in &quad.points {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }

    let left = min_x.max(0.0) as u32;
    let top = min_y.max(0.0) as u32;
    let right = max_x.min(src_image.width() as f32).ceil() as u32;
    let bottom = max_y.min(src_image.height() as f32).ceil() as u32;
    if right <= left || bottom <= top {
        return Err(OCRError::invalid_input("quad covers no source pixels"));
    }

    let img_crop = imageops::crop_imm(src_image, left, top, right - left, bottom - top).to_image();

    // Re-offset into crop space, then classify the corners. The ordering keys
    // are translation-invariant, so this matches ordering before the crop.
    let ordered = Quadrilateral::new(
        quad.points
            .map(|p| Point::new(p.x - left as f32, p.y - top as f32)),
    )
    .ordered();
    let [tl, tr, br, bl] = ordered.points;

    // Target size from the longer of each pair of opposing edges, floored to
    // one pixel so near-degenerate quads still produce a crop.
    let dst_width = distance(&br, &bl).max(distance(&tr, &tl)).round().max(1.0) as u32;
    let dst_height = distance(&tr, &br).max(distance(&tl, &bl)).round().max(1.0) as u32;

    let pts_std = [
        Point::new(0.0, 0.0),
        Point::new(dst_width as f32, 0.0),
        Point::new(dst_width as f32, dst_height as f32),
        Point::new(0.0, dst_height as f32),
    ];

    let transform_matrix = get_perspective_transform(&ordered.points, &pts_std)?;
    warp_perspective(&img_crop, &transform_matrix, dst_width, dst_height)
}

/// Solves for the 3×3 matrix mapping four source points onto four
/// destination points.
///
/// Fails when the points are collinear (the 8×8 system is singular).
fn get_perspective_transform(
    src_points: &[Point; 4],
    dst_points: &[Point; 4],
) -> Result<Matrix3<f32>, OCRError> {
    let mut a = nalgebra::DMatrix::<f32>::zeros(8, 8);
    let mut b = nalgebra::DVector::<f32>::zeros(8);

    for i in 0..4 {
        let src = &src_points[i];
        let dst = &dst_points[i];

        a.set_row(
            i * 2,
            &nalgebra::RowDVector::from_row_slice(&[
                src.x,
                src.y,
                1.0,
                0.0,
                0.0,
                0.0,
                -src.x * dst.x,
                -src.y * dst.x,
            ]),
        );
        b[i * 2] = dst.x;

        a.set_row(
            i * 2 + 1,
            &nalgebra::RowDVector::from_row_slice(&[
                0.0,
                0.0,
                0.0,
                src.x,
                src.y,
                1.0,
                -src.x * dst.y,
                -src.y * dst.y,
            ]),
        );
        b[i * 2 + 1] = dst.y;
    }

    let decomp = a.lu();
    let solution = decomp
        .solve(&b)
        .ok_or_else(|| OCRError::invalid_input("cannot solve perspective transformation"))?;

    Ok(Matrix3::new(
        solution[0],
        solution[1],
        solution[2],
        solution[3],
        solution[4],
        solution[5],
        solution[6],
        solution[7],
        1.0,
    ))
}

/// Inverse-maps the destination raster through the transform.
///
/// Bicubic sampling with border replication, matching
/// `cv2.warpPerspective(flags=INTER_CUBIC, borderMode=BORDER_REPLICATE)`.
/// Rows run in parallel; single-row targets take a sequential path to skip
/// rayon overhead.
fn warp_perspective(
    src_image: &RgbImage,
    transform_matrix: &Matrix3<f32>,
    dst_width: u32,
    dst_height: u32,
) -> Result<RgbImage, OCRError> {
    let inv_matrix = transform_matrix
        .try_inverse()
        .ok_or_else(|| OCRError::invalid_input("cannot invert transformation matrix"))?;

    let mut dst_image = RgbImage::new(dst_width, dst_height);
    let buffer: &mut [u8] = dst_image.as_mut();

    let fill_row = |dst_y: usize, row_buffer: &mut [u8]| {
        for dst_x in 0..dst_width {
            let dst_point = Vector3::new(dst_x as f32, dst_y as f32, 1.0);
            let src_point = inv_matrix * dst_point;
            let final_pixel = if src_point.z.abs() > f32::EPSILON {
                let src_x = src_point.x / src_point.z;
                let src_y = src_point.y / src_point.z;
                bicubic_interpolate(src_image, src_x, src_y)
            } else {
                // Projective blow-up: replicate the top-left corner pixel.
                *src_image.get_pixel(0, 0)
            };
            let index = (dst_x * 3) as usize;
            row_buffer[index..index + 3].copy_from_slice(&final_pixel.0);
        }
    };

    if dst_height <= 1 {
        fill_row(0, &mut buffer[0..(dst_width * 3) as usize]);
    } else {
        buffer
            .par_chunks_mut((dst_width * 3) as usize)
            .enumerate()
            .for_each(|(dst_y, row_buffer)| fill_row(dst_y, row_buffer));
    }

    Ok(dst_image)
}

/// Reads a pixel with OpenCV's BORDER_REPLICATE behavior: out-of-bounds
/// coordinates clamp to the nearest edge pixel.
#[inline]
fn get_pixel_replicate(image: &RgbImage, x: i32, y: i32) -> Rgb<u8> {
    let clamped_x = x.clamp(0, image.width() as i32 - 1) as u32;
    let clamped_y = y.clamp(0, image.height() as i32 - 1) as u32;
    *image.get_pixel(clamped_x, clamped_y)
}

/// Cubic convolution kernel with a = -0.5 (Catmull-Rom, OpenCV's default).
#[inline]
fn cubic_kernel(t: f32) -> f32 {
    const A: f32 = -0.5;
    let t_abs = t.abs();

    if t_abs <= 1.0 {
        (A + 2.0) * t_abs * t_abs * t_abs - (A + 3.0) * t_abs * t_abs + 1.0
    } else if t_abs < 2.0 {
        A * t_abs * t_abs * t_abs - 5.0 * A * t_abs * t_abs + 8.0 * A * t_abs - 4.0 * A
    } else {
        0.0
    }
}

/// Bicubic interpolation over a 4×4 neighborhood with border replication.
fn bicubic_interpolate(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let x_int = x.floor() as i32;
    let y_int = y.floor() as i32;
    let dx = x - x_int as f32;
    let dy = y - y_int as f32;

    let wx = [
        cubic_kernel(dx + 1.0),
        cubic_kernel(dx),
        cubic_kernel(dx - 1.0),
        cubic_kernel(dx - 2.0),
    ];
    let wy = [
        cubic_kernel(dy + 1.0),
        cubic_kernel(dy),
        cubic_kernel(dy - 1.0),
        cubic_kernel(dy - 2.0),
    ];

    let mut result = [0.0f32; 3];
    for (j, &weight_y) in wy.iter().enumerate() {
        let sample_y = y_int - 1 + j as i32;
        for (i, &weight_x) in wx.iter().enumerate() {
            let sample_x = x_int - 1 + i as i32;
            let weight = weight_x * weight_y;
            let pixel = get_pixel_replicate(image, sample_x, sample_y);
            for (c, result_c) in result.iter_mut().enumerate().take(3) {
                *result_c += weight * pixel.0[c] as f32;
            }
        }
    }

    Rgb([
        result[0].round().clamp(0.0, 255.0) as u8,
        result[1].round().clamp(0.0, 255.0) as u8,
        result[2].round().clamp(0.0, 255.0) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(width: u32, height: u32) -> RgbImage {
        let mut image = RgbImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let r = (x * 40 % 256) as u8;
                let g = (y * 40 % 256) as u8;
                let b = ((x + y) * 20 % 256) as u8;
                image.put_pixel(x, y, Rgb([r, g, b]));
            }
        }
        image
    }

    #[test]
    fn test_distance() {
        let p1 = Point::new(0.0, 0.0);
        let p2 = Point::new(3.0, 4.0);
        assert_eq!(distance(&p1, &p2), 5.0);
    }

    #[test]
    fn test_get_perspective_transform_scales_square() {
        let src_points = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ];
        let dst_points = [
            Point::new(0.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(2.0, 2.0),
            Point::new(0.0, 2.0),
        ];

        let transform = get_perspective_transform(&src_points, &dst_points).unwrap();
        assert!(transform.iter().all(|&x| x.is_finite()));

        // A pure scale maps (1, 1) to (2, 2).
        let mapped = transform * Vector3::new(1.0, 1.0, 1.0);
        assert!((mapped.x / mapped.z - 2.0).abs() < 1e-4);
        assert!((mapped.y / mapped.z - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_get_perspective_transform_collinear_points_fail() {
        let src_points = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(2.0, 2.0),
            Point::new(3.0, 3.0),
        ];
        let dst_points = [
            Point::new(0.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(2.0, 2.0),
            Point::new(0.0, 2.0),
        ];
        assert!(get_perspective_transform(&src_points, &dst_points).is_err());
    }

    #[test]
    fn test_warp_perspective_invalid_matrix() {
        let image = RgbImage::new(2, 2);
        let matrix = Matrix3::new(1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        assert!(warp_perspective(&image, &matrix, 2, 2).is_err());
    }

    #[test]
    fn test_unwarp_quad_extracts_region() {
        let image = gradient_image(8, 8);
        let quad = Quadrilateral::from_rect(2.0, 2.0, 6.0, 5.0);

        let crop = unwarp_quad(&image, &quad);
        assert_eq!(crop.width(), 4);
        assert_eq!(crop.height(), 3);
        // The crop's origin pixel comes from (2, 2) in the source.
        assert_eq!(crop.get_pixel(0, 0), image.get_pixel(2, 2));
    }

    #[test]
    fn test_unwarp_quad_corner_order_does_not_matter() {
        let image = gradient_image(10, 10);
        let p = [
            Point::new(1.0, 2.0),
            Point::new(8.0, 2.0),
            Point::new(8.0, 7.0),
            Point::new(1.0, 7.0),
        ];

        let reference = unwarp_quad(&image, &Quadrilateral::new(p));
        let shuffled = unwarp_quad(&image, &Quadrilateral::new([p[2], p[0], p[3], p[1]]));
        assert_eq!(reference, shuffled);
    }

    #[test]
    fn test_unwarp_quad_zero_length_edges_give_empty_crop() {
        let image = gradient_image(6, 6);
        let p = Point::new(3.0, 3.0);
        let crop = unwarp_quad(&image, &Quadrilateral::new([p, p, p, p]));
        assert_eq!(crop.width(), 0);
        assert_eq!(crop.height(), 0);
    }

    #[test]
    fn test_unwarp_quad_outside_image_gives_empty_crop() {
        let image = gradient_image(6, 6);
        let quad = Quadrilateral::from_rect(10.0, 10.0, 20.0, 20.0);
        let crop = unwarp_quad(&image, &quad);
        assert_eq!(crop.width(), 0);

        let negative = Quadrilateral::from_rect(-20.0, -20.0, -10.0, -10.0);
        assert_eq!(unwarp_quad(&image, &negative).width(), 0);
    }

    #[test]
    fn test_unwarp_quad_non_finite_corners_give_empty_crop() {
        let image = gradient_image(6, 6);
        let quad = Quadrilateral::new([
            Point::new(f32::NAN, 1.0),
            Point::new(4.0, 1.0),
            Point::new(4.0, 4.0),
            Point::new(1.0, 4.0),
        ]);
        assert_eq!(unwarp_quad(&image, &quad).width(), 0);
    }

    #[test]
    fn test_unwarp_quad_floors_thin_region_to_one_pixel() {
        let image = gradient_image(8, 8);
        // A sliver 0.3 px tall still produces a 1-px-high crop.
        let quad = Quadrilateral::new([
            Point::new(1.0, 2.0),
            Point::new(5.0, 2.0),
            Point::new(5.0, 2.3),
            Point::new(1.0, 2.3),
        ]);
        let crop = unwarp_quad(&image, &quad);
        assert_eq!(crop.width(), 4);
        assert_eq!(crop.height(), 1);
    }

    #[test]
    fn test_bicubic_interpolate_exact_at_integer_coordinates() {
        let image = gradient_image(4, 4);
        let pixel = bicubic_interpolate(&image, 2.0, 1.0);
        assert_eq!(&pixel, image.get_pixel(2, 1));
    }
}
