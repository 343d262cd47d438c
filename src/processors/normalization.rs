//! Image normalization for model input.
//!
//! Both engines take CHW float tensors. Normalization is expressed in the
//! fused `x * alpha + beta` form with `alpha = scale / std` and
//! `beta = -mean / std`, so the per-pixel work is one multiply-add per
//! channel.

use crate::core::{OCRError, OcrResult};
use crate::processors::types::ColorOrder;
use image::RgbImage;
use ndarray::Array4;

/// Per-channel normalizer producing CHW tensors.
#[derive(Debug, Clone)]
pub struct NormalizeImage {
    /// Scaling factors for each output channel (`scale / std`).
    pub alpha: [f32; 3],
    /// Offsets for each output channel (`-mean / std`).
    pub beta: [f32; 3],
    /// Color channel order of the output tensor.
    pub color_order: ColorOrder,
}

impl NormalizeImage {
    /// Creates a normalizer from scale, per-channel mean, and per-channel std.
    ///
    /// `mean` and `std` are interpreted in the output channel order given by
    /// `color_order`.
    pub fn new(
        scale: f32,
        mean: [f32; 3],
        std: [f32; 3],
        color_order: ColorOrder,
    ) -> OcrResult<Self> {
        if scale <= 0.0 {
            return Err(OCRError::config("normalization scale must be greater than 0"));
        }
        for (i, &s) in std.iter().enumerate() {
            if s <= 0.0 {
                return Err(OCRError::config(format!(
                    "standard deviation at index {i} must be greater than 0, got {s}"
                )));
            }
        }

        let mut alpha = [0.0f32; 3];
        let mut beta = [0.0f32; 3];
        for i in 0..3 {
            alpha[i] = scale / std[i];
            beta[i] = -mean[i] / std[i];
        }

        Ok(Self {
            alpha,
            beta,
            color_order,
        })
    }

    /// ImageNet-style RGB normalizer used by the DB text detector.
    pub fn imagenet_rgb() -> OcrResult<Self> {
        Self::new(
            1.0 / 255.0,
            [0.485, 0.456, 0.406],
            [0.229, 0.224, 0.225],
            ColorOrder::RGB,
        )
    }

    /// Normalizer for PaddlePaddle-style recognition models: BGR input scaled
    /// into `[-1, 1]`.
    pub fn for_recognition() -> OcrResult<Self> {
        Self::new(2.0 / 255.0, [1.0, 1.0, 1.0], [1.0, 1.0, 1.0], ColorOrder::BGR)
    }

    /// Normalizes one image into a `[1, 3, H, W]` tensor.
    pub fn normalize_to(&self, img: &RgbImage) -> OcrResult<Array4<f32>> {
        let (width, height) = img.dimensions();
        let (width, height) = (width as usize, height as usize);

        // src_channels[c] gives the source pixel index for output channel c.
        let src_channels: [usize; 3] = match self.color_order {
            ColorOrder::RGB => [0, 1, 2],
            ColorOrder::BGR => [2, 1, 0],
        };

        let mut result = vec![0.0f32; 3 * height * width];
        for (c, &src_c) in src_channels.iter().enumerate() {
            let plane = &mut result[c * height * width..(c + 1) * height * width];
            for (y, row) in img.rows().enumerate() {
                for (x, pixel) in row.enumerate() {
                    plane[y * width + x] = pixel.0[src_c] as f32 * self.alpha[c] + self.beta[c];
                }
            }
        }

        Ok(Array4::from_shape_vec((1, 3, height, width), result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn one_pixel(r: u8, g: u8, b: u8) -> RgbImage {
        let mut img = RgbImage::new(1, 1);
        img.put_pixel(0, 0, Rgb([r, g, b]));
        img
    }

    #[test]
    fn test_color_order_rgb_vs_bgr() {
        let img = one_pixel(10, 20, 30);

        let rgb = NormalizeImage::new(1.0, [0.0; 3], [1.0; 3], ColorOrder::RGB).unwrap();
        let bgr = NormalizeImage::new(1.0, [0.0; 3], [1.0; 3], ColorOrder::BGR).unwrap();

        let rgb_out = rgb.normalize_to(&img).unwrap();
        let bgr_out = bgr.normalize_to(&img).unwrap();

        assert_eq!(rgb_out.as_slice().unwrap(), &[10.0, 20.0, 30.0]);
        assert_eq!(bgr_out.as_slice().unwrap(), &[30.0, 20.0, 10.0]);
    }

    #[test]
    fn test_recognition_preset_maps_to_unit_range() {
        let norm = NormalizeImage::for_recognition().unwrap();

        let white = norm.normalize_to(&one_pixel(255, 255, 255)).unwrap();
        assert!(white.iter().all(|&v| (v - 1.0).abs() < 1e-6));

        let black = norm.normalize_to(&one_pixel(0, 0, 0)).unwrap();
        assert!(black.iter().all(|&v| (v + 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_imagenet_preset_spot_value() {
        let norm = NormalizeImage::imagenet_rgb().unwrap();
        let out = norm.normalize_to(&one_pixel(124, 0, 0)).unwrap();
        // (124/255 - 0.485) / 0.229
        let expected = (124.0 / 255.0 - 0.485) / 0.229;
        assert!((out[[0, 0, 0, 0]] - expected).abs() < 1e-5);
    }

    #[test]
    fn test_invalid_params_rejected() {
        assert!(NormalizeImage::new(0.0, [0.0; 3], [1.0; 3], ColorOrder::RGB).is_err());
        assert!(NormalizeImage::new(1.0, [0.0; 3], [1.0, 0.0, 1.0], ColorOrder::RGB).is_err());
    }

    #[test]
    fn test_tensor_shape_is_chw() {
        let mut img = RgbImage::new(4, 2);
        for y in 0..2 {
            for x in 0..4 {
                img.put_pixel(x, y, Rgb([x as u8, y as u8, 0]));
            }
        }
        let norm = NormalizeImage::new(1.0, [0.0; 3], [1.0; 3], ColorOrder::RGB).unwrap();
        let out = norm.normalize_to(&img).unwrap();
        assert_eq!(out.shape(), &[1, 3, 2, 4]);
        // Red plane holds the x gradient.
        assert_eq!(out[[0, 0, 0, 3]], 3.0);
        // Green plane holds the y gradient.
        assert_eq!(out[[0, 1, 1, 0]], 1.0);
    }
}
