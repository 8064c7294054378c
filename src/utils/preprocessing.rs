//! Image preprocessing for model inference
//!
//! The segmentation models expect a square RGB input. Images are stretched to
//! the model's input size (no letterboxing), scaled by the brightest channel
//! value so the result spans `0..=1`, and normalised with the model's
//! per-channel mean and standard deviation.

use crate::{
    error::{Result, ServiceError},
    models::PreprocessingConfig,
};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::Array4;

/// Filter used for both input resizing and mask upscaling
pub const RESIZE_FILTER: FilterType = FilterType::Lanczos3;

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Convert `image` into an NCHW tensor for a model with `config`
    ///
    /// # Errors
    /// - Zero-sized input image
    /// - Target size too large for tensor allocation
    pub fn preprocess(image: &DynamicImage, config: &PreprocessingConfig) -> Result<Array4<f32>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ServiceError::invalid_image("image has zero width or height"));
        }

        let [target_width, target_height] = config.target_size;
        let resized = image::imageops::resize(
            &image.to_rgb8(),
            target_width,
            target_height,
            RESIZE_FILTER,
        );

        let width = usize::try_from(target_width)
            .map_err(|_| ServiceError::invalid_config("model input width too large"))?;
        let height = usize::try_from(target_height)
            .map_err(|_| ServiceError::invalid_config("model input height too large"))?;

        Ok(Self::to_tensor(&resized, config, width, height))
    }

    /// Normalise `resized` into a `(1, 3, height, width)` tensor
    fn to_tensor(
        resized: &RgbImage,
        config: &PreprocessingConfig,
        width: usize,
        height: usize,
    ) -> Array4<f32> {
        // An all-black image would divide by zero
        let max_value = resized
            .as_raw()
            .iter()
            .copied()
            .max()
            .filter(|&m| m > 0)
            .map_or(1.0, f32::from);

        let mut tensor = Array4::<f32>::zeros((1, 3, height, width));

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match the resized image
        for (y, row) in resized.rows().enumerate() {
            for (x, pixel) in row.enumerate() {
                for channel in 0..3 {
                    tensor[[0, channel, y, x]] = (f32::from(pixel[channel]) / max_value
                        - config.normalization_mean[channel])
                        / config.normalization_std[channel];
                }
            }
        }

        tensor
    }
}
