//! Background removal processor
//!
//! `BackgroundRemovalProcessor` is the real implementation of
//! [`BackgroundRemover`]: decode, preprocess, infer through a cached backend
//! session, turn the model output into an alpha mask and encode a PNG.

use crate::{
    cache::ModelStore,
    config::ServiceConfig,
    error::{Result, ServiceError},
    inference::{BackgroundRemover, InferenceBackend},
    models::{ModelCatalog, ModelDescriptor, ModelManager, OutputHead},
    session_cache::{SessionCache, SessionCacheStats},
    utils::{preprocessing::RESIZE_FILTER, ImagePreprocessor},
};
use image::{DynamicImage, GrayImage, ImageDecoder, ImageFormat, ImageReader, Luma, RgbaImage};
use instant::{Duration, Instant};
use log::{debug, info};
use ndarray::{s, Array4, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::{span, Level};

/// Range below which a saliency map is treated as flat
const FLAT_RANGE_EPSILON: f32 = 1e-6;

/// Backend type enumeration for runtime selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Tract backend (pure Rust, no external dependencies)
    #[default]
    Tract,
    /// ONNX Runtime backend
    Onnx,
    /// Deterministic mock engine, no model files needed
    Mock,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Tract => "tract",
            Self::Onnx => "onnx",
            Self::Mock => "mock",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for BackendType {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tract" => Ok(Self::Tract),
            "onnx" => Ok(Self::Onnx),
            "mock" => Ok(Self::Mock),
            other => Err(ServiceError::invalid_config(format!(
                "unknown backend '{other}' (expected tract, onnx or mock)"
            ))),
        }
    }
}

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create an uninitialised backend of the given type for one model
    ///
    /// # Errors
    /// - Backend type not compiled into this build
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>>;

    /// List available backend types
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Factory for the backends compiled into this build
///
/// Tract sessions created by one factory share their loaded models.
#[derive(Debug, Default)]
pub struct DefaultBackendFactory {
    #[cfg(feature = "tract")]
    tract_models: crate::backends::tract::SharedModelCache<crate::backends::tract::TractModel>,
}

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::with_cache(
                model_manager,
                self.tract_models.clone(),
            ))),
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::new(model_manager))),
            BackendType::Mock => Ok(Box::new(
                crate::backends::MockBackend::new().with_head(model_manager.descriptor().head),
            )),
            #[allow(unreachable_patterns)]
            other => Err(ServiceError::invalid_config(format!(
                "backend '{other}' is not compiled into this build"
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        backends.push(BackendType::Mock);
        backends
    }
}

/// Real background remover driving catalog models through a backend
pub struct BackgroundRemovalProcessor {
    config: ServiceConfig,
    store: ModelStore,
    factory: Box<dyn BackendFactory>,
    sessions: SessionCache,
}

impl std::fmt::Debug for BackgroundRemovalProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemovalProcessor")
            .field("backend", &self.config.backend)
            .field("models_dir", &self.store.models_dir())
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl BackgroundRemovalProcessor {
    /// Create a processor using the backends compiled into this build
    #[must_use]
    pub fn new(config: &ServiceConfig) -> Self {
        Self::with_factory(config, Box::new(DefaultBackendFactory::default()))
    }

    /// Create a processor with a custom backend factory
    #[must_use]
    pub fn with_factory(config: &ServiceConfig, factory: Box<dyn BackendFactory>) -> Self {
        Self {
            store: ModelStore::new(&config.models_dir),
            sessions: SessionCache::new(config.max_concurrent_inference),
            config: config.clone(),
            factory,
        }
    }

    #[must_use]
    pub fn backend_type(&self) -> BackendType {
        self.config.backend
    }

    #[must_use]
    pub fn session_stats(&self) -> SessionCacheStats {
        self.sessions.stats()
    }

    /// Load `model` into the session cache ahead of the first request
    ///
    /// Returns the model load time, or `None` when a session was already idle.
    ///
    /// # Errors
    /// - Unknown model name
    /// - Model file missing or rejected by the backend
    pub fn warm_up(&self, model: &str) -> Result<Option<Duration>> {
        let descriptor = ModelCatalog::resolve(model)?;
        let mut load_time = None;
        let lease = self.sessions.lease(descriptor.name, || {
            let (backend, elapsed) = self.create_session(descriptor)?;
            load_time = elapsed;
            Ok(backend)
        })?;
        info!("Model {} ready on {} backend", descriptor.name, lease.engine_name());
        Ok(load_time)
    }

    fn create_session(
        &self,
        descriptor: &'static ModelDescriptor,
    ) -> Result<(Box<dyn InferenceBackend>, Option<Duration>)> {
        let mut backend = self
            .factory
            .create_backend(self.config.backend, self.store.manager(descriptor))?;
        let load_time = backend.initialize(&self.config)?;
        Ok((backend, load_time))
    }

    /// Remove the background of a decoded image
    ///
    /// # Errors
    /// - Unknown model name
    /// - Backend creation or inference failures
    pub fn process_image(&self, image: &DynamicImage, model: &str) -> Result<RgbaImage> {
        let descriptor = ModelCatalog::resolve(model)?;
        let total_start = Instant::now();

        let input_tensor = {
            let _span = span!(
                Level::DEBUG,
                "preprocessing",
                width = image.width(),
                height = image.height()
            )
            .entered();
            ImagePreprocessor::preprocess(image, &descriptor.preprocessing)?
        };

        let output_tensor = {
            let _span = span!(Level::DEBUG, "inference", model = descriptor.name).entered();
            let mut lease = self.sessions.lease(descriptor.name, || {
                self.create_session(descriptor).map(|(backend, _)| backend)
            })?;
            match lease.infer(&input_tensor) {
                Ok(output) => output,
                Err(e) => {
                    // A backend that failed mid-run is not trusted for reuse
                    lease.discard();
                    return Err(e);
                },
            }
        };

        let result = cutout(image, &output_tensor, descriptor.head)?;

        debug!(
            "Processed {}x{} image with {} in {}ms",
            image.width(),
            image.height(),
            descriptor.name,
            total_start.elapsed().as_millis()
        );
        Ok(result)
    }
}

impl BackgroundRemover for BackgroundRemovalProcessor {
    fn transform(&self, image: &[u8], model: &str) -> Result<Vec<u8>> {
        // Unknown models fail before any decoding work
        ModelCatalog::resolve(model)?;
        let decoded = decode_upload(image)?;
        let result = self.process_image(&decoded, model)?;
        encode_png(result)
    }
}

/// Decode uploaded bytes, applying the EXIF orientation when present
///
/// # Errors
/// - Unknown or corrupt image data
pub fn decode_upload(bytes: &[u8]) -> Result<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ServiceError::invalid_image(e.to_string()))?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Cut `image` out using the model output
///
/// Saliency heads give one cutout of the image size. Class-logit heads give
/// one cutout per non-background class, stacked top to bottom in class order.
///
/// # Errors
/// - Empty output tensor
/// - Class channel count not matching the head
pub fn cutout(image: &DynamicImage, output: &Array4<f32>, head: OutputHead) -> Result<RgbaImage> {
    match head {
        OutputHead::Saliency => Ok(apply_mask(image, &saliency_mask(output)?)),
        OutputHead::ClassLogits { classes } => {
            let labels = class_label_map(output, classes)?;
            let cutouts: Vec<RgbaImage> = class_masks(&labels, classes, image.width(), image.height())
                .iter()
                .map(|mask| apply_mask(image, mask))
                .collect();
            stack_vertically(&cutouts)
        },
    }
}

/// Turn a single-channel saliency output into an 8-bit mask at model resolution
///
/// # Errors
/// - Empty output tensor
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn saliency_mask(output: &Array4<f32>) -> Result<GrayImage> {
    let (_, height, width) = output_dims(output)?;
    let map = output.index_axis(Axis(0), 0);
    let pixels = saliency_to_probabilities(map.index_axis(Axis(0), 0))
        .into_iter()
        .map(|p| (p.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect();
    gray_from_raw(width, height, pixels)
}

/// Per-pixel argmax over the class channels, at model resolution
///
/// # Errors
/// - Empty output tensor
/// - Channel count different from `classes`
#[allow(clippy::cast_possible_truncation)]
pub fn class_label_map(output: &Array4<f32>, classes: usize) -> Result<GrayImage> {
    let (channels, height, width) = output_dims(output)?;
    if channels != classes || classes < 2 || classes > 256 {
        return Err(ServiceError::model_invocation(format!(
            "expected {classes} class channels, got {channels}"
        )));
    }
    let logits = output.index_axis(Axis(0), 0);

    let mut labels = Vec::with_capacity(height * width);
    for y in 0..height {
        for x in 0..width {
            let (best, _) = logits
                .slice(s![.., y, x])
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best, max), (class, &v)| {
                    if v > max { (class, v) } else { (best, max) }
                });
            labels.push(best as u8);
        }
    }
    gray_from_raw(width, height, labels)
}

/// Hard masks for classes `1..classes`, resized to `width`x`height`
///
/// The label map is resized first, then each mask is 255 where the label
/// equals its class and 0 elsewhere.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn class_masks(labels: &GrayImage, classes: usize, width: u32, height: u32) -> Vec<GrayImage> {
    let resized = if labels.dimensions() == (width, height) {
        labels.clone()
    } else {
        image::imageops::resize(labels, width, height, RESIZE_FILTER)
    };

    (1..classes)
        .map(|class| {
            let class = class as u8;
            GrayImage::from_fn(width, height, |x, y| {
                Luma([if resized.get_pixel(x, y).0[0] == class { 255 } else { 0 }])
            })
        })
        .collect()
}

/// Stack same-width images top to bottom
///
/// # Errors
/// - No images, or images of differing widths
pub fn stack_vertically(images: &[RgbaImage]) -> Result<RgbaImage> {
    let Some(first) = images.first() else {
        return Err(ServiceError::model_invocation("no cutouts to stack"));
    };
    let width = first.width();
    if images.iter().any(|image| image.width() != width) {
        return Err(ServiceError::model_invocation("cutouts differ in width"));
    }
    let height = images
        .iter()
        .try_fold(0u32, |total, image| total.checked_add(image.height()))
        .ok_or_else(|| ServiceError::model_invocation("stacked height exceeds u32"))?;

    let mut stacked = RgbaImage::new(width, height);
    let mut offset = 0;
    for image in images {
        image::imageops::replace(&mut stacked, image, 0, i64::from(offset));
        offset += image.height();
    }
    Ok(stacked)
}

/// Channels, height and width of the first batch entry
fn output_dims(output: &Array4<f32>) -> Result<(usize, usize, usize)> {
    let (batch, channels, height, width) = output.dim();
    if batch == 0 || channels == 0 || height == 0 || width == 0 {
        return Err(ServiceError::model_invocation(format!(
            "model produced an empty output tensor {:?}",
            output.shape()
        )));
    }
    Ok((channels, height, width))
}

fn gray_from_raw(width: usize, height: usize, pixels: Vec<u8>) -> Result<GrayImage> {
    let width = u32::try_from(width)
        .map_err(|_| ServiceError::model_invocation("mask width exceeds u32"))?;
    let height = u32::try_from(height)
        .map_err(|_| ServiceError::model_invocation("mask height exceeds u32"))?;
    GrayImage::from_raw(width, height, pixels)
        .ok_or_else(|| ServiceError::model_invocation("mask buffer size mismatch"))
}

fn saliency_to_probabilities(map: ArrayView2<'_, f32>) -> Vec<f32> {
    let (min, max) = map
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;

    if range > FLAT_RANGE_EPSILON {
        map.iter().map(|&v| (v - min) / range).collect()
    } else {
        map.iter().map(|&v| v.clamp(0.0, 1.0)).collect()
    }
}

/// Use `mask` (any resolution) as the alpha channel of `image`
///
/// The mask is resized to the image size; existing transparency is kept by
/// multiplying it in. Fully transparent pixels get black colour channels.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn apply_mask(image: &DynamicImage, mask: &GrayImage) -> RgbaImage {
    let mut rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let scaled_mask = if mask.dimensions() == (width, height) {
        mask.clone()
    } else {
        image::imageops::resize(mask, width, height, RESIZE_FILTER)
    };

    for (pixel, Luma([mask_value])) in rgba.pixels_mut().zip(scaled_mask.pixels()) {
        let alpha = (u16::from(*mask_value) * u16::from(pixel.0[3]) / 255) as u8;
        pixel.0[3] = alpha;
        if alpha == 0 {
            pixel.0[0] = 0;
            pixel.0[1] = 0;
            pixel.0[2] = 0;
        }
    }
    rgba
}

/// Encode an RGBA image as PNG
///
/// # Errors
/// - Encoder failure
pub fn encode_png(image: RgbaImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image)
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| ServiceError::model_invocation(format!("Failed to encode PNG: {e}")))?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockBackend;
    use image::{GenericImageView, ImageBuffer, Rgba};
    use ndarray::Array;

    fn mock_config() -> ServiceConfig {
        ServiceConfig::builder()
            .backend(BackendType::Mock)
            .models_dir(std::env::temp_dir().join("kyarafit-no-models"))
            .build()
            .unwrap()
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = ImageBuffer::from_pixel(width, height, Rgba([200u8, 100, 50, 255]));
        encode_png(image).unwrap()
    }

    /// Factory that hands out mock backends failing every inference
    struct FailingFactory;

    impl BackendFactory for FailingFactory {
        fn create_backend(
            &self,
            _backend_type: BackendType,
            _model_manager: ModelManager,
        ) -> Result<Box<dyn InferenceBackend>> {
            Ok(Box::new(MockBackend::new_failing_inference()))
        }

        fn available_backends(&self) -> Vec<BackendType> {
            vec![BackendType::Mock]
        }
    }

    #[test]
    fn test_backend_type_parsing() {
        assert_eq!("tract".parse::<BackendType>().unwrap(), BackendType::Tract);
        assert_eq!("ONNX".parse::<BackendType>().unwrap(), BackendType::Onnx);
        assert_eq!(BackendType::Mock.to_string(), "mock");
        assert!("cuda".parse::<BackendType>().is_err());
        assert_eq!(serde_json::to_string(&BackendType::Onnx).unwrap(), "\"onnx\"");
    }

    #[test]
    fn test_default_factory_always_offers_mock() {
        let factory = DefaultBackendFactory::default();
        assert!(factory.available_backends().contains(&BackendType::Mock));

        let descriptor = ModelCatalog::resolve("u2net").unwrap();
        let manager = ModelManager::new(descriptor, std::path::Path::new("."));
        let backend = factory.create_backend(BackendType::Mock, manager).unwrap();
        assert_eq!(backend.engine_name(), "mock");
    }

    #[test]
    fn test_transform_produces_png_with_original_dimensions() {
        let processor = BackgroundRemovalProcessor::new(&mock_config());
        let output = processor.transform(&png_bytes(40, 20), "u2net").unwrap();

        let decoded = image::load_from_memory(&output).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (40, 20));
        // Mock mask is opaque in the middle and transparent in the corners
        assert!(decoded.get_pixel(20, 10).0[3] > 200);
        assert_eq!(decoded.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_transform_reuses_sessions() {
        let processor = BackgroundRemovalProcessor::new(&mock_config());
        processor.transform(&png_bytes(10, 10), "u2netp").unwrap();
        processor.transform(&png_bytes(10, 10), "u2netp").unwrap();

        let stats = processor.session_stats();
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[test]
    fn test_transform_rejects_unknown_model_before_decoding() {
        let processor = BackgroundRemovalProcessor::new(&mock_config());
        let err = processor.transform(b"not an image", "u3net").unwrap_err();
        assert_eq!(err.kind(), "unsupported_model");
    }

    #[test]
    fn test_transform_rejects_undecodable_bytes() {
        let processor = BackgroundRemovalProcessor::new(&mock_config());
        let err = processor.transform(b"not an image", "u2net").unwrap_err();
        assert_eq!(err.kind(), "invalid_image");
    }

    #[test]
    fn test_inference_failure_surfaces_as_invocation_error() {
        let processor =
            BackgroundRemovalProcessor::with_factory(&mock_config(), Box::new(FailingFactory));
        let err = processor.transform(&png_bytes(10, 10), "silueta").unwrap_err();
        assert_eq!(err.kind(), "model_invocation_failed");
    }

    #[cfg(feature = "tract")]
    #[test]
    fn test_tract_backend_without_model_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig::builder()
            .backend(BackendType::Tract)
            .models_dir(dir.path())
            .build()
            .unwrap();
        let processor = BackgroundRemovalProcessor::new(&config);
        let err = processor.warm_up("u2net").unwrap_err();
        assert_eq!(err.kind(), "model_unavailable");
    }

    #[test]
    fn test_warm_up_reports_load_once() {
        let processor = BackgroundRemovalProcessor::new(&mock_config());
        assert!(processor.warm_up("u2net").unwrap().is_some());
        assert!(processor.warm_up("u2net").unwrap().is_none());
    }

    #[test]
    fn test_saliency_mask_is_min_max_normalised() {
        let output = Array::from_shape_vec((1, 1, 1, 3), vec![2.0, 3.0, 4.0]).unwrap();
        let mask = saliency_mask(&output).unwrap();
        assert_eq!(mask.as_raw(), &vec![0, 128, 255]);
    }

    #[test]
    fn test_flat_saliency_mask_is_clamped() {
        let output = Array4::from_elem((1, 1, 2, 2), 1.5);
        let mask = saliency_mask(&output).unwrap();
        assert!(mask.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn test_empty_output_is_an_invocation_error() {
        let err = saliency_mask(&Array4::zeros((1, 0, 4, 4))).unwrap_err();
        assert_eq!(err.kind(), "model_invocation_failed");
    }

    #[test]
    fn test_class_label_map_takes_argmax() {
        // Pixel 0 strongly background, pixel 1 strongly class 2
        let output = Array::from_shape_vec(
            (1, 4, 1, 2),
            vec![10.0, -10.0, 0.0, 0.0, 0.0, 10.0, 0.0, 0.0],
        )
        .unwrap();
        let labels = class_label_map(&output, 4).unwrap();
        assert_eq!(labels.as_raw(), &vec![0, 2]);

        let err = class_label_map(&output, 3).unwrap_err();
        assert_eq!(err.kind(), "model_invocation_failed");
    }

    #[test]
    fn test_class_masks_are_hard_and_per_class() {
        let labels = GrayImage::from_raw(4, 1, vec![0, 1, 2, 3]).unwrap();
        let masks = class_masks(&labels, 4, 4, 1);

        assert_eq!(masks.len(), 3);
        assert_eq!(masks[0].as_raw(), &vec![0, 255, 0, 0]);
        assert_eq!(masks[1].as_raw(), &vec![0, 0, 255, 0]);
        assert_eq!(masks[2].as_raw(), &vec![0, 0, 0, 255]);
    }

    #[test]
    fn test_stack_vertically_keeps_order() {
        let top = RgbaImage::from_pixel(3, 1, Rgba([1, 1, 1, 255]));
        let bottom = RgbaImage::from_pixel(3, 2, Rgba([2, 2, 2, 255]));
        let stacked = stack_vertically(&[top, bottom]).unwrap();

        assert_eq!(stacked.dimensions(), (3, 3));
        assert_eq!(stacked.get_pixel(0, 0).0[0], 1);
        assert_eq!(stacked.get_pixel(2, 2).0[0], 2);

        assert!(stack_vertically(&[]).is_err());
    }

    #[test]
    fn test_cloth_segmentation_stacks_three_cutouts() {
        let processor = BackgroundRemovalProcessor::new(&mock_config());
        let output = processor.transform(&png_bytes(40, 20), "u2net_cloth_seg").unwrap();

        let decoded = image::load_from_memory(&output).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (40, 60));
        // The mock gives each class a quarter-width band; cutout k keeps band k
        assert_eq!(decoded.get_pixel(2, 10).0[3], 0);
        assert_eq!(decoded.get_pixel(15, 10).0[3], 255);
        assert_eq!(decoded.get_pixel(15, 30).0[3], 0);
        assert_eq!(decoded.get_pixel(25, 30).0[3], 255);
        assert_eq!(decoded.get_pixel(25, 50).0[3], 0);
        assert_eq!(decoded.get_pixel(35, 50).0[3], 255);
    }

    /// JPEG of `width`x`height` carrying an EXIF orientation tag
    fn jpeg_with_orientation(width: u32, height: u32, orientation: u8) -> Vec<u8> {
        let mut encoded = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image::RgbImage::from_pixel(width, height, image::Rgb([90, 120, 150])))
            .write_to(&mut encoded, ImageFormat::Jpeg)
            .unwrap();
        let jpeg = encoded.into_inner();

        // APP1: "Exif\0\0", big-endian TIFF header, one IFD entry (0x0112, SHORT)
        let mut app1 = vec![0xFF, 0xE1, 0x00, 0x22];
        app1.extend_from_slice(b"Exif\0\0MM\0\x2A\0\0\0\x08");
        app1.extend_from_slice(&[0x00, 0x01]);
        app1.extend_from_slice(&[0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
        app1.extend_from_slice(&[0x00, orientation, 0x00, 0x00]);
        app1.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

        let mut tagged = jpeg[..2].to_vec();
        tagged.extend_from_slice(&app1);
        tagged.extend_from_slice(&jpeg[2..]);
        tagged
    }

    #[test]
    fn test_decode_upload_applies_exif_orientation() {
        let rotated = decode_upload(&jpeg_with_orientation(40, 20, 6)).unwrap();
        assert_eq!(rotated.dimensions(), (20, 40));

        let upright = decode_upload(&jpeg_with_orientation(40, 20, 1)).unwrap();
        assert_eq!(upright.dimensions(), (40, 20));
    }

    #[test]
    fn test_transform_output_follows_exif_orientation() {
        let processor = BackgroundRemovalProcessor::new(&mock_config());
        let output = processor
            .transform(&jpeg_with_orientation(40, 20, 6), "u2net")
            .unwrap();

        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!(decoded.dimensions(), (20, 40));
    }

    #[test]
    fn test_apply_mask_keeps_existing_transparency() {
        let image = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(2, 1, Rgba([10, 20, 30, 128])));
        let mask = GrayImage::from_raw(2, 1, vec![255, 0]).unwrap();
        let result = apply_mask(&image, &mask);

        assert_eq!(result.get_pixel(0, 0).0, [10, 20, 30, 128]);
        assert_eq!(result.get_pixel(1, 0).0, [0, 0, 0, 0]);
    }
}
