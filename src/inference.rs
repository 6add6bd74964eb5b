//! # Stereo inference
//!
//! Prepares an image pair for the network, runs it, and turns the padded network output back
//! into maps at the resolution of the input images.
//!
//! Three sizes are tracked per pair: the original image size, the size after the resolution
//! scale, and the network input size (the scaled size padded up to the network's alignment).
//! Padding rows are added at the top and padding columns on the right; the same amounts are
//! cropped from the output before it is resized back.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use image::{ImageBuffer, RgbImage};
use ndarray::Array4;
use tracing::debug;

use crate::disparity::{
    DisparityAlgorithm, DisparityMap, EntropyMap, GrayFloatImage, StereoFrame,
};
use crate::error::*;
use crate::events::{EventSink, PipelineEvent};
use crate::network::{NetworkOutput, StereoNetwork};
use crate::placement::ModelHandle;
use crate::runtime::{no_grad, ComputeRuntime};
use crate::tensor::{Device, Tensor};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Per-channel RGB mean the network was trained with.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel RGB standard deviation the network was trained with.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub height: usize,
    pub width: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSizes {
    pub original: Size,
    pub scaled: Size,
    pub network: Size,
}

/// Rows added above and columns added to the right of the scaled image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    pub top: usize,
    pub right: usize,
}

/// A stereo pair ready to be fed to the network.
#[derive(Debug, Clone)]
pub struct StereoInput {
    pub left: Tensor,
    pub right: Tensor,
    pub sizes: ImageSizes,
}

#[derive(Debug, Clone)]
pub struct InferenceResult {
    pub disparity: DisparityMap,
    pub entropy: EntropyMap,
    pub sizes: ImageSizes,
    /// Time spent in the forward pass.
    pub elapsed: Duration,
}

/// Runs a placed network as a [`DisparityAlgorithm`].
pub struct NetworkDisparity<'a, N, R: ?Sized, S> {
    handle: &'a ModelHandle<N>,
    runtime: &'a R,
    res_scale: f32,
    sink: S,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Size {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    /// Size of the image after scaling by `scale`, rounded, never empty.
    pub fn scaled(&self, scale: f32) -> Self {
        let scale_dim = |dim: usize| ((dim as f32 * scale).round() as usize).max(1);
        Self::new(scale_dim(self.height), scale_dim(self.width))
    }

    /// Smallest size at least as large whose sides are multiples of `alignment`.
    pub fn aligned(&self, alignment: usize) -> Self {
        let alignment = alignment.max(1);
        let align_dim = |dim: usize| (dim + alignment - 1) / alignment * alignment;
        Self::new(align_dim(self.height), align_dim(self.width))
    }
}

impl ImageSizes {
    pub fn new(original: Size, res_scale: f32, alignment: usize) -> Self {
        let scaled = original.scaled(res_scale);
        Self {
            original,
            scaled,
            network: scaled.aligned(alignment),
        }
    }

    pub fn padding(&self) -> Padding {
        Padding {
            top: self.network.height - self.scaled.height,
            right: self.network.width - self.scaled.width,
        }
    }
}

impl<'a, N, R, S> NetworkDisparity<'a, N, R, S>
where
    N: StereoNetwork,
    R: ComputeRuntime + ?Sized,
    S: EventSink,
{
    pub fn new(handle: &'a ModelHandle<N>, runtime: &'a R, res_scale: f32, sink: S) -> Self {
        Self {
            handle,
            runtime,
            res_scale,
            sink,
        }
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

impl<'a, N, R, S> DisparityAlgorithm for NetworkDisparity<'a, N, R, S>
where
    N: StereoNetwork,
    R: ComputeRuntime + ?Sized,
    S: EventSink,
{
    fn compute(&mut self, frame: &StereoFrame) -> Result<InferenceResult> {
        let input = prepare_pair(
            &frame.left,
            &frame.right,
            self.res_scale,
            self.handle.module().input_alignment(),
        )?;
        infer(self.handle, &input, self.res_scale, self.runtime, &mut self.sink)
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Scales, normalises and pads both images into `[1, 3, H, W]` CPU tensors.
pub fn prepare_pair(
    left: &RgbImage,
    right: &RgbImage,
    res_scale: f32,
    alignment: usize,
) -> Result<StereoInput> {
    if left.dimensions() != right.dimensions() {
        return Err(Error::ImagePairMismatch {
            left: left.dimensions(),
            right: right.dimensions(),
        });
    }
    if !(res_scale.is_finite() && res_scale > 0.0) {
        return Err(Error::InvalidScale(res_scale));
    }

    let original = Size::new(left.height() as usize, left.width() as usize);
    let sizes = ImageSizes::new(original, res_scale, alignment);
    debug!(?sizes, "prepared stereo pair");

    Ok(StereoInput {
        left: to_network_tensor(left, &sizes),
        right: to_network_tensor(right, &sizes),
        sizes,
    })
}

fn to_network_tensor(img: &RgbImage, sizes: &ImageSizes) -> Tensor {
    let scaled = if sizes.scaled == sizes.original {
        img.clone()
    } else {
        imageops::resize(
            img,
            sizes.scaled.width as u32,
            sizes.scaled.height as u32,
            FilterType::CatmullRom,
        )
    };

    let pad = sizes.padding();
    let mut data = Array4::<f32>::zeros((1, 3, sizes.network.height, sizes.network.width));
    for (x, y, px) in scaled.enumerate_pixels() {
        for c in 0..3 {
            let val = f32::from(px.0[c]) / 255.0;
            data[[0, c, y as usize + pad.top, x as usize]] =
                (val - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    Tensor::new(data.into_dyn(), Device::Cpu)
}

/// Runs the forward pass without gradient tracking, after moving the inputs to the model's
/// device.
pub fn run_network<N: StereoNetwork>(
    handle: &ModelHandle<N>,
    input: &StereoInput,
) -> Result<(NetworkOutput, Duration)> {
    let device = handle.primary_device();
    let left = input.left.to_device(device);
    let right = input.right.to_device(device);

    let start = Instant::now();
    let output = no_grad(|| handle.forward(&left, &right))?;
    Ok((output, start.elapsed()))
}

/// Crops the padding off the network output and resizes it to the original image size.
pub fn postprocess(
    output: NetworkOutput,
    sizes: &ImageSizes,
    res_scale: f32,
) -> Result<(DisparityMap, EntropyMap)> {
    let disparity = tensor_to_image(output.disparity, "disparity", sizes)?;
    let entropy = tensor_to_image(output.entropy, "entropy", sizes)?;

    let mut disparity = crop_padding(&disparity, sizes);
    let entropy = crop_padding(&entropy, sizes);

    // disparities are measured in scaled pixels
    for px in disparity.pixels_mut() {
        px.0[0] /= res_scale;
    }

    let disparity = resize_linear(&disparity, sizes.original);
    let entropy = resize_linear(&entropy, sizes.original);

    Ok((DisparityMap::from_image(disparity), EntropyMap::new(entropy)))
}

/// Full inference on a prepared pair. The device cache is released once afterwards.
pub fn infer<N, R, S>(
    handle: &ModelHandle<N>,
    input: &StereoInput,
    res_scale: f32,
    runtime: &R,
    sink: &mut S,
) -> Result<InferenceResult>
where
    N: StereoNetwork,
    R: ComputeRuntime + ?Sized,
    S: EventSink + ?Sized,
{
    let (output, elapsed) = run_network(handle, input)?;
    let (disparity, entropy) = postprocess(output, &input.sizes, res_scale)?;
    sink.emit(PipelineEvent::InferenceCompleted { elapsed });

    let device = handle.primary_device();
    runtime.empty_cache(device);
    sink.emit(PipelineEvent::CacheReleased { device });

    Ok(InferenceResult {
        disparity,
        entropy,
        sizes: input.sizes,
        elapsed,
    })
}

/// Moves `tensor` to the CPU and views it as a single channel image of the network input size.
///
/// Any number of leading unit dimensions is accepted.
fn tensor_to_image(
    tensor: Tensor,
    what: &'static str,
    sizes: &ImageSizes,
) -> Result<GrayFloatImage> {
    let expected = [sizes.network.height, sizes.network.width];
    let shape = tensor.shape().to_vec();
    let shape_err = || Error::OutputShape {
        what,
        expected: expected.to_vec(),
        actual: shape.clone(),
    };

    let leading_ok = shape.len() >= 2 && shape[..shape.len() - 2].iter().all(|&d| d == 1);
    if !leading_ok || shape[shape.len() - 2..] != expected {
        return Err(shape_err());
    }

    let values: Vec<f32> = tensor
        .into_device(Device::Cpu)
        .into_data()
        .iter()
        .copied()
        .collect();
    ImageBuffer::from_raw(expected[1] as u32, expected[0] as u32, values).ok_or_else(shape_err)
}

/// Removes the top padding rows and right padding columns.
pub fn crop_padding(img: &GrayFloatImage, sizes: &ImageSizes) -> GrayFloatImage {
    let pad = sizes.padding();
    imageops::crop_imm(
        img,
        0,
        pad.top as u32,
        sizes.scaled.width as u32,
        sizes.scaled.height as u32,
    )
    .to_image()
}

/// Bilinear resize with pixel centres aligned and edges clamped.
///
/// Zero-weight neighbours are skipped so that an invalid pixel only spreads to outputs it
/// actually contributes to.
pub fn resize_linear(img: &GrayFloatImage, size: Size) -> GrayFloatImage {
    let (src_w, src_h) = img.dimensions();
    let x_ratio = src_w as f32 / size.width as f32;
    let y_ratio = src_h as f32 / size.height as f32;

    ImageBuffer::from_fn(size.width as u32, size.height as u32, |x, y| {
        let (x0, x1, fx) = sample_coords(x, x_ratio, src_w);
        let (y0, y1, fy) = sample_coords(y, y_ratio, src_h);
        let at = |sx: u32, sy: u32| img.get_pixel(sx, sy).0[0];

        let top = lerp(at(x0, y0), at(x1, y0), fx);
        let bottom = lerp(at(x0, y1), at(x1, y1), fx);
        image::Luma([lerp(top, bottom, fy)])
    })
}

/// Source neighbours and weight of the second one for destination index `dst`.
fn sample_coords(dst: u32, ratio: f32, src_len: u32) -> (u32, u32, f32) {
    let src = ((dst as f32 + 0.5) * ratio - 0.5).max(0.0);
    let i0 = (src.floor() as u32).min(src_len - 1);
    let i1 = (i0 + 1).min(src_len - 1);
    let frac = if i0 == i1 { 0.0 } else { src - i0 as f32 };
    (i0, i1, frac)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    if t <= 0.0 || a == b {
        a
    } else if t >= 1.0 {
        b
    } else {
        a * (1.0 - t) + b * t
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_of_half_scale_megapixel() {
        let sizes = ImageSizes::new(Size::new(1000, 1000), 0.5, 64);
        assert_eq!(sizes.scaled, Size::new(500, 500));
        assert_eq!(sizes.network, Size::new(512, 512));
        assert_eq!(sizes.padding(), Padding { top: 12, right: 12 });
    }

    #[test]
    fn aligned_sizes_are_untouched() {
        assert_eq!(Size::new(128, 64).aligned(64), Size::new(128, 64));
        assert_eq!(Size::new(1, 65).aligned(64), Size::new(64, 128));
    }

    #[test]
    fn scaled_size_never_empty() {
        assert_eq!(Size::new(3, 3).scaled(0.01), Size::new(1, 1));
    }

    #[test]
    fn resize_constant_stays_constant() {
        let img = GrayFloatImage::from_pixel(7, 5, image::Luma([3.5]));
        let out = resize_linear(&img, Size::new(13, 21));
        assert_eq!(out.dimensions(), (21, 13));
        assert!(out.pixels().all(|px| (px.0[0] - 3.5).abs() < 1e-6));
    }

    #[test]
    fn resize_upscale_interpolates_between_centres() {
        let img = GrayFloatImage::from_raw(2, 1, vec![0.0, 4.0]).unwrap();
        let out = resize_linear(&img, Size::new(1, 4));
        let row: Vec<f32> = out.pixels().map(|px| px.0[0]).collect();
        assert_eq!(row, vec![0.0, 1.0, 3.0, 4.0]);
    }

    #[test]
    fn crop_removes_top_rows_and_right_columns() {
        let sizes = ImageSizes {
            original: Size::new(2, 2),
            scaled: Size::new(2, 2),
            network: Size::new(3, 4),
        };
        let img = GrayFloatImage::from_fn(4, 3, |x, y| image::Luma([(y * 10 + x) as f32]));
        let cropped = crop_padding(&img, &sizes);
        let values: Vec<f32> = cropped.pixels().map(|px| px.0[0]).collect();
        assert_eq!(values, vec![10.0, 11.0, 20.0, 21.0]);
    }
}
