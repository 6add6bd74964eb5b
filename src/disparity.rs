//! # General disparity objects
//!
//! This module provides the disparity and entropy maps produced by a stereo network, and the
//! generic algorithm trait they are computed through.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::map::map_colors;

use crate::error::*;
use crate::inference::InferenceResult;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Upper bound of normalised display values.
pub const VISUAL_RANGE: f32 = 255.0;

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

pub type GrayFloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A rectified stereo image pair.
#[derive(Debug, Clone)]
pub struct StereoFrame {
    pub left: RgbImage,
    pub right: RgbImage,
}

/// A floating point disparity map. Invalid pixels hold `+inf`.
#[derive(Debug, Clone)]
pub struct DisparityMap {
    data: GrayFloatImage,
    /// Largest valid disparity, `None` if no pixel is valid.
    pub max_disp: Option<f32>,
    pub min_disp: Option<f32>,
}

/// Per-pixel entropy of the network's matching distribution.
#[derive(Debug, Clone)]
pub struct EntropyMap {
    data: GrayFloatImage,
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait DisparityAlgorithm {
    /// Compute the disparity map of the given stereo frame.
    fn compute(&mut self, frame: &StereoFrame) -> Result<InferenceResult>;
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DisparityMap {
    /// Wraps raw disparities. Infinite and NaN entries are all stored as `+inf`.
    pub fn from_image(mut data: GrayFloatImage) -> Self {
        let mut min_disp: Option<f32> = None;
        let mut max_disp: Option<f32> = None;

        for px in data.pixels_mut() {
            let val = px.0[0];
            if !val.is_finite() {
                px.0[0] = f32::INFINITY;
                continue;
            }

            min_disp = Some(min_disp.map_or(val, |m| m.min(val)));
            max_disp = Some(max_disp.map_or(val, |m| m.max(val)));
        }

        Self {
            data,
            max_disp,
            min_disp,
        }
    }

    pub fn width(&self) -> u32 {
        self.data.width()
    }

    pub fn height(&self) -> u32 {
        self.data.height()
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data.get_pixel(x, y).0[0]
    }

    pub fn is_valid(&self, x: u32, y: u32) -> bool {
        self.get(x, y).is_finite()
    }

    pub fn invalid_count(&self) -> usize {
        self.data.pixels().filter(|px| !px.0[0].is_finite()).count()
    }

    pub fn data(&self) -> &GrayFloatImage {
        &self.data
    }

    /// Disparities scaled into `0..=VISUAL_RANGE` by the largest valid disparity.
    ///
    /// Negative disparities clamp to 0. Invalid pixels stay `+inf`.
    pub fn normalised(&self) -> Result<GrayFloatImage> {
        let max = self.max_disp.ok_or(Error::NoValidDisparity)?;
        let mult = if max > 0.0 { VISUAL_RANGE / max } else { 0.0 };

        Ok(map_colors(&self.data, |Luma([val])| {
            if val.is_finite() {
                Luma([(val * mult).max(0.0).min(VISUAL_RANGE)])
            } else {
                Luma([f32::INFINITY])
            }
        }))
    }

    /// Converts the map to a normalised GrayImage. Invalid pixels are black.
    pub fn to_luma_normalised(&self) -> Result<GrayImage> {
        Ok(to_luma(&self.normalised()?))
    }
}

impl EntropyMap {
    pub fn new(data: GrayFloatImage) -> Self {
        Self { data }
    }

    pub fn width(&self) -> u32 {
        self.data.width()
    }

    pub fn height(&self) -> u32 {
        self.data.height()
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data.get_pixel(x, y).0[0]
    }

    pub fn data(&self) -> &GrayFloatImage {
        &self.data
    }

    pub fn max(&self) -> Option<f32> {
        self.data
            .pixels()
            .map(|px| px.0[0])
            .filter(|val| val.is_finite())
            .fold(None, |acc: Option<f32>, val| Some(acc.map_or(val, |m| m.max(val))))
    }

    /// Entropy scaled into `0..=VISUAL_RANGE` by its own maximum.
    pub fn normalised(&self) -> GrayFloatImage {
        let mult = match self.max() {
            Some(max) if max > 0.0 => VISUAL_RANGE / max,
            _ => 0.0,
        };

        map_colors(&self.data, |Luma([val])| Luma([val * mult]))
    }

    pub fn to_luma_normalised(&self) -> GrayImage {
        to_luma(&self.normalised())
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn to_luma(data: &GrayFloatImage) -> GrayImage {
    map_colors(data, |Luma([mut val])| {
        if !val.is_finite() || val < 0.0 {
            val = 0.0;
        } else if val > 255.0 {
            val = 255.0;
        }

        Luma([val as u8])
    })
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
