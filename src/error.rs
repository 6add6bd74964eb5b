//! # Error standards
//!
//! This module provides a standardised error enum and result type for this crate.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::PathBuf;

use crate::export::ExportStrategy;
use crate::tensor::Device;

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

/// Standard result type used in the deployment crate.
pub type Result<T> = std::result::Result<T, Error>;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(PathBuf),

    #[error("Unsupported checkpoint format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("Failed to decode checkpoint {path}: {reason}")]
    CheckpointDecode { path: PathBuf, reason: String },

    #[error("Failed to encode checkpoint {path}: {reason}")]
    CheckpointEncode { path: PathBuf, reason: String },

    #[error("Parameter {name} has shape {actual:?} but the network expects {expected:?}")]
    ParameterShape {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Requested device {0} is not available")]
    DeviceUnavailable(Device),

    #[error("{what} is on {actual} but the model runs on {expected}")]
    DeviceMismatch {
        what: String,
        expected: Device,
        actual: Device,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Resolution scale must be positive and finite, got {0}")]
    InvalidScale(f32),

    #[error("Left image is {left:?} but right image is {right:?}")]
    ImagePairMismatch { left: (u32, u32), right: (u32, u32) },

    #[error("Network output {what} has shape {actual:?}, expected {expected:?}")]
    OutputShape {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Invalid tensor shape: {0}")]
    TensorShape(#[from] ndarray::ShapeError),

    #[error("Forward pass failed: {0}")]
    Forward(String),

    #[error("Graph capture is not supported by this network")]
    CaptureUnsupported,

    #[error("{strategy} export failed: {reason}")]
    Export {
        strategy: ExportStrategy,
        reason: String,
    },

    #[error("Graph artifact already exists: {0}")]
    ArtifactExists(PathBuf),

    #[error("Disparity map contains no valid values")]
    NoValidDisparity,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
