//! # Stereo Network Deployment
//!
//! This crate loads a pretrained stereo matching network onto a compute device, optionally
//! exports its graph for deployment, and runs stereo pairs through it to produce disparity and
//! entropy maps at the resolution of the input images.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod checkpoint;
pub mod config;
mod disparity;
mod error;
pub mod events;
pub mod export;
pub mod inference;
pub mod network;
pub mod pipeline;
pub mod placement;
pub mod runtime;
pub mod tensor;

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub use error::{Error, Result};

pub mod prelude {
    pub use crate::config::{ModelConfig, PipelineConfig};
    pub use crate::disparity::{
        DisparityAlgorithm, DisparityMap, EntropyMap, GrayFloatImage, StereoFrame, VISUAL_RANGE,
    };
    pub use crate::events::{EventSink, PipelineEvent, RecordingSink, TracingSink};
    pub use crate::export::{export_graph, ExportStrategy, GraphArtifact};
    pub use crate::inference::{InferenceResult, NetworkDisparity};
    pub use crate::network::{CaptureMode, NetworkOutput, StereoNetwork};
    pub use crate::pipeline::{Pipeline, PipelineOutput};
    pub use crate::placement::{load_model, DeviceContext, DeviceSelection, ModelHandle};
    pub use crate::runtime::{ComputeRuntime, CpuRuntime};
    pub use crate::tensor::{Device, ParameterStore, Tensor};
}
