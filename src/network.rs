//! # Stereo network capability
//!
//! The interface a stereo matching network has to offer to be loaded, placed, exported and run
//! by this crate. The layers behind it are not part of this crate.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use crate::error::*;
use crate::tensor::{ParameterStore, Tensor};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Input side lengths must be multiples of this unless the network says otherwise.
pub const DEFAULT_INPUT_ALIGNMENT: usize = 64;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Raw output of one forward pass, at network input resolution.
#[derive(Debug, Clone)]
pub struct NetworkOutput {
    pub disparity: Tensor,
    /// Per-pixel entropy of the matching cost. Lower is more reliable.
    pub entropy: Tensor,
    pub auxiliary: Vec<Tensor>,
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// How a network should capture its computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Record the operations executed for the example input.
    ///
    /// `check_trace` re-runs the trace and compares both graphs.
    Trace { check_trace: bool },

    /// Compile the network's control flow. The example input is only used for shape inference.
    Script,
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait StereoNetwork {
    /// Build a freshly initialised network.
    ///
    /// `clean` is the entropy threshold above which the network marks disparities invalid; a
    /// negative value disables it.
    fn construct(max_disparity: f32, clean: f32) -> Self
    where
        Self: Sized;

    fn max_disparity(&self) -> f32;

    /// Select the output pyramid level. Returns the level now in effect and whether it changed.
    fn set_level(&mut self, level: u32) -> (u32, bool);

    /// Run the network. Both inputs are `[1, 3, H, W]` on the network's device.
    fn forward(&self, left: &Tensor, right: &Tensor) -> Result<NetworkOutput>;

    fn parameters(&self) -> &ParameterStore;

    fn parameters_mut(&mut self) -> &mut ParameterStore;

    fn input_alignment(&self) -> usize {
        DEFAULT_INPUT_ALIGNMENT
    }

    fn set_training(&mut self, _training: bool) {}

    /// Serialise the network's computation for the given example input.
    fn capture_graph(&self, _mode: CaptureMode, _left: &Tensor, _right: &Tensor) -> Result<Vec<u8>> {
        Err(Error::CaptureUnsupported)
    }
}
