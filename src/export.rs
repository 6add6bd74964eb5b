//! # Graph export
//!
//! Produces a deployable graph of a placed network for one example input. Two strategies exist
//! and each artifact is produced by exactly one of them:
//!
//! - **trace** records the operations executed for the example input. Data dependent branches
//!   are frozen to the path that was taken. The trace consistency check is switched off: two
//!   traces of the same network can differ in internal layout and make the check fail
//!   spuriously.
//! - **script** compiles the network's own control flow; the example input only drives shape
//!   inference.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fmt;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::*;
use crate::inference::StereoInput;
use crate::network::{CaptureMode, StereoNetwork};
use crate::placement::ModelHandle;
use crate::runtime::no_grad;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStrategy {
    Trace,
    Script,
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A captured graph, ready to be written once.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphArtifact {
    pub strategy: ExportStrategy,
    /// Shapes of the left and right example inputs.
    pub input_shapes: [Vec<usize>; 2],
    pub bytes: Vec<u8>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl ExportStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ExportStrategy::Trace => "trace",
            ExportStrategy::Script => "script",
        }
    }

    fn capture_mode(&self) -> CaptureMode {
        match self {
            ExportStrategy::Trace => CaptureMode::Trace { check_trace: false },
            ExportStrategy::Script => CaptureMode::Script,
        }
    }
}

impl fmt::Display for ExportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl GraphArtifact {
    /// File name for this artifact of the model called `model_name`.
    pub fn file_name(&self, model_name: &str) -> String {
        format!("{}-{}.pt", model_name, self.strategy)
    }

    /// Writes the artifact to `path`. An existing file is never replaced.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::ArtifactExists(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&self.bytes)?;
        file.sync_all()?;
        Ok(())
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Captures the graph of the network behind `handle` with `strategy`, using `input` as the
/// example.
pub fn export_graph<N: StereoNetwork>(
    handle: &ModelHandle<N>,
    strategy: ExportStrategy,
    input: &StereoInput,
) -> Result<GraphArtifact> {
    debug!(%strategy, "capturing graph");

    let device = handle.primary_device();
    let left = input.left.to_device(device);
    let right = input.right.to_device(device);

    let bytes = no_grad(|| {
        handle
            .module()
            .capture_graph(strategy.capture_mode(), &left, &right)
    })
    .map_err(|e| Error::Export {
        strategy,
        reason: e.to_string(),
    })?;

    Ok(GraphArtifact {
        strategy,
        input_shapes: [left.shape().to_vec(), right.shape().to_vec()],
        bytes,
    })
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_never_checks() {
        assert_eq!(
            ExportStrategy::Trace.capture_mode(),
            CaptureMode::Trace { check_trace: false }
        );
    }

    #[test]
    fn artifact_file_name() {
        let artifact = GraphArtifact {
            strategy: ExportStrategy::Script,
            input_shapes: [vec![1, 3, 64, 64], vec![1, 3, 64, 64]],
            bytes: Vec::new(),
        };
        assert_eq!(artifact.file_name("hsm"), "hsm-script.pt");
    }
}
