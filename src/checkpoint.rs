//! # Checkpoint loading
//!
//! Reads a serialized state dict, places its tensors on the target device, drops the disparity
//! regression parameters and applies the rest non-strictly to a placed model.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::*;
use crate::events::{EventSink, PipelineEvent};
use crate::network::StereoNetwork;
use crate::placement::ModelHandle;
use crate::tensor::{Device, LoadReport, ParameterMap, Tensor};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Parameters whose name contains this are tied to the maximum disparity the checkpoint was
/// trained with and are never loaded.
pub const DISPARITY_MARKER: &str = "disp";

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// On-disk checkpoint. Only the state dict is read, any other field is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub state_dict: BTreeMap<String, ArrayD<f32>>,
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    Json,
    MessagePack,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl CheckpointFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "msgpack" | "mpk" | "bin" => Some(Self::MessagePack),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

impl Checkpoint {
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::CheckpointNotFound(path.to_path_buf()));
        }
        let format = CheckpointFormat::from_path(path)
            .ok_or_else(|| Error::UnsupportedFormat(path.to_path_buf()))?;

        let reader = BufReader::new(File::open(path)?);
        let decoded: std::result::Result<Self, String> = match format {
            CheckpointFormat::Json => serde_json::from_reader(reader).map_err(|e| e.to_string()),
            CheckpointFormat::MessagePack => {
                rmp_serde::from_read(reader).map_err(|e| e.to_string())
            }
        };

        decoded.map_err(|reason| Error::CheckpointDecode {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let format = CheckpointFormat::from_path(path)
            .ok_or_else(|| Error::UnsupportedFormat(path.to_path_buf()))?;

        let mut writer = BufWriter::new(File::create(path)?);
        let encoded = match format {
            CheckpointFormat::Json => {
                serde_json::to_writer(&mut writer, self).map_err(|e| e.to_string())
            }
            CheckpointFormat::MessagePack => rmp_serde::encode::write_named(&mut writer, self)
                .map_err(|e| e.to_string()),
        };
        encoded.map_err(|reason| Error::CheckpointEncode {
            path: path.to_path_buf(),
            reason,
        })?;
        writer.flush()?;

        Ok(())
    }

    /// Converts the state dict into tensors residing on `device`.
    pub fn into_parameters(self, device: Device) -> ParameterMap {
        self.state_dict
            .into_iter()
            .map(|(name, data)| (name, Tensor::new(data, device)))
            .collect()
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Splits off every parameter whose name contains [`DISPARITY_MARKER`].
///
/// Returns the remaining parameters and the names that were dropped.
pub fn filter_disparity_parameters(params: ParameterMap) -> (ParameterMap, Vec<String>) {
    let mut kept = ParameterMap::new();
    let mut dropped = Vec::new();

    for (name, tensor) in params {
        if name.contains(DISPARITY_MARKER) {
            dropped.push(name);
        } else {
            kept.insert(name, tensor);
        }
    }

    (kept, dropped)
}

/// Loads the checkpoint at `source` into `handle`, or keeps the random initialisation when no
/// source is given.
///
/// Tensors are placed on `device` while decoding. Emits the total parameter count either way.
pub fn apply_checkpoint<N, S>(
    handle: &mut ModelHandle<N>,
    source: Option<&Path>,
    device: Device,
    sink: &mut S,
) -> Result<Option<LoadReport>>
where
    N: StereoNetwork,
    S: EventSink + ?Sized,
{
    let report = match source {
        Some(path) => {
            debug!(path = %path.display(), %device, "loading checkpoint");
            let params = Checkpoint::read(path)?.into_parameters(device);
            let (kept, dropped) = filter_disparity_parameters(params);
            let report = handle.load_parameters(kept)?;

            sink.emit(PipelineEvent::CheckpointApplied {
                path: path.to_path_buf(),
                applied: report.applied.len(),
                dropped,
                missing: report.missing.clone(),
                unexpected: report.unexpected.clone(),
            });
            Some(report)
        }
        None => {
            sink.emit(PipelineEvent::RandomInit);
            None
        }
    };

    sink.emit(PipelineEvent::ParameterCount {
        total: handle.parameters().total_numel(),
    });

    Ok(report)
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_path() {
        assert_eq!(
            CheckpointFormat::from_path(Path::new("hsm.json")),
            Some(CheckpointFormat::Json)
        );
        assert_eq!(
            CheckpointFormat::from_path(Path::new("/models/final-768px.MPK")),
            Some(CheckpointFormat::MessagePack)
        );
        assert_eq!(CheckpointFormat::from_path(Path::new("final.tar")), None);
        assert_eq!(CheckpointFormat::from_path(Path::new("final")), None);
    }

    #[test]
    fn marker_is_a_plain_substring() {
        let mut params = ParameterMap::new();
        for name in &["disp_reg8.weight", "module.decoder6.disp.bias", "feature.conv1.weight"] {
            params.insert(name.to_string(), Tensor::zeros(&[1], Device::Cpu));
        }

        let (kept, dropped) = filter_disparity_parameters(params);
        assert_eq!(kept.keys().collect::<Vec<_>>(), vec!["feature.conv1.weight"]);
        assert_eq!(dropped.len(), 2);
    }
}
