//! # Pipeline configuration
//!
//! Every knob of a deployment run. Every field has a default, so an empty JSON object is a valid
//! configuration.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::*;
use crate::export::ExportStrategy;
use crate::placement::DeviceSelection;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Pyramid levels the network can output from. Level 1 is the finest.
pub const LEVELS: std::ops::RangeInclusive<u32> = 1..=3;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Checkpoint to load. `None` keeps the random initialisation.
    pub checkpoint: Option<PathBuf>,
    pub max_disparity: f32,
    /// Entropy threshold for cleaning the output, negative to disable.
    pub clean: f32,
    pub device: DeviceSelection,
    /// The checkpoint was saved from a network wrapped in a replication layer.
    pub replicated_checkpoint: bool,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    pub res_scale: f32,
    pub level: u32,
    /// Graph artifact to produce before inference, if any.
    pub export: Option<ExportStrategy>,
    pub out_dir: PathBuf,
    pub out_filename: String,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            checkpoint: None,
            max_disparity: 128.0,
            clean: -1.0,
            device: DeviceSelection::Auto,
            replicated_checkpoint: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            res_scale: 1.0,
            level: 1,
            export: None,
            out_dir: PathBuf::from("output"),
            out_filename: String::from("model_graph"),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.res_scale.is_finite() && self.res_scale > 0.0) {
            return Err(Error::InvalidScale(self.res_scale));
        }
        if !LEVELS.contains(&self.level) {
            return Err(Error::InvalidConfig(format!(
                "level must be in {}..={}, got {}",
                LEVELS.start(),
                LEVELS.end(),
                self.level
            )));
        }
        if !(self.model.max_disparity.is_finite() && self.model.max_disparity > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "max disparity must be positive, got {}",
                self.model.max_disparity
            )));
        }
        Ok(())
    }

    /// Name shared by every artifact of this run, for a network built with `max_disparity`.
    pub fn model_name(&self, max_disparity: f32) -> String {
        format!(
            "{}-max_disp_{}-clean_{}-res_scale_{}-level_{}",
            self.out_filename, max_disparity, self.model.clean, self.res_scale, self.level
        )
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.model.device, DeviceSelection::Auto);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_model_section() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{ "model": { "max_disparity": 384, "device": "cpu" }, "export": "trace" }"#,
        )
        .unwrap();
        assert_eq!(config.model.max_disparity, 384.0);
        assert_eq!(config.model.clean, -1.0);
        assert_eq!(config.export, Some(ExportStrategy::Trace));
    }

    #[test]
    fn model_name_format() {
        let config = PipelineConfig {
            res_scale: 0.5,
            ..PipelineConfig::default()
        };
        assert_eq!(
            config.model_name(192.0),
            "model_graph-max_disp_192-clean_-1-res_scale_0.5-level_1"
        );
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.res_scale = 0.0;
        assert!(matches!(config.validate(), Err(Error::InvalidScale(_))));

        config.res_scale = 1.0;
        config.level = 4;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
