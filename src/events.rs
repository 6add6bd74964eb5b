//! # Pipeline events
//!
//! Structured diagnostics emitted during a pipeline run. Callers choose where they go by handing
//! an [`EventSink`] to the run.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::export::ExportStrategy;
use crate::tensor::Device;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// No checkpoint was given, the network keeps its random initialisation.
    RandomInit,
    CheckpointApplied {
        path: PathBuf,
        applied: usize,
        dropped: Vec<String>,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    ParameterCount {
        total: usize,
    },
    LevelChanged {
        requested: u32,
        level: u32,
        changed: bool,
    },
    GraphExported {
        strategy: ExportStrategy,
        path: PathBuf,
    },
    InferenceCompleted {
        elapsed: Duration,
    },
    CacheReleased {
        device: Device,
    },
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait EventSink {
    fn emit(&mut self, event: PipelineEvent);
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub events: Vec<PipelineEvent>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl EventSink for TracingSink {
    fn emit(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::RandomInit => debug!("run with random init"),
            PipelineEvent::CheckpointApplied {
                path,
                applied,
                dropped,
                missing,
                unexpected,
            } => debug!(
                path = %path.display(),
                applied,
                dropped = dropped.len(),
                missing = missing.len(),
                unexpected = unexpected.len(),
                "checkpoint applied"
            ),
            PipelineEvent::ParameterCount { total } => {
                debug!("Number of model parameters: {}", total)
            }
            PipelineEvent::LevelChanged {
                requested,
                level,
                changed,
            } => {
                if changed {
                    info!("level set to {}", level)
                } else {
                    info!(requested, "could not change level {}", level)
                }
            }
            PipelineEvent::GraphExported { strategy, path } => {
                info!(%strategy, path = %path.display(), "graph exported")
            }
            PipelineEvent::InferenceCompleted { elapsed } => {
                info!("inference took {:.3}s", elapsed.as_secs_f64())
            }
            PipelineEvent::CacheReleased { device } => debug!(%device, "released device cache"),
        }
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: PipelineEvent) {
        self.events.push(event);
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: PipelineEvent) {
        (**self).emit(event)
    }
}
