//! # Deployment pipeline
//!
//! One run: load and place the network, select its output level, optionally export a graph
//! artifact, and run inference on a stereo frame.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fs;
use std::path::PathBuf;

use tracing::{field, info_span};

use crate::config::PipelineConfig;
use crate::disparity::StereoFrame;
use crate::error::*;
use crate::events::{EventSink, PipelineEvent};
use crate::export::export_graph;
use crate::inference::{infer, prepare_pair, InferenceResult};
use crate::network::StereoNetwork;
use crate::placement::{load_model, DeviceContext};
use crate::runtime::ComputeRuntime;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

pub struct Pipeline<'r, R: ?Sized, S> {
    config: PipelineConfig,
    runtime: &'r R,
    sink: S,
}

#[derive(Debug)]
pub struct PipelineOutput {
    pub result: InferenceResult,
    pub context: DeviceContext,
    /// Where the graph artifact was written, if one was requested.
    pub artifact_path: Option<PathBuf>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl<'r, R, S> Pipeline<'r, R, S>
where
    R: ComputeRuntime + ?Sized,
    S: EventSink,
{
    pub fn new(config: PipelineConfig, runtime: &'r R, sink: S) -> Self {
        Self {
            config,
            runtime,
            sink,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Gives back the sink with everything it received.
    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn run<N: StereoNetwork>(&mut self, frame: &StereoFrame) -> Result<PipelineOutput> {
        self.config.validate()?;

        let span = info_span!("pipeline", model = field::Empty);
        let _enter = span.enter();

        let loaded = load_model::<N, _, _>(&self.config.model, self.runtime, &mut self.sink)?;
        let mut handle = loaded.handle;

        let model_name = self.config.model_name(handle.module().max_disparity());
        span.record("model", &field::display(&model_name));

        let module = handle.module_mut();
        module.set_training(false);
        if self.config.level != 1 {
            let (level, changed) = module.set_level(self.config.level);
            self.sink.emit(PipelineEvent::LevelChanged {
                requested: self.config.level,
                level,
                changed,
            });
        }

        let input = prepare_pair(
            &frame.left,
            &frame.right,
            self.config.res_scale,
            handle.module().input_alignment(),
        )?;

        let artifact_path = match self.config.export {
            Some(strategy) => {
                let artifact = export_graph(&handle, strategy, &input)?;
                fs::create_dir_all(&self.config.out_dir)?;
                let path = self.config.out_dir.join(artifact.file_name(&model_name));
                artifact.write_to(&path)?;

                self.sink.emit(PipelineEvent::GraphExported {
                    strategy,
                    path: path.clone(),
                });
                Some(path)
            }
            None => None,
        };

        let result = infer(
            &handle,
            &input,
            self.config.res_scale,
            self.runtime,
            &mut self.sink,
        )?;

        Ok(PipelineOutput {
            result,
            context: loaded.context,
            artifact_path,
        })
    }
}
