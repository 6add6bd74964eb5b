//! Mock network and runtime shared by the integration tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::path::Path;

use hsm_deploy::checkpoint::Checkpoint;
use hsm_deploy::prelude::*;
use hsm_deploy::{Error, Result};
use image::{Rgb, RgbImage};
use ndarray::{ArrayD, IxDyn};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Value every freshly constructed parameter holds.
pub const FRESH: f32 = 0.5;

/// Disparity the mock reports for every valid pixel, in network input pixels.
pub const MOCK_DISPARITY: f32 = 8.0;

thread_local! {
    static CONSTRUCTED: Cell<usize> = Cell::new(0);
}

// -----------------------------------------------------------------------------------------------
// MOCK NETWORK
// -----------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct MockNet {
    max_disp: f32,
    clean: f32,
    level: u32,
    params: ParameterStore,
    pub training: bool,
    /// Bottom rows of the output set to NaN.
    pub nan_rows: usize,
    pub fail_capture: bool,
    /// Gradient mode observed by the last forward pass or capture.
    pub grad_seen: Cell<Option<bool>>,
}

impl MockNet {
    pub fn constructed() -> usize {
        CONSTRUCTED.with(Cell::get)
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}

impl StereoNetwork for MockNet {
    fn construct(max_disparity: f32, clean: f32) -> Self {
        CONSTRUCTED.with(|c| c.set(c.get() + 1));

        let mut params = ParameterStore::new();
        params.insert("disp_head.weight", Tensor::full(&[2, 2], FRESH, Device::Cpu));
        params.insert("encoder.weight", Tensor::full(&[3], FRESH, Device::Cpu));
        params.insert("decoder.bias", Tensor::full(&[1], FRESH, Device::Cpu));

        Self {
            // whole cost volume slices only
            max_disp: ((max_disparity / 64.0).floor() * 64.0).max(64.0),
            clean,
            level: 1,
            params,
            training: true,
            nan_rows: 0,
            fail_capture: false,
            grad_seen: Cell::new(None),
        }
    }

    fn max_disparity(&self) -> f32 {
        self.max_disp
    }

    fn set_level(&mut self, level: u32) -> (u32, bool) {
        if (1..=2).contains(&level) {
            let changed = level != self.level;
            self.level = level;
            (level, changed)
        } else {
            (self.level, false)
        }
    }

    fn forward(&self, left: &Tensor, right: &Tensor) -> Result<NetworkOutput> {
        self.grad_seen.set(Some(hsm_deploy::runtime::is_grad_enabled()));

        let shape = left.shape().to_vec();
        if shape != right.shape() || shape.len() != 4 || shape[1] != 3 {
            return Err(Error::Forward(format!("bad input shape {:?}", shape)));
        }
        let (h, w) = (shape[2], shape[3]);
        if h % 64 != 0 || w % 64 != 0 {
            return Err(Error::Forward(format!("{}x{} is not a multiple of 64", h, w)));
        }
        for device in self.params.devices() {
            if device != left.device() {
                return Err(Error::Forward(format!(
                    "input on {} but weights on {}",
                    left.device(),
                    device
                )));
            }
        }

        let entropy = ArrayD::from_shape_fn(IxDyn(&[1, h, w]), |idx| idx[2] as f32 / w as f32);
        let disparity = ArrayD::from_shape_fn(IxDyn(&[1, h, w]), |idx| {
            if idx[1] >= h - self.nan_rows {
                f32::NAN
            } else if self.clean >= 0.0 && entropy[[0, idx[1], idx[2]]] > self.clean {
                f32::INFINITY
            } else {
                MOCK_DISPARITY
            }
        });

        Ok(NetworkOutput {
            disparity: Tensor::new(disparity, left.device()),
            entropy: Tensor::new(entropy, left.device()),
            auxiliary: Vec::new(),
        })
    }

    fn parameters(&self) -> &ParameterStore {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParameterStore {
        &mut self.params
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn capture_graph(&self, mode: CaptureMode, left: &Tensor, right: &Tensor) -> Result<Vec<u8>> {
        self.grad_seen.set(Some(hsm_deploy::runtime::is_grad_enabled()));
        if self.fail_capture {
            return Err(Error::Forward("aten::grid_sampler is not supported".into()));
        }
        Ok(format!("{:?} {:?} {:?}", mode, left.shape(), right.shape()).into_bytes())
    }
}

// -----------------------------------------------------------------------------------------------
// MOCK RUNTIME
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MockRuntime {
    pub gpus: usize,
    pub releases: RefCell<Vec<Device>>,
}

impl MockRuntime {
    pub fn with_gpus(gpus: usize) -> Self {
        Self {
            gpus,
            releases: RefCell::new(Vec::new()),
        }
    }
}

impl ComputeRuntime for MockRuntime {
    fn cuda_device_count(&self) -> usize {
        self.gpus
    }

    fn empty_cache(&self, device: Device) {
        self.releases.borrow_mut().push(device);
    }
}

// -----------------------------------------------------------------------------------------------
// HELPERS
// -----------------------------------------------------------------------------------------------

pub fn frame(width: u32, height: u32) -> StereoFrame {
    let left = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 255]));
    let right = RgbImage::from_fn(width, height, |x, y| {
        Rgb([((x + 3) % 256) as u8, (y % 256) as u8, 255])
    });
    StereoFrame { left, right }
}

pub fn array(shape: &[usize], values: Vec<f32>) -> ArrayD<f32> {
    ArrayD::from_shape_vec(IxDyn(shape), values).unwrap()
}

/// The checkpoint of the `disp_head` / `encoder` scenario, with an unrelated top-level field.
pub fn write_scenario_checkpoint(path: &Path, prefix: &str) {
    let mut checkpoint = Checkpoint::default();
    checkpoint.state_dict.insert(
        format!("{}disp_head.weight", prefix),
        array(&[2, 2], vec![9.0; 4]),
    );
    checkpoint.state_dict.insert(
        format!("{}encoder.weight", prefix),
        array(&[3], vec![1.0, 2.0, 3.0]),
    );

    let mut value = serde_json::to_value(&checkpoint).unwrap();
    value["epoch"] = serde_json::json!(10);
    std::fs::write(path, serde_json::to_vec(&value).unwrap()).unwrap();
}

pub fn cpu_config(checkpoint: Option<&Path>) -> ModelConfig {
    ModelConfig {
        checkpoint: checkpoint.map(Path::to_path_buf),
        device: DeviceSelection::Cpu,
        ..ModelConfig::default()
    }
}

pub fn values(tensor: &Tensor) -> Vec<f32> {
    tensor.data().iter().copied().collect()
}
