//! # Device placement
//!
//! Decides where the network runs and whether it is wrapped in a replication layer, and builds
//! the ready-to-run [`ModelHandle`].
//!
//! The four placements are:
//!
//! | device | replicated checkpoint | placement                                            |
//! |--------|-----------------------|------------------------------------------------------|
//! | GPU    | yes                   | wrap, move to GPU, load                              |
//! | GPU    | no                    | move to GPU, load, then wrap on a single device      |
//! | CPU    | yes                   | wrap with an empty device list, load                 |
//! | CPU    | no                    | load, stay direct                                    |
//!
//! The checkpoint must be loaded into the same shape of handle it was saved from, since the
//! replication layer prefixes every parameter name with `module.`.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkpoint::apply_checkpoint;
use crate::config::ModelConfig;
use crate::error::*;
use crate::events::EventSink;
use crate::network::{NetworkOutput, StereoNetwork};
use crate::runtime::ComputeRuntime;
use crate::tensor::{Device, LoadReport, ParameterMap, ParameterStore, Tensor};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Name prefix the replication layer adds to the wrapped network's parameters.
pub const MODULE_PREFIX: &str = "module.";

/// Devices a GPU replication layer is bound to.
pub const REPLICA_DEVICE_IDS: [usize; 1] = [0];

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelection {
    /// GPU 0 when the runtime has one, the CPU otherwise.
    Auto,
    Cpu,
    /// GPU 0, failing when none is present.
    Cuda,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceContext {
    Cpu,
    Gpu(usize),
    Replicated(Vec<usize>),
}

/// A placed network, either used directly or behind a replication layer.
#[derive(Debug)]
pub enum ModelHandle<N> {
    Direct { module: N, device: Device },
    Replicated { module: N, device_ids: Vec<usize> },
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct LoadedModel<N> {
    pub handle: ModelHandle<N>,
    /// Placement the checkpoint was loaded under. A GPU network wrapped afterwards by
    /// [`finalize`] still reports `Gpu`.
    pub context: DeviceContext,
    /// `None` when the network kept its random initialisation.
    pub report: Option<LoadReport>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for DeviceSelection {
    fn default() -> Self {
        DeviceSelection::Auto
    }
}

impl<N: StereoNetwork> ModelHandle<N> {
    /// The wrapped network.
    pub fn module(&self) -> &N {
        match self {
            ModelHandle::Direct { module, .. } | ModelHandle::Replicated { module, .. } => module,
        }
    }

    pub fn module_mut(&mut self) -> &mut N {
        match self {
            ModelHandle::Direct { module, .. } | ModelHandle::Replicated { module, .. } => module,
        }
    }

    /// Drops the replication layer, if any, and returns the network.
    pub fn into_inner(self) -> N {
        match self {
            ModelHandle::Direct { module, .. } | ModelHandle::Replicated { module, .. } => module,
        }
    }

    pub fn is_replicated(&self) -> bool {
        matches!(self, ModelHandle::Replicated { .. })
    }

    /// The device inputs have to be on before calling [`forward`](Self::forward).
    pub fn primary_device(&self) -> Device {
        match self {
            ModelHandle::Direct { device, .. } => *device,
            ModelHandle::Replicated { device_ids, .. } => device_ids
                .first()
                .map(|&idx| Device::Cuda(idx))
                .unwrap_or(Device::Cpu),
        }
    }

    pub fn device_context(&self) -> DeviceContext {
        match (self, self.primary_device()) {
            (_, Device::Cpu) => DeviceContext::Cpu,
            (ModelHandle::Direct { .. }, Device::Cuda(idx)) => DeviceContext::Gpu(idx),
            (ModelHandle::Replicated { device_ids, .. }, Device::Cuda(_)) => {
                DeviceContext::Replicated(device_ids.clone())
            }
        }
    }

    pub fn parameters(&self) -> &ParameterStore {
        self.module().parameters()
    }

    /// Parameter names as seen from outside the handle, including the replication prefix.
    pub fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let prefix = if self.is_replicated() { MODULE_PREFIX } else { "" };
        self.parameters()
            .iter()
            .map(|(name, tensor)| (format!("{}{}", prefix, name), tensor))
            .collect()
    }

    /// Non-strict load of `incoming`, named as [`named_parameters`](Self::named_parameters)
    /// names them.
    pub fn load_parameters(&mut self, incoming: ParameterMap) -> Result<LoadReport> {
        match self {
            ModelHandle::Direct { module, .. } => module.parameters_mut().load_non_strict(incoming),
            ModelHandle::Replicated { module, .. } => {
                let mut inner = ParameterMap::new();
                let mut unexpected = Vec::new();
                for (name, tensor) in incoming {
                    if name.starts_with(MODULE_PREFIX) {
                        inner.insert(name[MODULE_PREFIX.len()..].to_string(), tensor);
                    } else {
                        unexpected.push(name);
                    }
                }

                let mut report = module
                    .parameters_mut()
                    .load_non_strict(inner)?
                    .prefixed(MODULE_PREFIX);
                report.unexpected.extend(unexpected);
                Ok(report)
            }
        }
    }

    /// Runs the network once both inputs sit on the primary device.
    pub fn forward(&self, left: &Tensor, right: &Tensor) -> Result<NetworkOutput> {
        let expected = self.primary_device();
        for (what, tensor) in &[("left input", left), ("right input", right)] {
            if tensor.device() != expected {
                return Err(Error::DeviceMismatch {
                    what: what.to_string(),
                    expected,
                    actual: tensor.device(),
                });
            }
        }

        self.module().forward(left, right)
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Resolves the device to run on. Fails before anything is built when a GPU is demanded but
/// absent.
pub fn select_device<R: ComputeRuntime + ?Sized>(
    selection: DeviceSelection,
    runtime: &R,
) -> Result<Device> {
    let gpu = Device::Cuda(REPLICA_DEVICE_IDS[0]);
    match selection {
        DeviceSelection::Cpu => Ok(Device::Cpu),
        DeviceSelection::Auto if runtime.cuda_is_available() => Ok(gpu),
        DeviceSelection::Auto => Ok(Device::Cpu),
        DeviceSelection::Cuda if runtime.cuda_is_available() => Ok(gpu),
        DeviceSelection::Cuda => Err(Error::DeviceUnavailable(gpu)),
    }
}

/// First placement step, before any checkpoint is loaded.
pub fn place<N: StereoNetwork>(mut network: N, device: Device, replicate: bool) -> ModelHandle<N> {
    network.parameters_mut().to_device(device);

    if replicate {
        let device_ids = match device {
            Device::Cuda(_) => REPLICA_DEVICE_IDS.to_vec(),
            Device::Cpu => Vec::new(),
        };
        ModelHandle::Replicated {
            module: network,
            device_ids,
        }
    } else {
        ModelHandle::Direct {
            module: network,
            device,
        }
    }
}

/// Second placement step, after the checkpoint is loaded. A direct GPU network is wrapped in a
/// single-device replication layer, everything else is returned as is.
pub fn finalize<N: StereoNetwork>(handle: ModelHandle<N>) -> ModelHandle<N> {
    match handle {
        ModelHandle::Direct {
            module,
            device: Device::Cuda(idx),
        } => ModelHandle::Replicated {
            module,
            device_ids: vec![idx],
        },
        other => other,
    }
}

/// Constructs, places and loads the network described by `config`.
pub fn load_model<N, R, S>(config: &ModelConfig, runtime: &R, sink: &mut S) -> Result<LoadedModel<N>>
where
    N: StereoNetwork,
    R: ComputeRuntime + ?Sized,
    S: EventSink + ?Sized,
{
    let device = select_device(config.device, runtime)?;
    debug!(%device, replicated = config.replicated_checkpoint, "placing model");

    let network = N::construct(config.max_disparity, config.clean);
    let mut handle = place(network, device, config.replicated_checkpoint);

    let report = apply_checkpoint(&mut handle, config.checkpoint.as_deref(), device, sink)?;

    let context = handle.device_context();
    let handle = finalize(handle);

    Ok(LoadedModel {
        handle,
        context,
        report,
    })
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
