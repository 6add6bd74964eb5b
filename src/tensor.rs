//! # Device-tagged tensors
//!
//! Dense `f32` tensors that know which device they live on, and the named parameter store a
//! network keeps its weights in.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

/// Name to tensor mapping, as found in a checkpoint's state dict.
pub type ParameterMap = BTreeMap<String, Tensor>;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// A compute device a tensor can reside on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Cuda(usize),
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: ArrayD<f32>,
    device: Device,
}

/// The parameters of a network, keyed by their dotted names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterStore {
    params: ParameterMap,
}

/// Outcome of a non-strict parameter load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Names whose values were replaced.
    pub applied: Vec<String>,
    /// Network parameters absent from the incoming mapping. They keep their current values.
    pub missing: Vec<String>,
    /// Incoming names the network does not have. They are ignored.
    pub unexpected: Vec<String>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(idx) => write!(f, "cuda:{}", idx),
        }
    }
}

impl Tensor {
    pub fn new(data: ArrayD<f32>, device: Device) -> Self {
        Self { data, device }
    }

    pub fn from_shape_vec(shape: &[usize], values: Vec<f32>, device: Device) -> Result<Self> {
        let data = ArrayD::from_shape_vec(IxDyn(shape), values)?;
        Ok(Self::new(data, device))
    }

    pub fn full(shape: &[usize], value: f32, device: Device) -> Self {
        Self::new(ArrayD::from_elem(IxDyn(shape), value), device)
    }

    pub fn zeros(shape: &[usize], device: Device) -> Self {
        Self::full(shape, 0.0, device)
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn into_data(self) -> ArrayD<f32> {
        self.data
    }

    /// Copy of this tensor on `device`.
    pub fn to_device(&self, device: Device) -> Tensor {
        Tensor::new(self.data.clone(), device)
    }

    pub fn into_device(self, device: Device) -> Tensor {
        Tensor::new(self.data, device)
    }
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.params.insert(name.into(), tensor)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.params.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Tensor)> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Total element count across all parameters.
    pub fn total_numel(&self) -> usize {
        self.params.values().map(Tensor::numel).sum()
    }

    /// Every device at least one parameter lives on.
    pub fn devices(&self) -> BTreeSet<Device> {
        self.params.values().map(Tensor::device).collect()
    }

    /// Moves every parameter to `device`.
    pub fn to_device(&mut self, device: Device) {
        for tensor in self.params.values_mut() {
            tensor.device = device;
        }
    }

    /// Applies `incoming` on top of the current values without requiring the two name sets to
    /// match.
    ///
    /// Overlapping names must agree on shape and device. The whole mapping is validated before
    /// anything is written, so a failed load leaves the store untouched.
    pub fn load_non_strict(&mut self, incoming: ParameterMap) -> Result<LoadReport> {
        for (name, tensor) in incoming.iter() {
            if let Some(current) = self.params.get(name) {
                if current.shape() != tensor.shape() {
                    return Err(Error::ParameterShape {
                        name: name.clone(),
                        expected: current.shape().to_vec(),
                        actual: tensor.shape().to_vec(),
                    });
                }
                if current.device() != tensor.device() {
                    return Err(Error::DeviceMismatch {
                        what: format!("checkpoint parameter {}", name),
                        expected: current.device(),
                        actual: tensor.device(),
                    });
                }
            }
        }

        let mut report = LoadReport::default();
        report.missing = self
            .params
            .keys()
            .filter(|name| !incoming.contains_key(*name))
            .cloned()
            .collect();

        for (name, tensor) in incoming {
            match self.params.get_mut(&name) {
                Some(current) => {
                    *current = tensor;
                    report.applied.push(name);
                }
                None => report.unexpected.push(name),
            }
        }

        Ok(report)
    }
}

impl LoadReport {
    /// Prepends `prefix` to every reported name.
    pub fn prefixed(mut self, prefix: &str) -> Self {
        for name in self
            .applied
            .iter_mut()
            .chain(self.missing.iter_mut())
            .chain(self.unexpected.iter_mut())
        {
            name.insert_str(0, prefix);
        }
        self
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ParameterStore {
        let mut store = ParameterStore::new();
        store.insert("a.weight", Tensor::full(&[2, 2], 1.0, Device::Cpu));
        store.insert("b.bias", Tensor::full(&[3], 1.0, Device::Cpu));
        store
    }

    #[test]
    fn device_display() {
        assert_eq!(Device::Cpu.to_string(), "cpu");
        assert_eq!(Device::Cuda(1).to_string(), "cuda:1");
    }

    #[test]
    fn shape_mismatch_leaves_store_untouched() {
        let mut store = store();
        let mut incoming = ParameterMap::new();
        incoming.insert("b.bias".into(), Tensor::full(&[3], 7.0, Device::Cpu));
        incoming.insert("a.weight".into(), Tensor::full(&[4], 7.0, Device::Cpu));

        let err = store.load_non_strict(incoming).unwrap_err();
        assert!(matches!(err, Error::ParameterShape { ref name, .. } if name == "a.weight"));
        assert_eq!(store.get("b.bias").unwrap().data()[[0]], 1.0);
    }

    #[test]
    fn device_mismatch_is_rejected() {
        let mut store = store();
        let mut incoming = ParameterMap::new();
        incoming.insert("b.bias".into(), Tensor::full(&[3], 7.0, Device::Cuda(0)));

        assert!(matches!(
            store.load_non_strict(incoming),
            Err(Error::DeviceMismatch { .. })
        ));
    }

    #[test]
    fn report_prefix() {
        let report = LoadReport {
            applied: vec!["x".into()],
            missing: vec!["y".into()],
            unexpected: vec![],
        }
        .prefixed("module.");
        assert_eq!(report.applied, vec!["module.x".to_string()]);
        assert_eq!(report.missing, vec!["module.y".to_string()]);
    }

    #[test]
    fn total_numel_and_devices() {
        let mut store = store();
        assert_eq!(store.total_numel(), 7);
        store.to_device(Device::Cuda(0));
        assert_eq!(store.devices().into_iter().collect::<Vec<_>>(), vec![Device::Cuda(0)]);
    }
}
