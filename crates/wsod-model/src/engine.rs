//! Model lifecycle: parameter ownership, checkpoints, device selection.

use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};

use wsod_core::{DetectorConfig, Error, Result};

use crate::backbone::BackboneConfig;
use crate::model::DetectionModel;

/// Compute device selection.
#[derive(Debug, Clone, Copy)]
pub enum DeviceType {
    Cpu,
    Cuda(usize),
    Metal,
}

/// Owns the model together with its parameter store.
///
/// The `VarMap` holds every trainable tensor; an external optimizer
/// mutates it between forward calls, and checkpoints restore into it.
pub struct DetectorEngine {
    model: DetectionModel,
    varmap: VarMap,
    device: Device,
}

impl DetectorEngine {
    /// Build a model with freshly initialized weights.
    pub fn new_random(
        config: DetectorConfig,
        backbone_config: BackboneConfig,
        device_type: DeviceType,
    ) -> Result<Self> {
        let device = Self::get_device(device_type)?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = DetectionModel::new(config, backbone_config, vb)?;

        Ok(Self {
            model,
            varmap,
            device,
        })
    }

    /// Build the model and restore its weights from a safetensors
    /// checkpoint. This is the pretrained-weight entry point invoked
    /// once at construction when configured.
    pub fn load<P: AsRef<Path>>(
        path: P,
        config: DetectorConfig,
        backbone_config: BackboneConfig,
        device_type: DeviceType,
    ) -> Result<Self> {
        let device = Self::get_device(device_type)?;
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = DetectionModel::new(config, backbone_config, vb)?;

        varmap
            .load(path.as_ref())
            .map_err(|e| Error::ModelLoad(e.to_string()))?;
        tracing::info!(path = %path.as_ref().display(), "loaded pretrained weights");

        Ok(Self {
            model,
            varmap,
            device,
        })
    }

    /// Write the current weights to a safetensors checkpoint.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.varmap
            .save(path.as_ref())
            .map_err(|e| Error::ModelLoad(e.to_string()))
    }

    fn get_device(device_type: DeviceType) -> Result<Device> {
        Ok(match device_type {
            DeviceType::Cpu => Device::Cpu,
            DeviceType::Cuda(ordinal) => Device::new_cuda(ordinal)?,
            DeviceType::Metal => Device::new_metal(0)?,
        })
    }

    pub fn model(&self) -> &DetectionModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut DetectionModel {
        &mut self.model
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}
