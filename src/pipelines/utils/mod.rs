use candle_core::Device;

use crate::core::ModelLoadError;

/// Request for a specific device, used by pipeline builders.
#[derive(Debug, Clone, Default)]
pub enum DeviceRequest {
    /// Use CUDA 0 if available, otherwise CPU.
    #[default]
    Default,
    /// Force CPU even if CUDA is available.
    Cpu,
    /// Select a specific CUDA device by index.
    Cuda(usize),
    /// Provide an already constructed device.
    Explicit(Device),
}

impl DeviceRequest {
    /// Resolve the request into an actual [`Device`].
    pub fn resolve(self) -> Result<Device, ModelLoadError> {
        match self {
            DeviceRequest::Default => {
                Device::cuda_if_available(0).map_err(|e| ModelLoadError::Device(e.to_string()))
            }
            DeviceRequest::Cpu => Ok(Device::Cpu),
            DeviceRequest::Cuda(i) => {
                Device::new_cuda(i).map_err(|e| ModelLoadError::Device(format!("cuda:{i}: {e}")))
            }
            DeviceRequest::Explicit(d) => Ok(d),
        }
    }
}

/// Trait providing convenience methods for pipeline builders to select a device.
pub trait DeviceSelectable: Sized {
    /// Returns a mutable reference to the builder's internal [`DeviceRequest`].
    fn device_request_mut(&mut self) -> &mut DeviceRequest;

    /// Force the pipeline to run on CPU.
    fn cpu(mut self) -> Self {
        *self.device_request_mut() = DeviceRequest::Cpu;
        self
    }

    /// Select a specific CUDA device by index.
    fn cuda_device(mut self, index: usize) -> Self {
        *self.device_request_mut() = DeviceRequest::Cuda(index);
        self
    }

    /// Provide an explicit [`Device`].
    fn device(mut self, device: Device) -> Self {
        *self.device_request_mut() = DeviceRequest::Explicit(device);
        self
    }
}
