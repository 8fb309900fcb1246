//! Contracts for the two external collaborators of the engine: the device
//! backend (allocation and copies) and the code module (named, type-erased
//! kernels). The engine itself never touches device memory except through
//! these traits.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::backend::packed::PackedArgs;
use crate::tensor::dtype::DataType;
use crate::tensor::view::TensorView;

/// Device type id for host memory.
pub const DEVICE_CPU: u32 = 1;
/// Device type id for a GPU-class accelerator.
pub const DEVICE_GPU: u32 = 2;

/// Placement of a buffer or executor: device class plus ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    pub device_type: u32,
    pub device_id: u32,
}

impl Device {
    pub fn new(device_type: u32, device_id: u32) -> Self {
        Device {
            device_type,
            device_id,
        }
    }

    pub fn cpu() -> Self {
        Device::new(DEVICE_CPU, 0)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device_type {
            DEVICE_CPU => write!(f, "cpu({})", self.device_id),
            DEVICE_GPU => write!(f, "gpu({})", self.device_id),
            other => write!(f, "device({}:{})", other, self.device_id),
        }
    }
}

/// Errors raised at the backend seam.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("allocation failed on {device}: {reason}")]
    Alloc { device: Device, reason: String },
    #[error("copy failed: {reason}")]
    Copy { reason: String },
    #[error("kernel '{name}' failed: {reason}")]
    Kernel { name: String, reason: String },
    #[error("packed argument {index} is not a {expected}")]
    ArgType { index: usize, expected: &'static str },
}

impl BackendError {
    pub fn alloc(device: Device, reason: impl Into<String>) -> Self {
        BackendError::Alloc {
            device,
            reason: reason.into(),
        }
    }

    pub fn copy(reason: impl Into<String>) -> Self {
        BackendError::Copy {
            reason: reason.into(),
        }
    }

    pub fn kernel(name: impl Into<String>, reason: impl Into<String>) -> Self {
        BackendError::Kernel {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// An owned device allocation handed out by [`DeviceBackend::allocate`].
///
/// The buffer is released only through [`DeviceBackend::free`]; dropping the
/// handle alone leaks, which is why the executor keeps every pool buffer
/// paired with the backend that produced it.
#[derive(Debug)]
pub struct StorageBuffer {
    data: *mut u8,
    len_bytes: usize,
    device: Device,
}

impl StorageBuffer {
    pub fn new(data: *mut u8, len_bytes: usize, device: Device) -> Self {
        StorageBuffer {
            data,
            len_bytes,
            device,
        }
    }

    pub fn data_ptr(&self) -> *mut u8 {
        self.data
    }

    pub fn len_bytes(&self) -> usize {
        self.len_bytes
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Overlays a logical view onto the allocation. The view is non-owning;
    /// it is the caller's job to ensure it fits (`byte_size <= len_bytes`).
    pub fn view(&self, shape: Vec<i64>, dtype: DataType) -> TensorView {
        TensorView::from_raw_parts(self.data, self.device, dtype, shape)
    }
}

/// Device allocator and copy primitives.
pub trait DeviceBackend: Send + Sync {
    /// Allocates a 1-D buffer of `shape` elements of `dtype` on `device`.
    /// Freshly allocated memory reads as zero.
    fn allocate(
        &self,
        shape: &[i64],
        dtype: DataType,
        device: Device,
    ) -> BackendResult<StorageBuffer>;

    /// Copies the contents of `src` into `dst`. Both views must describe the
    /// same number of bytes; host and device views may be mixed freely.
    fn copy(&self, src: &TensorView, dst: &TensorView) -> BackendResult<()>;

    /// Releases a buffer previously returned by `allocate`.
    fn free(&self, buffer: &mut StorageBuffer) -> BackendResult<()>;
}

/// A pre-compiled kernel: an untyped call over a packed argument frame.
pub type KernelFn = Arc<dyn Fn(&PackedArgs) -> BackendResult<()> + Send + Sync>;

/// The opaque code module produced by the kernel compiler. Kernels are
/// resolved by name once, at bind time.
pub trait KernelModule {
    fn lookup(&self, name: &str) -> Option<KernelFn>;
}
