//! Host-memory implementation of the device backend seam.

use std::sync::atomic::{AtomicUsize, Ordering};

use graphrt::backend::spec::{
    BackendError, BackendResult, Device, DeviceBackend, StorageBuffer, DEVICE_CPU,
};
use graphrt::tensor::dtype::DataType;
use graphrt::tensor::view::TensorView;

/// Allocator and copy primitives over plain host memory.
///
/// Buffers are 8-byte aligned slabs that read as zero after allocation. The
/// live-allocation counter lets tests assert that executors release every
/// pool buffer.
#[derive(Debug, Default)]
pub struct CpuBackend {
    live: AtomicUsize,
}

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend::default()
    }

    /// Number of buffers allocated and not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

impl DeviceBackend for CpuBackend {
    fn allocate(
        &self,
        shape: &[i64],
        dtype: DataType,
        device: Device,
    ) -> BackendResult<StorageBuffer> {
        if device.device_type != DEVICE_CPU {
            return Err(BackendError::alloc(
                device,
                "reference backend only provides host memory",
            ));
        }
        let mut numel = 1usize;
        for &extent in shape {
            if extent < 0 {
                return Err(BackendError::alloc(
                    device,
                    format!("negative extent {extent}"),
                ));
            }
            numel = numel.saturating_mul(extent as usize);
        }
        let bytes = numel.max(1) * dtype.element_bytes();

        // u64-backed slab keeps any whole-byte element type aligned.
        let words = bytes.div_ceil(8).max(1);
        let mut slab = vec![0u64; words];
        let data = slab.as_mut_ptr() as *mut u8;
        std::mem::forget(slab);
        self.live.fetch_add(1, Ordering::Relaxed);
        Ok(StorageBuffer::new(data, words * 8, device))
    }

    fn copy(&self, src: &TensorView, dst: &TensorView) -> BackendResult<()> {
        let bytes = src.byte_size();
        if bytes != dst.byte_size() {
            return Err(BackendError::copy(format!(
                "source holds {bytes} bytes, destination {}",
                dst.byte_size()
            )));
        }
        // memmove semantics: entries aliasing one pool buffer may overlap.
        unsafe {
            std::ptr::copy(src.data_ptr(), dst.data_ptr(), bytes);
        }
        Ok(())
    }

    fn free(&self, buffer: &mut StorageBuffer) -> BackendResult<()> {
        let words = buffer.len_bytes() / 8;
        unsafe {
            drop(Vec::from_raw_parts(
                buffer.data_ptr() as *mut u64,
                words,
                words,
            ));
        }
        self.live.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }
}
