//! Non-owning tensor descriptors.
//!
//! A [`TensorView`] never owns the memory behind its data pointer: pool
//! slices belong to the executor, host buffers belong to the caller. Whoever
//! constructs a view is responsible for keeping the backing storage alive for
//! as long as the view is passed to backend operations.

use anyhow::{ensure, Result};

use crate::backend::spec::Device;
use crate::tensor::dtype::{DTypeCode, DataType};

/// Scalar types that host slices can be viewed as.
pub trait ViewElement: Copy {
    const DTYPE: DataType;
}

impl ViewElement for f32 {
    const DTYPE: DataType = DataType::FLOAT32;
}

impl ViewElement for i32 {
    const DTYPE: DataType = DataType::INT32;
}

impl ViewElement for i64 {
    const DTYPE: DataType = DataType {
        code: DTypeCode::Int,
        bits: 64,
        lanes: 1,
    };
}

impl ViewElement for u8 {
    const DTYPE: DataType = DataType {
        code: DTypeCode::UInt,
        bits: 8,
        lanes: 1,
    };
}

/// A device buffer slice: pointer, device, element type and shape.
#[derive(Debug, Clone)]
pub struct TensorView {
    data: *mut u8,
    device: Device,
    dtype: DataType,
    shape: Vec<i64>,
}

impl TensorView {
    /// Wraps a raw device pointer. The pointer must stay valid for every
    /// subsequent backend operation on the view.
    pub fn from_raw_parts(
        data: *mut u8,
        device: Device,
        dtype: DataType,
        shape: Vec<i64>,
    ) -> Self {
        TensorView {
            data,
            device,
            dtype,
            shape,
        }
    }

    /// Views a host slice as a CPU tensor of the given shape.
    pub fn of_slice<T: ViewElement>(data: &mut [T], shape: &[i64]) -> Result<Self> {
        let numel: i64 = shape.iter().product::<i64>().max(1);
        ensure!(
            numel as usize == data.len(),
            "shape {:?} does not cover a slice of {} elements",
            shape,
            data.len()
        );
        Ok(TensorView {
            data: data.as_mut_ptr().cast(),
            device: Device::cpu(),
            dtype: T::DTYPE,
            shape: shape.to_vec(),
        })
    }

    pub fn data_ptr(&self) -> *mut u8 {
        self.data
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Element count; a zero-dimensional view holds one element.
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product::<i64>().max(1) as usize
    }

    /// Total byte size: element size times element count.
    pub fn byte_size(&self) -> usize {
        self.dtype.element_bytes() * self.num_elements()
    }

    /// Rewrites the view to rank 1 over the same storage. Used at bind time
    /// for kernels compiled with the flatten-data convention; the rewrite is
    /// permanent.
    pub(crate) fn flatten(&mut self) {
        self.shape = vec![self.num_elements() as i64];
    }

    /// Reinterprets the viewed memory as a typed host slice.
    ///
    /// # Safety
    /// The data pointer must reference `byte_size()` bytes of live,
    /// host-addressable memory, and no aliasing mutable access may exist for
    /// the lifetime of the returned slice.
    pub unsafe fn as_slice<T: ViewElement>(&self) -> Result<&[T]> {
        ensure!(
            self.dtype == T::DTYPE,
            "view has dtype {}, requested {}",
            self.dtype,
            T::DTYPE
        );
        Ok(std::slice::from_raw_parts(
            self.data.cast(),
            self.num_elements(),
        ))
    }

    /// Mutable variant of [`TensorView::as_slice`], same safety contract.
    pub unsafe fn as_slice_mut<T: ViewElement>(&self) -> Result<&mut [T]> {
        ensure!(
            self.dtype == T::DTYPE,
            "view has dtype {}, requested {}",
            self.dtype,
            T::DTYPE
        );
        Ok(std::slice::from_raw_parts_mut(
            self.data.cast(),
            self.num_elements(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_view_shape_checks() {
        let mut data = vec![0f32; 6];
        assert!(TensorView::of_slice(&mut data, &[2, 3]).is_ok());
        assert!(TensorView::of_slice(&mut data, &[7]).is_err());
    }

    #[test]
    fn zero_dim_view_is_one_element() {
        let mut data = [1f32];
        let view = TensorView::of_slice(&mut data, &[]).unwrap();
        assert_eq!(view.num_elements(), 1);
        assert_eq!(view.byte_size(), 4);
    }

    #[test]
    fn flatten_rewrites_shape_in_place() {
        let mut data = vec![0f32; 12];
        let mut view = TensorView::of_slice(&mut data, &[3, 4]).unwrap();
        let ptr = view.data_ptr();
        view.flatten();
        assert_eq!(view.shape(), &[12]);
        assert_eq!(view.data_ptr(), ptr);
    }
}
