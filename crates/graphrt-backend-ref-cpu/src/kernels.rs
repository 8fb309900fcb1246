//! A code module backed by an in-process kernel table.

use std::collections::HashMap;
use std::sync::Arc;

use graphrt::backend::packed::PackedArgs;
use graphrt::backend::spec::{BackendError, BackendResult, KernelFn, KernelModule};
use graphrt::tensor::dtype::DataType;
use graphrt::tensor::view::TensorView;

/// Named kernels resolvable by the op binder.
#[derive(Default)]
pub struct CpuKernelModule {
    kernels: HashMap<String, KernelFn>,
}

impl CpuKernelModule {
    pub fn new() -> Self {
        CpuKernelModule::default()
    }

    /// A module preloaded with the reference `add`, `mul` and `copy` kernels.
    pub fn with_reference_kernels() -> Self {
        let mut module = CpuKernelModule::new();
        module.register("add", binary_elementwise("add", |a, b| a + b));
        module.register("mul", binary_elementwise("mul", |a, b| a * b));
        module.register("copy", copy_kernel());
        module
    }

    pub fn register(&mut self, name: impl Into<String>, kernel: KernelFn) {
        self.kernels.insert(name.into(), kernel);
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, kernel: F)
    where
        F: Fn(&PackedArgs) -> BackendResult<()> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(kernel));
    }
}

impl KernelModule for CpuKernelModule {
    fn lookup(&self, name: &str) -> Option<KernelFn> {
        self.kernels.get(name).cloned()
    }
}

fn expect_f32(name: &str, view: &TensorView) -> BackendResult<()> {
    if view.dtype() != DataType::FLOAT32 {
        return Err(BackendError::kernel(
            name,
            format!("expected float32 arguments, got {}", view.dtype()),
        ));
    }
    Ok(())
}

/// Element-count-checked binary op over f32 views, `args = [a, b, out]`.
/// Works through raw pointers because the storage plan may alias an output
/// onto one of the inputs.
fn binary_elementwise(name: &'static str, op: fn(f32, f32) -> f32) -> KernelFn {
    Arc::new(move |args: &PackedArgs| {
        if args.len() != 3 {
            return Err(BackendError::kernel(
                name,
                format!("expected 3 arguments, got {}", args.len()),
            ));
        }
        let a = args.tensor(0)?;
        let b = args.tensor(1)?;
        let out = args.tensor(2)?;
        for view in [a, b, out] {
            expect_f32(name, view)?;
        }
        let n = out.num_elements();
        if a.num_elements() != n || b.num_elements() != n {
            return Err(BackendError::kernel(
                name,
                format!(
                    "element counts differ: {} op {} -> {n}",
                    a.num_elements(),
                    b.num_elements()
                ),
            ));
        }
        let a = a.data_ptr() as *const f32;
        let b = b.data_ptr() as *const f32;
        let out = out.data_ptr() as *mut f32;
        unsafe {
            for i in 0..n {
                *out.add(i) = op(*a.add(i), *b.add(i));
            }
        }
        Ok(())
    })
}

/// Byte copy from the first argument to the second.
fn copy_kernel() -> KernelFn {
    Arc::new(|args: &PackedArgs| {
        if args.len() != 2 {
            return Err(BackendError::kernel(
                "copy",
                format!("expected 2 arguments, got {}", args.len()),
            ));
        }
        let src = args.tensor(0)?;
        let dst = args.tensor(1)?;
        if src.byte_size() != dst.byte_size() {
            return Err(BackendError::kernel(
                "copy",
                format!(
                    "byte sizes differ: {} -> {}",
                    src.byte_size(),
                    dst.byte_size()
                ),
            ));
        }
        unsafe {
            std::ptr::copy(src.data_ptr(), dst.data_ptr(), src.byte_size());
        }
        Ok(())
    })
}
