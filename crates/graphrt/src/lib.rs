//! A graph execution engine for compiled tensor programs.
//!
//! The engine loads a topologically ordered operator graph from its textual
//! description, materializes a pooled backing store from the compiler's
//! storage plan, binds every node to a pre-compiled kernel resolved by name
//! from an opaque code module, and runs the graph with zero per-call
//! allocation. Device memory and kernels stay behind the [`DeviceBackend`]
//! and [`KernelModule`] seams; `graphrt-backend-ref-cpu` provides a host
//! reference implementation of both.

pub mod backend;
pub mod executor;
pub mod graph;
pub mod params;
pub mod runtime;
pub mod tensor;

pub use backend::{
    ArgTypeCode, ArgValue, BackendError, BackendResult, Device, DeviceBackend, KernelFn,
    KernelModule, PackedArgs, RetValue, StorageBuffer,
};
pub use executor::{CheckFlags, GraphExecutor};
pub use graph::Graph;
pub use tensor::{DTypeCode, DataType, TensorView};
