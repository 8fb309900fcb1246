pub mod packed;
pub mod spec;

pub use packed::{ArgTypeCode, ArgValue, PackedArgs, RetValue};
pub use spec::{
    BackendError, BackendResult, Device, DeviceBackend, KernelFn, KernelModule, StorageBuffer,
};
