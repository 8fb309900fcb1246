//! Reference host implementation of graphrt's two backend seams: a plain
//! memory allocator and an in-process kernel table. Used by the engine's
//! integration tests and by embedders that run graphs without a device.

pub mod cpu;
pub mod kernels;

pub use cpu::CpuBackend;
pub use kernels::CpuKernelModule;
