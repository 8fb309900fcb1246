//! The opaque invocation surface used by host bindings.
//!
//! An [`ExecutorHandle`] exposes the executor as named operations taking
//! packed argument cells, so bindings dispatch on operation name and runtime
//! argument type instead of linking against the typed API.

use std::sync::Arc;

use anyhow::{bail, ensure, Result};

use crate::backend::packed::{ArgValue, RetValue};
use crate::backend::spec::{Device, DeviceBackend, KernelModule};
use crate::executor::GraphExecutor;
use crate::tensor::view::TensorView;

/// Builds an executor from a graph description, a code module and a device
/// placement, wrapped behind the named-operation surface.
pub fn create(
    graph_json: &str,
    module: &dyn KernelModule,
    backend: Arc<dyn DeviceBackend>,
    device_type: u32,
    device_id: u32,
    debug: bool,
) -> Result<ExecutorHandle> {
    let device = Device::new(device_type, device_id);
    let executor = GraphExecutor::new(graph_json, module, backend, device, debug)?;
    Ok(ExecutorHandle { executor })
}

/// An executor behind the name-dispatch contract.
pub struct ExecutorHandle {
    executor: GraphExecutor,
}

impl std::fmt::Debug for ExecutorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorHandle").finish_non_exhaustive()
    }
}

impl ExecutorHandle {
    /// Invokes a named operation. `set_input`/`get_input` dispatch their
    /// first argument on runtime type: a string selects name lookup, an
    /// integer a direct index.
    pub fn invoke(&mut self, name: &str, args: &[ArgValue]) -> Result<RetValue> {
        match name {
            "set_input" => {
                let view = tensor_arg(args, 1, name)?;
                match select_arg(args, 0, name)? {
                    Selector::Name(input) => self.executor.set_input_by_name(input, view)?,
                    Selector::Index(index) => self.executor.set_input(index, view)?,
                }
                Ok(RetValue::None)
            }
            "get_input" => {
                let view = tensor_arg(args, 1, name)?;
                match select_arg(args, 0, name)? {
                    Selector::Name(input) => self.executor.get_input_by_name(input, view)?,
                    Selector::Index(index) => self.executor.get_input(index, view)?,
                }
                Ok(RetValue::None)
            }
            "get_output" => {
                let index = index_arg(args, 0, name)?;
                let view = tensor_arg(args, 1, name)?;
                self.executor.get_output(index, view)?;
                Ok(RetValue::None)
            }
            "get_input_names" => Ok(RetValue::Str(self.executor.input_names())),
            "get_output_names" => Ok(RetValue::Str(self.executor.output_names())),
            "set_debug_buffer" => {
                let view = tensor_arg(args, 0, name)?;
                self.executor.set_debug_buffer(view.clone());
                Ok(RetValue::None)
            }
            "run" => {
                self.executor.run()?;
                Ok(RetValue::None)
            }
            "load_params" => {
                let blob = bytes_arg(args, 0, name)?;
                self.executor.load_params(blob)?;
                Ok(RetValue::None)
            }
            other => bail!("unknown executor operation '{other}'"),
        }
    }
}

enum Selector<'a> {
    Name(&'a str),
    Index(usize),
}

fn select_arg<'a>(args: &'a [ArgValue], index: usize, op: &str) -> Result<Selector<'a>> {
    match args.get(index) {
        Some(ArgValue::Str(name)) => Ok(Selector::Name(name)),
        Some(ArgValue::Int(value)) => {
            ensure!(*value >= 0, "{op}: index {value} is negative");
            Ok(Selector::Index(*value as usize))
        }
        Some(other) => bail!(
            "{op}: argument {index} must be a name or an index, got {:?}",
            other.type_code()
        ),
        None => bail!("{op}: missing argument {index}"),
    }
}

fn index_arg(args: &[ArgValue], index: usize, op: &str) -> Result<usize> {
    match args.get(index) {
        Some(ArgValue::Int(value)) => {
            ensure!(*value >= 0, "{op}: index {value} is negative");
            Ok(*value as usize)
        }
        Some(other) => bail!(
            "{op}: argument {index} must be an index, got {:?}",
            other.type_code()
        ),
        None => bail!("{op}: missing argument {index}"),
    }
}

fn tensor_arg<'a>(args: &'a [ArgValue], index: usize, op: &str) -> Result<&'a TensorView> {
    match args.get(index) {
        Some(ArgValue::Tensor(view)) => Ok(view),
        Some(other) => bail!(
            "{op}: argument {index} must be a tensor view, got {:?}",
            other.type_code()
        ),
        None => bail!("{op}: missing argument {index}"),
    }
}

fn bytes_arg<'a>(args: &'a [ArgValue], index: usize, op: &str) -> Result<&'a [u8]> {
    match args.get(index) {
        Some(ArgValue::Bytes(bytes)) => Ok(bytes),
        Some(other) => bail!(
            "{op}: argument {index} must be a byte string, got {:?}",
            other.type_code()
        ),
        None => bail!("{op}: missing argument {index}"),
    }
}
