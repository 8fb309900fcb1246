//! Binding of graph nodes to kernels.
//!
//! For each operator node the argument frame is packed once: views of every
//! input entry followed by views of every output entry. Running the graph
//! afterwards only walks the pre-built closures.

use anyhow::{anyhow, Result};

use crate::backend::packed::{ArgValue, PackedArgs};
use crate::backend::spec::{BackendResult, KernelFn, KernelModule};
use crate::graph::{Graph, NodeOp};
use crate::tensor::view::TensorView;

/// A bound operator: the kernel plus its fixed argument frame.
pub(crate) struct OpClosure {
    func_name: String,
    kernel: Option<KernelFn>,
    args: PackedArgs,
}

impl OpClosure {
    pub(crate) fn invoke(&self) -> BackendResult<()> {
        match &self.kernel {
            Some(kernel) => kernel(&self.args),
            None => Ok(()),
        }
    }

    pub(crate) fn func_name(&self) -> &str {
        &self.func_name
    }
}

/// Resolves and packs every operator node, in node order. Placeholder nodes
/// leave their slot empty; their entries are written externally.
pub(crate) fn bind_ops(
    graph: &Graph,
    data_entry: &[TensorView],
    module: &dyn KernelModule,
) -> Result<Vec<Option<OpClosure>>> {
    let mut op_execs = Vec::with_capacity(graph.num_nodes());

    for (nid, node) in graph.nodes.iter().enumerate() {
        let param = match &node.op {
            NodeOp::Null => {
                op_execs.push(None);
                continue;
            }
            NodeOp::Kernel(param) => param,
        };

        let mut values = Vec::with_capacity(node.inputs.len() + param.num_outputs as usize);
        for entry in &node.inputs {
            values.push(ArgValue::Tensor(
                data_entry[graph.entry_id_of(entry)].clone(),
            ));
        }
        for index in 0..param.num_outputs {
            let eid = graph.entry_id(nid as u32, index);
            values.push(ArgValue::Tensor(data_entry[eid].clone()));
        }

        let mut args = PackedArgs::pack(values);
        if param.flatten_data {
            // Kernels compiled with the flatten convention assume rank-1
            // arguments for the executor's whole lifetime.
            for view in args.tensors_mut() {
                view.flatten();
            }
        }

        let kernel = if param.func_name == "__nop" {
            None
        } else {
            let kernel = module.lookup(&param.func_name).ok_or_else(|| {
                anyhow!(
                    "kernel '{}' for node '{}' is not present in the code module",
                    param.func_name,
                    node.name
                )
            })?;
            Some(kernel)
        };

        op_execs.push(Some(OpClosure {
            func_name: param.func_name.clone(),
            kernel,
            args,
        }));
    }

    Ok(op_execs)
}
