//! The graph executor: owns the pool, the per-entry views and the bound
//! kernels, and exposes the named input/output surface.
//!
//! Nodes execute strictly in graph order; the loader trusts the compiler's
//! topological sort. One executor is single-threaded; distinct executors are
//! independent.

use std::fmt;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use tracing::warn;

use crate::backend::spec::{Device, DeviceBackend, KernelModule};
use crate::graph::Graph;
use crate::params;
use crate::tensor::dtype::DataType;
use crate::tensor::view::TensorView;

mod ops;
mod storage;

use ops::{bind_ops, OpClosure};
use storage::{plan_storage, StoragePool};

/// Which scans a debug run applies to intermediate tensors. The two checks
/// are independent bits; combine with [`CheckFlags::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckFlags(u8);

impl CheckFlags {
    const NAN: u8 = 1;
    const INF: u8 = 2;

    pub fn none() -> Self {
        CheckFlags(0)
    }

    pub fn nan() -> Self {
        CheckFlags(Self::NAN)
    }

    pub fn inf() -> Self {
        CheckFlags(Self::INF)
    }

    pub fn merge(self, other: CheckFlags) -> Self {
        CheckFlags(self.0 | other.0)
    }

    pub fn contains_nan(self) -> bool {
        (self.0 & Self::NAN) != 0
    }

    pub fn contains_inf(self) -> bool {
        (self.0 & Self::INF) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// A loaded graph bound to a device and a code module, ready to run.
pub struct GraphExecutor {
    graph: Graph,
    device: Device,
    backend: Arc<dyn DeviceBackend>,
    // Owns every byte the data-entry views point at; freed on drop.
    pool: StoragePool,
    data_entry: Vec<TensorView>,
    op_execs: Vec<Option<OpClosure>>,
    debug: bool,
    debug_buffers: Vec<TensorView>,
    check_flags: CheckFlags,
}

impl GraphExecutor {
    /// Loads a textual graph description, plans storage on `device` and binds
    /// every operator against `module`.
    pub fn new(
        graph_json: &str,
        module: &dyn KernelModule,
        backend: Arc<dyn DeviceBackend>,
        device: Device,
        debug: bool,
    ) -> Result<Self> {
        let graph = Graph::parse(graph_json)?;
        Self::from_graph(graph, module, backend, device, debug)
    }

    /// Same as [`GraphExecutor::new`] for an already-decoded graph.
    pub fn from_graph(
        graph: Graph,
        module: &dyn KernelModule,
        backend: Arc<dyn DeviceBackend>,
        device: Device,
        debug: bool,
    ) -> Result<Self> {
        graph.validate()?;
        let plan = plan_storage(&graph, &backend, device)?;
        let op_execs = bind_ops(&graph, &plan.data_entry, module)?;
        Ok(GraphExecutor {
            graph,
            device,
            backend,
            pool: plan.pool,
            data_entry: plan.data_entry,
            op_execs,
            debug,
            debug_buffers: Vec::new(),
            check_flags: CheckFlags::none(),
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn num_inputs(&self) -> usize {
        self.graph.input_nodes.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.graph.outputs.len()
    }

    /// Position of a named input, or `None` when the name is unknown.
    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.graph.input_index(name)
    }

    /// Read-only view of a planned entry (debug and inspection only; the
    /// view borrows pool memory owned by this executor).
    pub fn entry_view(&self, entry_id: usize) -> Option<&TensorView> {
        self.data_entry.get(entry_id)
    }

    /// Copies `data` into the planned entry of input `index`.
    pub fn set_input(&mut self, index: usize, data: &TensorView) -> Result<()> {
        ensure!(
            index < self.num_inputs(),
            "input index {index} out of range ({} inputs)",
            self.num_inputs()
        );
        let eid = self.graph.entry_id(self.graph.input_nodes[index], 0);
        self.backend
            .copy(data, &self.data_entry[eid])
            .with_context(|| format!("writing input {index}"))?;
        Ok(())
    }

    /// Name-addressed [`GraphExecutor::set_input`]. An unknown name warns and
    /// leaves every entry untouched.
    pub fn set_input_by_name(&mut self, name: &str, data: &TensorView) -> Result<()> {
        match self.input_index(name) {
            Some(index) => self.set_input(index, data),
            None => {
                warn!("cannot find '{name}' among graph inputs");
                Ok(())
            }
        }
    }

    /// Copies the planned entry of input `index` into `data`.
    pub fn get_input(&self, index: usize, data: &TensorView) -> Result<()> {
        ensure!(
            index < self.num_inputs(),
            "input index {index} out of range ({} inputs)",
            self.num_inputs()
        );
        let eid = self.graph.entry_id(self.graph.input_nodes[index], 0);
        self.backend
            .copy(&self.data_entry[eid], data)
            .with_context(|| format!("reading input {index}"))?;
        Ok(())
    }

    /// Name-addressed [`GraphExecutor::get_input`], warn-and-skip on unknown
    /// names like the setter.
    pub fn get_input_by_name(&self, name: &str, data: &TensorView) -> Result<()> {
        match self.input_index(name) {
            Some(index) => self.get_input(index, data),
            None => {
                warn!("cannot find '{name}' among graph inputs");
                Ok(())
            }
        }
    }

    /// Copies output `index` into `data`.
    pub fn get_output(&self, index: usize, data: &TensorView) -> Result<()> {
        ensure!(
            index < self.num_outputs(),
            "output index {index} out of range ({} outputs)",
            self.num_outputs()
        );
        let eid = self.graph.entry_id_of(&self.graph.outputs[index]);
        self.backend
            .copy(&self.data_entry[eid], data)
            .with_context(|| format!("reading output {index}"))?;
        Ok(())
    }

    /// Names of the input placeholders, `;`-separated, in input order.
    pub fn input_names(&self) -> String {
        self.graph
            .input_nodes
            .iter()
            .map(|&nid| self.graph.nodes[nid as usize].name.as_str())
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Names of the nodes producing each output, `;`-separated.
    pub fn output_names(&self) -> String {
        self.graph
            .outputs
            .iter()
            .map(|entry| self.graph.nodes[entry.node_id as usize].name.as_str())
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Index of a node by name, over all nodes (not just inputs).
    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.graph.nodes.iter().position(|node| node.name == name)
    }

    /// Registers the next positional debug buffer. Buffer `i` receives the
    /// first output of node `i` after that node runs in debug mode; buffers
    /// must be host-addressable.
    pub fn set_debug_buffer(&mut self, buffer: TensorView) {
        self.debug_buffers.push(buffer);
    }

    /// Selects the scans applied by debug runs.
    pub fn set_check_flags(&mut self, flags: CheckFlags) {
        self.check_flags = flags;
    }

    /// Executes every bound kernel in node order. In debug mode each node is
    /// followed by the debug-buffer copy and the configured scans.
    pub fn run(&mut self) -> Result<()> {
        if self.debug {
            return self.run_debug();
        }
        for op in self.op_execs.iter().flatten() {
            op.invoke()
                .with_context(|| format!("running kernel '{}'", op.func_name()))?;
        }
        Ok(())
    }

    /// Runs the graph, invoking `observer` with the entry id and view of
    /// every output of every executed node, in execution order.
    pub fn run_with_observer<F>(&mut self, mut observer: F) -> Result<()>
    where
        F: FnMut(usize, &TensorView),
    {
        for (nid, slot) in self.op_execs.iter().enumerate() {
            let Some(op) = slot else { continue };
            op.invoke()
                .with_context(|| format!("running kernel '{}'", op.func_name()))?;
            let node = &self.graph.nodes[nid];
            for index in 0..node.num_outputs() {
                let eid = self.graph.entry_id(nid as u32, index);
                observer(eid, &self.data_entry[eid]);
            }
        }
        Ok(())
    }

    fn run_debug(&mut self) -> Result<()> {
        for (nid, slot) in self.op_execs.iter().enumerate() {
            if let Some(op) = slot {
                op.invoke()
                    .with_context(|| format!("running kernel '{}'", op.func_name()))?;
            }
            let Some(buffer) = self.debug_buffers.get(nid) else {
                continue;
            };
            let eid = self.graph.entry_id(nid as u32, 0);
            self.backend
                .copy(&self.data_entry[eid], buffer)
                .with_context(|| format!("dumping node {nid} to its debug buffer"))?;
            scan_for_non_finite(eid, buffer, self.check_flags);
        }
        Ok(())
    }

    /// Runs the graph prefix up to and including node `index`, then copies
    /// that node's first output into `data`. Costly; debugging only.
    pub fn debug_get_node_output(&mut self, index: usize, data: &TensorView) -> Result<()> {
        ensure!(
            index < self.graph.num_nodes(),
            "node index {index} out of range ({} nodes)",
            self.graph.num_nodes()
        );
        for slot in self.op_execs.iter().take(index + 1).flatten() {
            slot.invoke()
                .with_context(|| format!("running kernel '{}'", slot.func_name()))?;
        }
        let eid = self.graph.entry_id(index as u32, 0);
        self.backend
            .copy(&self.data_entry[eid], data)
            .with_context(|| format!("reading output of node {index}"))?;
        Ok(())
    }

    /// Parses a parameter blob and copies every tensor into its planned
    /// input entry. Reuses existing pool slices; never allocates. May be
    /// called repeatedly; later loads overwrite.
    pub fn load_params(&mut self, blob: &[u8]) -> Result<()> {
        params::load_params(&self.graph, &self.data_entry, self.backend.as_ref(), blob)
    }
}

impl fmt::Debug for GraphExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphExecutor")
            .field("device", &self.device)
            .field("nodes", &self.graph.num_nodes())
            .field("inputs", &self.num_inputs())
            .field("outputs", &self.num_outputs())
            .field("entries", &self.graph.num_node_entries())
            .field("pool_buffers", &self.pool.len())
            .field(
                "bound_ops",
                &self.op_execs.iter().flatten().count(),
            )
            .field("debug", &self.debug)
            .finish()
    }
}


/// Host-side scan of a dumped tensor for NaN/Inf values, per the configured
/// flags. Only float32 buffers are scanned; hits are logged, not fatal.
fn scan_for_non_finite(entry_id: usize, buffer: &TensorView, flags: CheckFlags) {
    if flags.is_empty() || buffer.dtype() != DataType::FLOAT32 {
        return;
    }
    // Debug buffers are caller-provided host memory.
    let values = match unsafe { buffer.as_slice::<f32>() } {
        Ok(values) => values,
        Err(_) => return,
    };
    if flags.contains_nan() {
        if let Some(i) = values.iter().position(|v| v.is_nan()) {
            warn!("NaN found in entry {entry_id} at index {i}");
        }
    }
    if flags.contains_inf() {
        if let Some(i) = values.iter().position(|v| v.is_infinite()) {
            warn!("Inf found in entry {entry_id} at index {i}");
        }
    }
}
