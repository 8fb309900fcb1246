//! In-memory model of a compiled computation graph.
//!
//! The graph arrives topologically sorted from the compiler; this module
//! only represents and validates it. The join key between nodes and the
//! storage plan is the *entry id*: `node_row_ptr[nid] + output_index`.

use anyhow::{ensure, Result};

pub mod liveness;
pub mod loader;

/// Address of one output of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEntry {
    pub node_id: u32,
    pub index: u32,
    pub version: u32,
}

/// Kernel binding parameters of an operator node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpParam {
    pub func_name: String,
    pub num_inputs: u32,
    pub num_outputs: u32,
    pub flatten_data: bool,
}

/// What a node is: an externally-written input placeholder, or a kernel call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOp {
    Null,
    Kernel(OpParam),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub op: NodeOp,
    pub inputs: Vec<NodeEntry>,
    pub control_deps: Vec<u32>,
}

impl Node {
    /// Placeholder nodes produce exactly one entry.
    pub fn num_outputs(&self) -> u32 {
        match &self.op {
            NodeOp::Null => 1,
            NodeOp::Kernel(param) => param.num_outputs,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.op, NodeOp::Null)
    }
}

/// The compiler's storage plan: three parallel arrays indexed by entry id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphAttrs {
    pub storage_id: Vec<i64>,
    pub dltype: Vec<String>,
    pub shape: Vec<Vec<i64>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub input_nodes: Vec<u32>,
    pub outputs: Vec<NodeEntry>,
    pub node_row_ptr: Vec<u32>,
    pub attrs: GraphAttrs,
}

impl Graph {
    /// Parses and validates a textual graph description.
    pub fn parse(json_text: &str) -> Result<Graph> {
        let graph = loader::parse_graph(json_text)?;
        graph.validate()?;
        Ok(graph)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Total entry count; the storage-plan arrays all have this length.
    pub fn num_node_entries(&self) -> usize {
        self.node_row_ptr.last().copied().unwrap_or(0) as usize
    }

    /// Entry id of output `index` of node `nid`.
    pub fn entry_id(&self, nid: u32, index: u32) -> usize {
        (self.node_row_ptr[nid as usize] + index) as usize
    }

    pub fn entry_id_of(&self, entry: &NodeEntry) -> usize {
        self.entry_id(entry.node_id, entry.index)
    }

    /// Structural validation of the invariants the executor relies on.
    pub fn validate(&self) -> Result<()> {
        let num_nodes = self.num_nodes();
        ensure!(
            self.node_row_ptr.len() == num_nodes + 1,
            "node_row_ptr has {} entries for {} nodes",
            self.node_row_ptr.len(),
            num_nodes
        );

        for (nid, node) in self.nodes.iter().enumerate() {
            let row = self.node_row_ptr[nid];
            let next = self.node_row_ptr[nid + 1];
            ensure!(
                row as u64 + node.num_outputs() as u64 <= next as u64,
                "node '{}' claims {} outputs but node_row_ptr leaves room for {}",
                node.name,
                node.num_outputs(),
                next.saturating_sub(row)
            );

            for entry in &node.inputs {
                ensure!(
                    (entry.node_id as usize) < nid,
                    "node '{}' reads from node {} which does not precede it",
                    node.name,
                    entry.node_id
                );
                let producer = &self.nodes[entry.node_id as usize];
                ensure!(
                    entry.index < producer.num_outputs(),
                    "node '{}' reads output {} of '{}' which has {} outputs",
                    node.name,
                    entry.index,
                    producer.name,
                    producer.num_outputs()
                );
            }

            for &dep in &node.control_deps {
                ensure!(
                    (dep as usize) < num_nodes,
                    "node '{}' has control dependency on unknown node {}",
                    node.name,
                    dep
                );
            }
        }

        for &nid in &self.input_nodes {
            ensure!(
                (nid as usize) < num_nodes,
                "arg_nodes references unknown node {nid}"
            );
            ensure!(
                self.nodes[nid as usize].is_placeholder(),
                "arg_nodes references operator node '{}'",
                self.nodes[nid as usize].name
            );
        }

        let total = self.num_node_entries();
        for entry in &self.outputs {
            ensure!(
                (entry.node_id as usize) < num_nodes,
                "heads references unknown node {}",
                entry.node_id
            );
            ensure!(
                entry.index < self.nodes[entry.node_id as usize].num_outputs(),
                "heads references output {} of node {}",
                entry.index,
                entry.node_id
            );
            ensure!(
                self.entry_id_of(entry) < total,
                "heads entry exceeds entry count"
            );
        }

        ensure!(
            self.attrs.storage_id.len() == total
                && self.attrs.dltype.len() == total
                && self.attrs.shape.len() == total,
            "storage plan covers {}/{}/{} entries, graph has {}",
            self.attrs.storage_id.len(),
            self.attrs.dltype.len(),
            self.attrs.shape.len(),
            total
        );

        Ok(())
    }

    /// Name of the node behind an input slot (an index into `input_nodes`).
    pub fn input_name(&self, input_index: usize) -> Option<&str> {
        let nid = *self.input_nodes.get(input_index)?;
        Some(self.nodes[nid as usize].name.as_str())
    }

    /// Position within `input_nodes` of the placeholder with this name.
    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.input_nodes
            .iter()
            .position(|&nid| self.nodes[nid as usize].name == name)
    }
}
