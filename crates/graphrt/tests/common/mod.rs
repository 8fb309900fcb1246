#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use graphrt::backend::spec::{
    BackendResult, Device, DeviceBackend, StorageBuffer,
};
use graphrt::params::{PARAM_LIST_MAGIC, PARAM_TENSOR_MAGIC};
use graphrt::tensor::dtype::DataType;
use graphrt::tensor::view::TensorView;
use graphrt_backend_ref_cpu::CpuBackend;
use serde_json::json;

/// Backend wrapper that records every pool allocation request.
#[derive(Default)]
pub struct RecordingBackend {
    inner: CpuBackend,
    allocations: Mutex<Vec<Vec<i64>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        RecordingBackend::default()
    }

    pub fn allocated_shapes(&self) -> Vec<Vec<i64>> {
        self.allocations.lock().unwrap().clone()
    }

    pub fn live_allocations(&self) -> usize {
        self.inner.live_allocations()
    }
}

impl DeviceBackend for RecordingBackend {
    fn allocate(
        &self,
        shape: &[i64],
        dtype: DataType,
        device: Device,
    ) -> BackendResult<StorageBuffer> {
        self.allocations.lock().unwrap().push(shape.to_vec());
        self.inner.allocate(shape, dtype, device)
    }

    fn copy(&self, src: &TensorView, dst: &TensorView) -> BackendResult<()> {
        self.inner.copy(src, dst)
    }

    fn free(&self, buffer: &mut StorageBuffer) -> BackendResult<()> {
        self.inner.free(buffer)
    }
}

/// S1-style graph: one input forwarded through a `__nop` node whose output
/// shares the input's pool buffer.
pub fn identity_graph_json() -> String {
    json!({
        "nodes": [
            {"op": "null", "name": "x", "inputs": []},
            {
                "op": "tvm_op",
                "name": "identity0",
                "inputs": [[0, 0, 0]],
                "attrs": {
                    "func_name": "__nop",
                    "num_inputs": "1",
                    "num_outputs": "1",
                    "flatten_data": "0"
                }
            }
        ],
        "arg_nodes": [0],
        "node_row_ptr": [0, 1, 2],
        "heads": [[1, 0, 0]],
        "attrs": {
            "dltype": ["list_str", ["float32", "float32"]],
            "storage_id": ["list_int", [0, 0]],
            "shape": ["list_shape", [[2, 3], [2, 3]]]
        }
    })
    .to_string()
}

/// S2-style graph: `(a + b) * c` over shape `[4]`. Input buffers are never
/// reused; the multiply runs in place over the add output's buffer.
pub fn chain_graph_json() -> String {
    chain_graph_json_with(false, "add", "mul")
}

/// Variant of the chain graph with custom kernel names and flatten flag.
pub fn chain_graph_json_with(flatten: bool, add_fn: &str, mul_fn: &str) -> String {
    let flatten = if flatten { "1" } else { "0" };
    json!({
        "nodes": [
            {"op": "null", "name": "a", "inputs": []},
            {"op": "null", "name": "b", "inputs": []},
            {"op": "null", "name": "c", "inputs": []},
            {
                "op": "tvm_op",
                "name": "add0",
                "inputs": [[0, 0, 0], [1, 0, 0]],
                "attrs": {
                    "func_name": add_fn,
                    "num_inputs": "2",
                    "num_outputs": "1",
                    "flatten_data": flatten
                }
            },
            {
                "op": "tvm_op",
                "name": "mul0",
                "inputs": [[3, 0, 0], [2, 0, 0]],
                "attrs": {
                    "func_name": mul_fn,
                    "num_inputs": "2",
                    "num_outputs": "1",
                    "flatten_data": flatten
                }
            }
        ],
        "arg_nodes": [0, 1, 2],
        "node_row_ptr": [0, 1, 2, 3, 4, 5],
        "heads": [[4, 0, 0]],
        "attrs": {
            "dltype": ["list_str", ["float32", "float32", "float32", "float32", "float32"]],
            "storage_id": ["list_int", [0, 1, 2, 3, 3]],
            "shape": ["list_shape", [[4], [4], [4], [4], [4]]]
        }
    })
    .to_string()
}

pub struct BlobWriter {
    bytes: Vec<u8>,
}

impl BlobWriter {
    pub fn new() -> Self {
        BlobWriter { bytes: Vec::new() }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.bytes.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}

/// One serialized float32 tensor record in parameter-blob layout.
pub fn f32_tensor_record(shape: &[i64], values: &[f32]) -> Vec<u8> {
    let mut w = BlobWriter::new();
    w.u64(PARAM_TENSOR_MAGIC).u64(0);
    w.u32(1).u32(0); // recording device: cpu(0)
    w.u32(shape.len() as u32);
    w.u8(2).u8(32).u16(1); // float32
    for &extent in shape {
        w.i64(extent);
    }
    w.u64((values.len() * 4) as u64);
    for &value in values {
        w.raw(&value.to_le_bytes());
    }
    w.finish()
}

/// A complete parameter blob from `(name, tensor record)` pairs.
pub fn param_blob(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut w = BlobWriter::new();
    w.u64(PARAM_LIST_MAGIC).u64(0);
    w.u64(entries.len() as u64);
    for (name, _) in entries {
        w.u64(name.len() as u64).raw(name.as_bytes());
    }
    w.u64(entries.len() as u64);
    for (_, record) in entries {
        w.raw(record);
    }
    w.finish()
}
