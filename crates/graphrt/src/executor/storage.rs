//! Translation of the compiler's storage plan into device allocations.
//!
//! Every entry names a pool buffer through `storage_id`; a pool buffer is
//! sized to the largest entry that maps onto it and allocated as a 1-D
//! float32 buffer (the allocation-unit quantization of the plan format).
//! Per-entry dtype and shape are re-imposed by the views projected on top.

use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use tracing::warn;

use crate::backend::spec::{Device, DeviceBackend, StorageBuffer};
use crate::graph::Graph;
use crate::tensor::dtype::DataType;
use crate::tensor::view::TensorView;

/// The pool buffers together with the backend that must release them.
///
/// Dropping the pool frees every buffer, which covers both executor teardown
/// and failures in setup phases that run after allocation.
pub(crate) struct StoragePool {
    backend: Arc<dyn DeviceBackend>,
    buffers: Vec<StorageBuffer>,
}

impl StoragePool {
    pub(crate) fn len(&self) -> usize {
        self.buffers.len()
    }
}

impl Drop for StoragePool {
    fn drop(&mut self) {
        let StoragePool { backend, buffers } = self;
        for buffer in buffers.iter_mut() {
            if let Err(err) = backend.free(buffer) {
                warn!("failed to release pool buffer: {err}");
            }
        }
    }
}

pub(crate) struct StoragePlan {
    pub pool: StoragePool,
    pub data_entry: Vec<TensorView>,
}

/// Decodes dtypes, sizes each pool buffer to its largest entry, allocates,
/// and projects the per-entry views.
pub(crate) fn plan_storage(
    graph: &Graph,
    backend: &Arc<dyn DeviceBackend>,
    device: Device,
) -> Result<StoragePlan> {
    let total = graph.num_node_entries();

    let mut vtype = Vec::with_capacity(total);
    for (i, tag) in graph.attrs.dltype.iter().enumerate() {
        let dtype: DataType = tag
            .parse()
            .with_context(|| format!("entry {i} has undecodable dtype tag '{tag}'"))?;
        vtype.push(dtype);
    }

    let mut entry_bytes = Vec::with_capacity(total);
    let mut pool_entry_bytes: Vec<usize> = Vec::new();
    for i in 0..total {
        let dtype = vtype[i];
        ensure!(
            dtype.is_byte_aligned(),
            "entry {i} has dtype '{}' which does not fill whole bytes",
            dtype
        );
        let sid = graph.attrs.storage_id[i];
        ensure!(
            sid >= 0,
            "entry {i} has storage id {sid}; runtime-shape operators are not supported"
        );
        let sid = sid as usize;

        let mut numel = 1usize;
        for (d, &extent) in graph.attrs.shape[i].iter().enumerate() {
            ensure!(
                extent >= 0,
                "entry {i} has negative extent {extent} in dimension {d}"
            );
            numel = numel.saturating_mul(extent as usize);
        }
        let bytes = dtype.element_bytes() * numel;
        entry_bytes.push(bytes);

        if sid >= pool_entry_bytes.len() {
            pool_entry_bytes.resize(sid + 1, 0);
        }
        pool_entry_bytes[sid] = pool_entry_bytes[sid].max(bytes);
    }

    // Partially built pools free themselves if a later allocation fails.
    let mut pool = StoragePool {
        backend: Arc::clone(backend),
        buffers: Vec::with_capacity(pool_entry_bytes.len()),
    };
    for (sid, &bytes) in pool_entry_bytes.iter().enumerate() {
        let elems = bytes.div_ceil(4).max(1);
        let buffer = backend
            .allocate(&[elems as i64], DataType::FLOAT32, device)
            .with_context(|| format!("allocating pool buffer {sid} ({bytes} bytes)"))?;
        ensure!(
            buffer.len_bytes() >= bytes,
            "backend returned {} bytes for pool buffer {sid}, need {bytes}",
            buffer.len_bytes()
        );
        pool.buffers.push(buffer);
    }

    let mut data_entry = Vec::with_capacity(total);
    for i in 0..total {
        let sid = graph.attrs.storage_id[i] as usize;
        ensure!(
            sid < pool.buffers.len(),
            "entry {i} references pool buffer {sid} of {}",
            pool.buffers.len()
        );
        let buffer = &pool.buffers[sid];
        ensure!(
            entry_bytes[i] <= buffer.len_bytes(),
            "entry {i} needs {} bytes but pool buffer {sid} holds {}",
            entry_bytes[i],
            buffer.len_bytes()
        );
        data_entry.push(buffer.view(graph.attrs.shape[i].clone(), vtype[i]));
    }

    Ok(StoragePlan { pool, data_entry })
}
