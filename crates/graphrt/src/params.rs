//! Decoder for the self-describing parameter blob.
//!
//! The blob carries pre-trained tensors keyed by input *name* rather than
//! entry id, so it stays portable across recompilations that preserve the
//! input surface. Every tensor is verified against the planned entry before
//! its bytes are copied in; loading never allocates device memory.

use anyhow::{anyhow, bail, ensure, Context, Result};

use crate::backend::spec::{Device, DeviceBackend};
use crate::graph::Graph;
use crate::tensor::view::TensorView;

/// Magic of the enclosing tensor-list wrapper.
pub const PARAM_LIST_MAGIC: u64 = 0xF7E5_8D4F_0504_9CB7;
/// Magic of each serialized tensor record.
pub const PARAM_TENSOR_MAGIC: u64 = 0xDD5E_40F0_96B4_A13F;

pub(crate) fn load_params(
    graph: &Graph,
    data_entry: &[TensorView],
    backend: &dyn DeviceBackend,
    blob: &[u8],
) -> Result<()> {
    let mut reader = BlobReader::new(blob);

    let header = reader.read_u64().context("reading parameter list header")?;
    ensure!(
        header == PARAM_LIST_MAGIC,
        "parameter blob has invalid list magic {header:#018x}"
    );
    let _reserved = reader.read_u64().context("reading reserved field")?;

    let name_count = reader.read_u64().context("reading name count")? as usize;
    let mut names = Vec::with_capacity(name_count);
    for i in 0..name_count {
        let len = reader
            .read_u64()
            .with_context(|| format!("reading length of name {i}"))? as usize;
        let bytes = reader
            .read_bytes(len)
            .with_context(|| format!("reading name {i}"))?;
        let name = std::str::from_utf8(bytes)
            .with_context(|| format!("parameter name {i} is not UTF-8"))?;
        names.push(name.to_owned());
    }

    let data_count = reader.read_u64().context("reading tensor count")? as usize;
    ensure!(
        data_count == names.len(),
        "parameter blob declares {data_count} tensors for {} names",
        names.len()
    );

    for name in &names {
        let input_index = graph
            .input_index(name)
            .ok_or_else(|| anyhow!("parameter '{name}' does not match any graph input"))?;
        let eid = graph.entry_id(graph.input_nodes[input_index], 0);
        ensure!(
            eid < data_entry.len(),
            "input '{name}' maps to entry {eid} beyond the planned {}",
            data_entry.len()
        );
        load_tensor(&mut reader, &data_entry[eid], backend)
            .with_context(|| format!("loading parameter '{name}'"))?;
    }

    Ok(())
}

/// Reads one tensor record and copies it into its planned entry after
/// verifying rank, dtype, shape and payload size against the plan.
fn load_tensor(
    reader: &mut BlobReader<'_>,
    dst: &TensorView,
    backend: &dyn DeviceBackend,
) -> Result<()> {
    let header = reader.read_u64().context("reading tensor header")?;
    ensure!(
        header == PARAM_TENSOR_MAGIC,
        "tensor record has invalid magic {header:#018x}"
    );
    let _reserved = reader.read_u64().context("reading reserved field")?;

    // The recording device is informational; placement comes from the plan.
    let _device_type = reader.read_u32()?;
    let _device_id = reader.read_u32()?;

    let ndim = reader.read_u32().context("reading rank")? as usize;
    let code = reader.read_u8()?;
    let bits = reader.read_u8()?;
    let lanes = reader.read_u16()?;

    ensure!(
        ndim == dst.ndim(),
        "rank {ndim} does not match planned rank {}",
        dst.ndim()
    );
    let dtype = dst.dtype();
    ensure!(
        code == dtype.code.tag() && bits == dtype.bits && lanes == dtype.lanes,
        "dtype (code {code}, {bits} bits, {lanes} lanes) does not match planned '{dtype}'"
    );

    for d in 0..ndim {
        let extent = reader
            .read_i64()
            .with_context(|| format!("reading extent of dimension {d}"))?;
        ensure!(
            extent == dst.shape()[d],
            "dimension {d} has extent {extent}, planned {}",
            dst.shape()[d]
        );
    }

    let data_byte_size = reader.read_u64().context("reading payload size")? as usize;
    ensure!(
        data_byte_size == dst.byte_size(),
        "payload is {data_byte_size} bytes, planned entry holds {}",
        dst.byte_size()
    );
    let data = reader.read_bytes(data_byte_size).context("reading payload")?;

    let src = TensorView::from_raw_parts(
        data.as_ptr() as *mut u8,
        Device::cpu(),
        dtype,
        dst.shape().to_vec(),
    );
    backend.copy(&src, dst)?;
    Ok(())
}

/// Little-endian cursor over the parameter blob.
struct BlobReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BlobReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        BlobReader { buf, pos: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < len {
            bail!(
                "blob truncated at byte {}: need {len} more, {} remain",
                self.pos,
                self.buf.len() - self.pos
            );
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes(bytes.try_into().expect("length checked")))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("length checked")))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("length checked")))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.read_bytes(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().expect("length checked")))
    }
}
