//! Scalar element descriptors shared by graph entries, pool buffers and
//! parameter blobs.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

/// Base type class of a scalar, matching the numbering used by the graph
/// description and the parameter blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DTypeCode {
    Int = 0,
    UInt = 1,
    Float = 2,
    Handle = 3,
}

impl DTypeCode {
    /// Reconstructs a code from its serialized tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DTypeCode::Int),
            1 => Some(DTypeCode::UInt),
            2 => Some(DTypeCode::Float),
            3 => Some(DTypeCode::Handle),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Full scalar descriptor: type class, bit width and vector lane count.
///
/// The textual form is the class name followed by the bit width and an
/// optional `x<lanes>` suffix, e.g. `"float32"`, `"int8x4"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType {
    pub code: DTypeCode,
    pub bits: u8,
    pub lanes: u16,
}

impl DataType {
    pub const FLOAT32: DataType = DataType {
        code: DTypeCode::Float,
        bits: 32,
        lanes: 1,
    };

    pub const INT32: DataType = DataType {
        code: DTypeCode::Int,
        bits: 32,
        lanes: 1,
    };

    pub fn new(code: DTypeCode, bits: u8, lanes: u16) -> Self {
        DataType { code, bits, lanes }
    }

    /// Bytes occupied by one (possibly vectorized) element, rounded up to
    /// whole bytes.
    pub fn element_bytes(self) -> usize {
        (self.bits as usize * self.lanes as usize).div_ceil(8)
    }

    /// Whether elements occupy a whole number of bytes. Storage planning
    /// requires this; sub-byte types cannot be projected onto pool slices.
    pub fn is_byte_aligned(self) -> bool {
        (self.bits as usize * self.lanes as usize) % 8 == 0
    }
}

impl FromStr for DataType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (head, lanes) = match s.split_once('x') {
            Some((head, lanes)) => {
                let lanes: u16 = lanes
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid lane count in dtype '{s}'"))?;
                (head, lanes)
            }
            None => (s, 1),
        };

        if head == "handle" {
            return Ok(DataType::new(DTypeCode::Handle, 64, lanes));
        }

        let (code, bits_str) = if let Some(rest) = head.strip_prefix("float") {
            (DTypeCode::Float, rest)
        } else if let Some(rest) = head.strip_prefix("uint") {
            (DTypeCode::UInt, rest)
        } else if let Some(rest) = head.strip_prefix("int") {
            (DTypeCode::Int, rest)
        } else {
            bail!("unknown dtype '{s}'");
        };

        let bits: u8 = bits_str
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid bit width in dtype '{s}'"))?;
        if bits == 0 {
            bail!("dtype '{s}' has zero bit width");
        }
        Ok(DataType::new(code, bits, lanes))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            DTypeCode::Int => write!(f, "int{}", self.bits)?,
            DTypeCode::UInt => write!(f, "uint{}", self.bits)?,
            DTypeCode::Float => write!(f, "float{}", self.bits)?,
            DTypeCode::Handle => write!(f, "handle")?,
        }
        if self.lanes != 1 {
            write!(f, "x{}", self.lanes)?;
        }
        Ok(())
    }
}
