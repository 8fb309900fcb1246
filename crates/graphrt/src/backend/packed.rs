//! The type-erased call convention shared by kernel invocation and the
//! public dispatch surface.
//!
//! Every argument travels as an [`ArgValue`] cell with a parallel
//! [`ArgTypeCode`]; kernels receive the whole frame as [`PackedArgs`] and
//! downcast positionally. Frames are packed once at bind time so a run makes
//! no per-call allocations.

use crate::backend::spec::BackendError;
use crate::tensor::view::TensorView;

/// Runtime type tag of a packed argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgTypeCode {
    TensorHandle,
    Int,
    Str,
    Bytes,
}

/// One argument cell.
#[derive(Debug, Clone)]
pub enum ArgValue {
    Tensor(TensorView),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl ArgValue {
    pub fn type_code(&self) -> ArgTypeCode {
        match self {
            ArgValue::Tensor(_) => ArgTypeCode::TensorHandle,
            ArgValue::Int(_) => ArgTypeCode::Int,
            ArgValue::Str(_) => ArgTypeCode::Str,
            ArgValue::Bytes(_) => ArgTypeCode::Bytes,
        }
    }
}

/// A pre-packed argument frame: value cells plus their type codes.
#[derive(Debug, Clone)]
pub struct PackedArgs {
    values: Box<[ArgValue]>,
    type_codes: Box<[ArgTypeCode]>,
}

impl PackedArgs {
    pub fn pack(values: Vec<ArgValue>) -> Self {
        let type_codes = values.iter().map(ArgValue::type_code).collect();
        PackedArgs {
            values: values.into_boxed_slice(),
            type_codes,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn type_codes(&self) -> &[ArgTypeCode] {
        &self.type_codes
    }

    pub fn value(&self, index: usize) -> Option<&ArgValue> {
        self.values.get(index)
    }

    /// Positional downcast to a tensor view.
    pub fn tensor(&self, index: usize) -> Result<&TensorView, BackendError> {
        match self.values.get(index) {
            Some(ArgValue::Tensor(view)) => Ok(view),
            _ => Err(BackendError::ArgType {
                index,
                expected: "tensor handle",
            }),
        }
    }

    /// Views of every tensor argument, in frame order.
    pub fn tensors(&self) -> impl Iterator<Item = &TensorView> {
        self.values.iter().filter_map(|value| match value {
            ArgValue::Tensor(view) => Some(view),
            _ => None,
        })
    }

    /// Mutable access used by the binder for the flatten-data rewrite.
    pub(crate) fn tensors_mut(&mut self) -> impl Iterator<Item = &mut TensorView> {
        self.values.iter_mut().filter_map(|value| match value {
            ArgValue::Tensor(view) => Some(view),
            _ => None,
        })
    }
}

/// Result cell of a dispatch-surface operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetValue {
    None,
    Str(String),
}

impl RetValue {
    pub fn into_string(self) -> Option<String> {
        match self {
            RetValue::Str(s) => Some(s),
            RetValue::None => None,
        }
    }
}
