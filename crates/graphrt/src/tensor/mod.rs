pub mod dtype;
pub mod view;

pub use dtype::{DTypeCode, DataType};
pub use view::{TensorView, ViewElement};
