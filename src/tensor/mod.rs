mod tensor;

pub use tensor::{element_count, flatten_json, DType, Tensor, TensorError};
