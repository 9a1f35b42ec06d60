mod cells;
mod tape;
mod tensor;

pub use tape::Tape;
pub use tensor::Tensor;
