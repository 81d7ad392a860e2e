// Walker component (spec §4.1): the GPU/CPU iteration kernel and the
// host-side dispatch/submission loop built around it.

pub mod gpu;
pub mod kernel;
pub mod submit;

pub use gpu::{DispatchConfig, DpPair, GpuWalker};
pub use submit::Submitter;
