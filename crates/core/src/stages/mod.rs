//! Per-run pipeline stages, in execution order.

pub mod encode;
pub mod extract;
pub mod interpolate;
pub mod write;

pub use encode::VideoEncoder;
pub use extract::FrameExtractor;
pub use interpolate::{interpolate_recursively, FrameInterpolator};
pub use write::write_all;
