mod backend;
mod backends;
mod classes;
pub mod postprocess;
mod result;

pub use backend::Detector;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use classes::ClassNameTable;
pub use result::{BoundingBox, Detection, DetectionBatch, RawDetection};
