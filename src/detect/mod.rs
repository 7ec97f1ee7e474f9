mod backend;
mod backends;
mod handle;
mod result;

pub use backend::{DetectionCapability, DetectorBackend};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::COCO_CLASSES;
pub use handle::DetectorHandle;
pub use result::{BoundingBox, Detection};
