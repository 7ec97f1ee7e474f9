pub mod coco;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use coco::COCO_CLASSES;
pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
