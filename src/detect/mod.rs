mod backend;
pub mod backends;
mod labels;
mod registry;
mod result;

pub use backend::{Detector, DeviceSelector};
pub use backends::StubBackend;
pub use labels::ClassMap;
pub use registry::{BackendRegistry, DetectorFactory, ModelSpec};
pub use result::{Detection, DetectionSet, PixelBox, RawDetection};
