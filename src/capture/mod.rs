pub mod decoder;
pub mod frame;
pub mod source;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use decoder::ColorConverter;
pub use frame::{CanonicalFrame, DisplayRotation, Facing, Plane, RawFrame};
pub use source::{CaptureSession, SharedSettings, SyntheticCamera};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Camera;
