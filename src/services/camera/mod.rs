pub mod replay;
#[cfg(feature = "v4l_camera")]
pub mod v4l_camera;

pub use replay::ReplayCamera;
#[cfg(feature = "v4l_camera")]
pub use v4l_camera::V4lCamera;
