//! Local media capture and control

pub mod capture;
pub mod controller;

pub use capture::{CaptureDevice, CaptureError, CaptureRequest, CaptureStream, SyntheticCapture};
pub use controller::{AcquisitionMode, LocalMediaController, LocalStream};
