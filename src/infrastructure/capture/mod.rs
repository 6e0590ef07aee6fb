//! Audio capture infrastructure module
//!
//! Opens cpal input streams and writes canonical-format WAV segments.

mod cpal_capture;

pub use cpal_capture::{create_capture, segment_spec, CpalCapture, CpalRoutes, TARGET_SAMPLE_RATE};
