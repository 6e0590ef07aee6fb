//! Segment persistence infrastructure module

mod wav_store;

pub use wav_store::WavSegmentStore;
