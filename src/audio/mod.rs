pub mod backend;
pub mod file;
pub mod gain;
pub mod level;
pub mod merge;
pub mod sample;
pub mod segment;
pub mod wav;

pub use backend::{CaptureBackend, CaptureConfig, CaptureStream, FrameBuffer};
pub use file::WavFileBackend;
pub use gain::{gain_factor, GainNormalizer, RawSegment};
pub use level::{LevelMeter, SpectrumLevelMeter, LEVEL_FLOOR_DB};
pub use merge::merge_segments;
pub use sample::SampleEncoding;
pub use segment::{Segment, SegmentStore};
pub use wav::{prepend_wav_header, wav_header, WAV_HEADER_LEN};
