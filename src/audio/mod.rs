pub mod backend;
pub mod capture;
pub mod chunk;
pub mod file;
pub mod lease;
pub mod playback;

pub use backend::{
    AudioBackendFactory, CaptureBackend, CaptureConfig, CaptureSource, PlaybackBackend,
    PlaybackConfig, PlaybackTarget,
};
pub use capture::AudioCaptureSource;
pub use chunk::{chunk_channel, AudioChunk, ChunkSender, Sequencer};
pub use file::{AudioFile, FileCaptureBackend, FilePlaybackBackend};
pub use lease::{DeviceLease, LeaseRegistry};
pub use playback::{PlaybackCounters, PlaybackQueue, PlaybackSink};
