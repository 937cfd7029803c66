//! Frame ingestion sources.
//!
//! A building's video is either a local file (decoded with FFmpeg, feature
//! `ingest-file-ffmpeg`) or a synthetic `stub://` scene used for tests and
//! demos. Sources only decode; they never persist frames.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;

use std::time::Duration;

use anyhow::Result;

use crate::frame::Frame;

pub use file::{resolve_video_path, FileConfig, FileSource};

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Frames returned since the source was opened (across rewinds).
    pub frames_read: u64,
    pub rewinds: u64,
    pub path: String,
}

/// A sequential, rewindable supply of frames for one building.
pub trait FrameSource: Send {
    /// Human-readable source description for logs.
    fn describe(&self) -> String;

    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Restart from the first frame.
    fn rewind(&mut self) -> Result<()>;

    /// Native interval between frames, if the source reports one.
    fn frame_interval(&self) -> Option<Duration>;

    fn stats(&self) -> SourceStats;
}
