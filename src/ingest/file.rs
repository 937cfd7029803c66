//! Local file frame source.
//!
//! `FileSource` opens a building's video relative to the video directory:
//! - `stub://<scene>?frames=N&fps=F`: synthetic scene (`walk-down`, `walk-up`, `idle`)
//! - anything else: a local file decoded with FFmpeg (feature `ingest-file-ffmpeg`)
//!
//! Remote URL schemes are refused.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use image::{Rgb, RgbImage};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::{FrameSource, SourceStats};
use crate::frame::{Frame, PLACEHOLDER_HEIGHT, PLACEHOLDER_WIDTH};

const STUB_SCHEME: &str = "stub://";

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Resolved local path or a `stub://` scene URL.
    pub path: String,
}

impl FileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Resolve a building's video reference against the video directory.
///
/// Absolute paths, `..` components and URL schemes other than `stub://` are
/// rejected so a control document cannot point a worker outside the directory.
pub fn resolve_video_path(videos_dir: &Path, video_ref: &str) -> Result<String> {
    let video_ref = video_ref.trim();
    if video_ref.is_empty() {
        bail!("video path is empty");
    }
    if video_ref.starts_with(STUB_SCHEME) {
        return Ok(video_ref.to_string());
    }
    if video_ref.contains("://") {
        bail!("video path {:?} must be a local file (no URL schemes)", video_ref);
    }
    let relative = Path::new(video_ref);
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => bail!(
                "video path {:?} must be relative to the video directory",
                video_ref
            ),
        }
    }
    let full: PathBuf = videos_dir.join(relative);
    if !full.is_file() {
        bail!("video file {} not found", full.display());
    }
    Ok(full.to_string_lossy().into_owned())
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn open(config: FileConfig) -> Result<Self> {
        if config.path.trim().is_empty() {
            bail!("file source path is empty");
        }
        if config.path.starts_with(STUB_SCHEME) {
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticFileSource::parse(&config.path)?),
            });
        }
        if config.path.contains("://") {
            bail!("file ingestion only supports local paths (no URL schemes)");
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                backend: FileBackend::Ffmpeg(FfmpegFileSource::open(&config.path)?),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            bail!(
                "decoding {} requires the ingest-file-ffmpeg feature",
                config.path
            )
        }
    }

    fn inner(&self) -> &dyn FrameSource {
        match &self.backend {
            FileBackend::Synthetic(source) => source,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn FrameSource {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source,
        }
    }
}

impl FrameSource for FileSource {
    fn describe(&self) -> String {
        self.inner().describe()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.inner_mut().next_frame()
    }

    fn rewind(&mut self) -> Result<()> {
        self.inner_mut().rewind()
    }

    fn frame_interval(&self) -> Option<Duration> {
        self.inner().frame_interval()
    }

    fn stats(&self) -> SourceStats {
        self.inner().stats()
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and demos
// ----------------------------------------------------------------------------

const FIGURE_WIDTH: u32 = 40;
const FIGURE_HEIGHT: u32 = 80;
const FIGURE_TOP_CY: f32 = 40.0;
const FIGURE_BOTTOM_CY: f32 = 440.0;
/// Slowest synthetic rate: one frame every 100 s.
const MIN_STUB_FPS: f64 = 0.01;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scene {
    WalkDown,
    WalkUp,
    Idle,
}

struct SyntheticFileSource {
    url: String,
    scene: Scene,
    frames: u64,
    fps: f64,
    position: u64,
    stats: SourceStats,
}

impl SyntheticFileSource {
    fn parse(raw: &str) -> Result<Self> {
        let url = url::Url::parse(raw).with_context(|| format!("invalid stub url {}", raw))?;
        let scene = match url.host_str().unwrap_or_default() {
            "walk-down" => Scene::WalkDown,
            "walk-up" => Scene::WalkUp,
            "idle" => Scene::Idle,
            other => bail!("unknown stub scene {:?}", other),
        };

        let mut frames = 120u64;
        let mut fps = 30.0f64;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "frames" => {
                    frames = value
                        .parse()
                        .with_context(|| format!("invalid frames value {:?}", value))?
                }
                "fps" => {
                    fps = value
                        .parse()
                        .with_context(|| format!("invalid fps value {:?}", value))?
                }
                other => log::debug!("FileSource: ignoring stub parameter {}", other),
            }
        }
        if frames == 0 {
            bail!("stub scene needs at least one frame");
        }
        if !(fps.is_finite() && fps >= MIN_STUB_FPS) {
            bail!("stub fps must be a finite number >= {}", MIN_STUB_FPS);
        }

        log::info!("FileSource: opened {} (synthetic)", raw);
        Ok(Self {
            url: raw.to_string(),
            scene,
            frames,
            fps,
            position: 0,
            stats: SourceStats {
                path: raw.to_string(),
                ..SourceStats::default()
            },
        })
    }

    fn figure_cy(&self, position: u64) -> f32 {
        let t = if self.frames > 1 {
            position as f32 / (self.frames - 1) as f32
        } else {
            0.0
        };
        let span = FIGURE_BOTTOM_CY - FIGURE_TOP_CY;
        match self.scene {
            Scene::WalkDown => FIGURE_TOP_CY + span * t,
            Scene::WalkUp => FIGURE_BOTTOM_CY - span * t,
            Scene::Idle => FIGURE_TOP_CY,
        }
    }

    fn render(&self, position: u64) -> RgbImage {
        let mut image = RgbImage::new(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT);
        if self.scene == Scene::Idle {
            return image;
        }
        let cx = PLACEHOLDER_WIDTH / 2;
        let cy = self.figure_cy(position).round() as u32;
        let x0 = cx - FIGURE_WIDTH / 2;
        let y0 = cy.saturating_sub(FIGURE_HEIGHT / 2);
        let y1 = (y0 + FIGURE_HEIGHT).min(PLACEHOLDER_HEIGHT);
        for y in y0..y1 {
            for x in x0..x0 + FIGURE_WIDTH {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        image
    }
}

impl FrameSource for SyntheticFileSource {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.url)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.position >= self.frames {
            return Ok(None);
        }
        let image = self.render(self.position);
        self.position += 1;
        self.stats.frames_read += 1;
        Ok(Some(Frame::new(image, self.position)))
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        self.stats.rewinds += 1;
        Ok(())
    }

    fn frame_interval(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(1.0 / self.fps).ok()
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}
