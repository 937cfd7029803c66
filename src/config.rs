use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ApiConfig;
use crate::render::Annotator;
use crate::report::ReportingConfig;
use crate::supervisor::{RestartPolicy, SupervisorConfig, CONTROL_POLL_INTERVAL};
use crate::worker::WorkerSettings;

const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";
const DEFAULT_CONTROL_TIMEOUT_SECS: u64 = 3;
const DEFAULT_UPDATE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_VIDEOS_DIR: &str = "videos";
const DEFAULT_DETECTOR: &str = "cpu";
const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 10;
const DEFAULT_STREAM_ADDR: &str = "0.0.0.0:5001";
const DEFAULT_JPEG_QUALITY: u8 = 50;
const DEFAULT_MAX_WIDTH: u32 = 1280;
const DEFAULT_TRACK_EVICTION_FRAMES: u64 = 900;
const DEFAULT_RESTART_INITIAL_SECS: u64 = 5;
const DEFAULT_RESTART_MAX_SECS: u64 = 300;

#[derive(Debug, Deserialize, Default)]
struct CounterdConfigFile {
    backend: Option<BackendConfigFile>,
    videos_dir: Option<PathBuf>,
    detector: Option<String>,
    flip_video: Option<bool>,
    update_interval_secs: Option<u64>,
    stream: Option<StreamConfigFile>,
    label_font: Option<PathBuf>,
    track_eviction_frames: Option<u64>,
    restart: Option<RestartConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    url: Option<String>,
    auth_token: Option<String>,
    control_timeout_secs: Option<u64>,
    update_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    addr: Option<String>,
    jpeg_quality: Option<u8>,
    max_width: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RestartConfigFile {
    enabled: Option<bool>,
    initial_backoff_secs: Option<u64>,
    max_backoff_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CounterdConfig {
    pub backend: BackendSettings,
    pub videos_dir: PathBuf,
    /// Detector identifier: a registered backend name or an `.onnx` model path.
    pub detector: String,
    pub flip_video: bool,
    pub update_interval: Duration,
    pub stream: StreamSettings,
    pub label_font: Option<PathBuf>,
    /// `None` keeps crossing records for the worker's lifetime.
    pub track_eviction_frames: Option<u64>,
    pub restart: RestartSettings,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub url: String,
    pub auth_token: Option<String>,
    pub control_timeout: Duration,
    pub update_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub addr: String,
    pub jpeg_quality: u8,
    pub max_width: u32,
}

#[derive(Debug, Clone)]
pub struct RestartSettings {
    pub enabled: bool,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl CounterdConfig {
    /// Load from the file named by `COUNTER_CONFIG` (if any), then the environment.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("COUNTER_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CounterdConfigFile) -> Self {
        let backend = file.backend.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();
        let restart = file.restart.unwrap_or_default();
        Self {
            backend: BackendSettings {
                url: backend
                    .url
                    .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
                auth_token: backend.auth_token,
                control_timeout: Duration::from_secs(
                    backend
                        .control_timeout_secs
                        .unwrap_or(DEFAULT_CONTROL_TIMEOUT_SECS),
                ),
                update_timeout: Duration::from_secs(
                    backend
                        .update_timeout_secs
                        .unwrap_or(DEFAULT_UPDATE_TIMEOUT_SECS),
                ),
            },
            videos_dir: file
                .videos_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VIDEOS_DIR)),
            detector: file
                .detector
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            flip_video: file.flip_video.unwrap_or(false),
            update_interval: Duration::from_secs(
                file.update_interval_secs
                    .unwrap_or(DEFAULT_UPDATE_INTERVAL_SECS),
            ),
            stream: StreamSettings {
                addr: stream
                    .addr
                    .unwrap_or_else(|| DEFAULT_STREAM_ADDR.to_string()),
                jpeg_quality: stream.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                max_width: stream.max_width.unwrap_or(DEFAULT_MAX_WIDTH),
            },
            label_font: file.label_font,
            track_eviction_frames: eviction(
                file.track_eviction_frames
                    .unwrap_or(DEFAULT_TRACK_EVICTION_FRAMES),
            ),
            restart: RestartSettings {
                enabled: restart.enabled.unwrap_or(true),
                initial_backoff: Duration::from_secs(
                    restart
                        .initial_backoff_secs
                        .unwrap_or(DEFAULT_RESTART_INITIAL_SECS),
                ),
                max_backoff: Duration::from_secs(
                    restart
                        .max_backoff_secs
                        .unwrap_or(DEFAULT_RESTART_MAX_SECS),
                ),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = non_empty_env("COUNTER_BACKEND_URL") {
            self.backend.url = url;
        }
        if let Some(token) = non_empty_env("COUNTER_AUTH_TOKEN") {
            self.backend.auth_token = Some(token);
        }
        if let Some(dir) = non_empty_env("COUNTER_VIDEOS_DIR") {
            self.videos_dir = PathBuf::from(dir);
        }
        if let Some(detector) = non_empty_env("COUNTER_DETECTOR") {
            self.detector = detector;
        }
        if let Some(flip) = non_empty_env("COUNTER_FLIP_VIDEO") {
            self.flip_video = parse_bool("COUNTER_FLIP_VIDEO", &flip)?;
        }
        if let Some(interval) = non_empty_env("COUNTER_UPDATE_INTERVAL_SECS") {
            let seconds: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("COUNTER_UPDATE_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.update_interval = Duration::from_secs(seconds);
        }
        if let Some(addr) = non_empty_env("COUNTER_STREAM_ADDR") {
            self.stream.addr = addr;
        }
        if let Some(font) = non_empty_env("COUNTER_LABEL_FONT") {
            self.label_font = Some(PathBuf::from(font));
        }
        if let Some(frames) = non_empty_env("COUNTER_TRACK_EVICTION_FRAMES") {
            let frames: u64 = frames.trim().parse().map_err(|_| {
                anyhow!("COUNTER_TRACK_EVICTION_FRAMES must be an integer number of frames")
            })?;
            self.track_eviction_frames = eviction(frames);
        }
        if let Some(enabled) = non_empty_env("COUNTER_RESTART_FAILED") {
            self.restart.enabled = parse_bool("COUNTER_RESTART_FAILED", &enabled)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let url = url::Url::parse(&self.backend.url)
            .map_err(|e| anyhow!("invalid backend url {}: {}", self.backend.url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!("backend url must use http or https"));
        }
        self.backend.auth_token = self
            .backend
            .auth_token
            .take()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        if self.detector.trim().is_empty() {
            return Err(anyhow!("detector must not be empty"));
        }
        if self.update_interval.is_zero() {
            return Err(anyhow!("update interval must be greater than zero"));
        }
        self.stream
            .addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid stream address {}: {}", self.stream.addr, e))?;
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!("stream jpeg quality must be between 1 and 100"));
        }
        if self.stream.max_width == 0 {
            return Err(anyhow!("stream max width must be greater than zero"));
        }
        if self.backend.control_timeout.is_zero() || self.backend.update_timeout.is_zero() {
            return Err(anyhow!("backend timeouts must be greater than zero"));
        }
        if self.restart.initial_backoff.is_zero() {
            return Err(anyhow!("restart backoff must be greater than zero"));
        }
        if self.restart.max_backoff < self.restart.initial_backoff {
            return Err(anyhow!("restart max backoff must not be below the initial backoff"));
        }
        Ok(())
    }

    pub fn reporting_config(&self) -> ReportingConfig {
        ReportingConfig {
            base_url: self.backend.url.clone(),
            auth_token: self.backend.auth_token.clone(),
            control_timeout: self.backend.control_timeout,
            update_timeout: self.backend.update_timeout,
        }
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            addr: self.stream.addr.clone(),
            jpeg_quality: self.stream.jpeg_quality,
            max_width: self.stream.max_width,
            ..ApiConfig::default()
        }
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        if self.restart.enabled {
            RestartPolicy::Backoff {
                initial: self.restart.initial_backoff,
                max: self.restart.max_backoff,
            }
        } else {
            RestartPolicy::Never
        }
    }

    /// Supervisor settings; loads the label font if one is configured.
    pub fn supervisor_config(&self) -> Result<SupervisorConfig> {
        let annotator = match &self.label_font {
            Some(path) => Annotator::from_font_file(path)?,
            None => Annotator::new(),
        };
        Ok(SupervisorConfig {
            poll_interval: CONTROL_POLL_INTERVAL,
            restart: self.restart_policy(),
            worker: WorkerSettings {
                report_interval: self.update_interval,
                flip_horizontal: self.flip_video,
                track_eviction_frames: self.track_eviction_frames,
                annotator,
                ..WorkerSettings::default()
            },
        })
    }
}

fn eviction(frames: u64) -> Option<u64> {
    (frames > 0).then_some(frames)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(anyhow!("{} must be one of true/false/1/0/yes/no", key)),
    }
}

fn read_config_file(path: &Path) -> Result<CounterdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
