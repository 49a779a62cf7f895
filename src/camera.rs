use async_trait::async_trait;
use image::{ImageBuffer, Rgb, RgbImage};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::SystemTime;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, sleep, Duration, MissedTickBehavior};

use crate::config::{CameraBackendKind, CameraConfig};
use crate::errors::AcquisitionError;

static MOBILE_AGENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)iPhone|iPad|iPod|Android").expect("mobile agent pattern is valid"));

/// Which physical camera a stream is opened on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    /// User-facing camera
    Front,
    /// Environment-facing camera
    Back,
}

impl Facing {
    pub fn opposite(self) -> Facing {
        match self {
            Facing::Front => Facing::Back,
            Facing::Back => Facing::Front,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Facing::Front => "front",
            Facing::Back => "back",
        }
    }
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

pub fn is_mobile_agent(agent: &str) -> bool {
    MOBILE_AGENT.is_match(agent)
}

/// Facing to open on first capture.
///
/// An explicit `default_facing` always wins. Otherwise mobile-class devices,
/// detected from the configured user agent or the host OS, start on the
/// back camera and everything else starts on the front one.
pub fn preferred_facing(config: &CameraConfig) -> Facing {
    if let Some(facing) = config.default_facing {
        return facing;
    }

    let mobile = match &config.user_agent {
        Some(agent) => is_mobile_agent(agent),
        None => matches!(std::env::consts::OS, "android" | "ios"),
    };

    if mobile {
        Facing::Back
    } else {
        Facing::Front
    }
}

/// A single frame read off a live stream
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub pixels: RgbImage,
}

impl VideoFrame {
    pub fn new(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn is_decodable(&self) -> bool {
        self.width() > 0 && self.height() > 0
    }
}

/// An open camera stream. Holding one keeps the hardware busy.
///
/// Implementations must release the device on `stop()` and again on drop,
/// so a stream that is abandoned mid-flight never leaks its handle.
pub trait CameraStream: Send {
    fn facing(&self) -> Facing;

    /// Latest frame, or `None` while nothing decodable has arrived yet.
    fn latest_frame(&mut self) -> Option<VideoFrame>;

    fn stop(&mut self);

    fn is_open(&self) -> bool;
}

#[async_trait]
pub trait CameraBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn open(&self, facing: Facing) -> Result<Box<dyn CameraStream>, AcquisitionError>;
}

/// Pick the backend named in the config, falling back to the test pattern
/// when the libcamera tools are missing.
pub async fn backend_from_config(config: &CameraConfig) -> Arc<dyn CameraBackend> {
    match config.backend {
        #[cfg(feature = "camera")]
        CameraBackendKind::Libcamera => {
            if LibcameraBackend::probe().await {
                log::info!("Raspberry Pi Camera initialized successfully (using rpicam-still)");
                Arc::new(LibcameraBackend::from_config(config))
            } else {
                log::warn!("rpicam-still not found. Running in simulation mode.");
                Arc::new(TestPatternBackend::simulated(config))
            }
        }
        #[cfg(not(feature = "camera"))]
        CameraBackendKind::Libcamera => {
            log::warn!("Built without camera support. Running in simulation mode.");
            Arc::new(TestPatternBackend::simulated(config))
        }
        CameraBackendKind::TestPattern => Arc::new(TestPatternBackend::simulated(config)),
    }
}

// ============================================================================
// LIBCAMERA
// ============================================================================

/// Raspberry Pi cameras driven through `rpicam-still` in timelapse mode.
/// The child process is the hardware handle.
pub struct LibcameraBackend {
    width: u32,
    height: u32,
    quality: u8,
    back_index: u32,
    front_index: u32,
    preview_dir: PathBuf,
    opened: AtomicU64,
}

impl LibcameraBackend {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            quality: config.quality.min(100),
            back_index: config.back_camera_index,
            front_index: config.front_camera_index,
            preview_dir: config.preview_dir.clone(),
            opened: AtomicU64::new(0),
        }
    }

    /// Check if the rpicam-still command is available
    pub async fn probe() -> bool {
        match Command::new("rpicam-still").arg("--help").output().await {
            Ok(_) => true,
            Err(e) => {
                log::debug!("rpicam-still probe failed: {}", e);
                false
            }
        }
    }

    fn camera_index(&self, facing: Facing) -> u32 {
        match facing {
            Facing::Back => self.back_index,
            Facing::Front => self.front_index,
        }
    }

    /// A fresh file per open, so a stale stream cleaning up never deletes
    /// the preview its successor is writing
    fn next_preview_path(&self, facing: Facing) -> PathBuf {
        let sequence = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        self.preview_dir.join(format!(
            "instant_camera_preview_{}_{}_{}.jpg",
            std::process::id(),
            facing.label(),
            sequence
        ))
    }
}

#[async_trait]
impl CameraBackend for LibcameraBackend {
    fn name(&self) -> &'static str {
        "libcamera"
    }

    async fn open(&self, facing: Facing) -> Result<Box<dyn CameraStream>, AcquisitionError> {
        let preview_path = self.next_preview_path(facing);
        if preview_path.exists() {
            let _ = tokio::fs::remove_file(&preview_path).await;
        }

        let args = [
            "--camera".to_string(), self.camera_index(facing).to_string(),
            "-o".to_string(), preview_path.display().to_string(),
            "--width".to_string(), self.width.to_string(),
            "--height".to_string(), self.height.to_string(),
            "--quality".to_string(), self.quality.to_string(),
            "--timeout".to_string(), "0".to_string(),      // Run until killed
            "--timelapse".to_string(), "100".to_string(),  // Rewrite the preview every 100ms
            "--nopreview".to_string(),
        ];
        log::info!("Preview command: rpicam-still {}", args.join(" "));

        let mut child = Command::new("rpicam-still")
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AcquisitionError::from_io("failed to start rpicam-still", e))?;

        // A process that exits straight away never got hold of the device
        sleep(Duration::from_millis(200)).await;
        match child.try_wait() {
            Ok(Some(status)) => {
                return Err(AcquisitionError::Device(format!(
                    "rpicam-still exited with {} for {} camera",
                    status, facing
                )));
            }
            Ok(None) => {}
            Err(e) => return Err(AcquisitionError::from_io("failed to query rpicam-still", e)),
        }

        log::info!("Camera preview started on {} camera", facing);
        let (sender, frames) = watch::channel(None);
        let reader = tokio::spawn(watch_preview(preview_path.clone(), PREVIEW_POLL, sender));

        Ok(Box::new(LibcameraStream {
            child: Some(child),
            facing,
            preview_path,
            reader,
            frames,
        }))
    }
}

struct LibcameraStream {
    child: Option<Child>,
    facing: Facing,
    preview_path: PathBuf,
    reader: JoinHandle<()>,
    frames: watch::Receiver<Option<VideoFrame>>,
}

impl CameraStream for LibcameraStream {
    fn facing(&self) -> Facing {
        self.facing
    }

    fn latest_frame(&mut self) -> Option<VideoFrame> {
        if self.child.is_none() {
            return None;
        }
        self.frames.borrow().clone()
    }

    fn stop(&mut self) {
        self.reader.abort();
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            log::info!("Camera preview stopped on {} camera", self.facing);
        }
        if self.preview_path.exists() {
            let _ = std::fs::remove_file(&self.preview_path);
        }
    }

    fn is_open(&self) -> bool {
        self.child.is_some()
    }
}

const PREVIEW_POLL: Duration = Duration::from_millis(33);

/// Decode the preview file whenever rpicam rewrites it, off the UI thread.
/// Runs until the stream stops or nobody is listening.
async fn watch_preview(path: PathBuf, every: Duration, frames: watch::Sender<Option<VideoFrame>>) {
    let mut interval = time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_modified: Option<SystemTime> = None;

    loop {
        interval.tick().await;
        if frames.is_closed() {
            return;
        }

        let modified = match tokio::fs::metadata(&path).await.and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(_) => continue,
        };
        if last_modified == Some(modified) {
            continue;
        }

        let decode_path = path.clone();
        match tokio::task::spawn_blocking(move || image::open(decode_path)).await {
            Ok(Ok(img)) => {
                last_modified = Some(modified);
                if frames.send(Some(VideoFrame::new(img.to_rgb8()))).is_err() {
                    return;
                }
            }
            // Half-written file, keep the previous frame
            Ok(Err(e)) => log::debug!("Preview not decodable yet: {}", e),
            Err(e) => {
                log::warn!("Preview decoder stopped: {}", e);
                return;
            }
        }
    }
}

impl Drop for LibcameraStream {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// TEST PATTERN
// ============================================================================

/// Synthetic camera for development machines and tests
pub struct TestPatternBackend {
    width: u32,
    height: u32,
    latency: Duration,
    warmup_frames: u32,
    deny: Option<String>,
    open_handles: Arc<AtomicUsize>,
}

impl TestPatternBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            latency: Duration::ZERO,
            warmup_frames: 0,
            deny: None,
            open_handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Behaves like a slow real camera: a short open delay and a few empty
    /// reads before the first frame
    pub fn simulated(config: &CameraConfig) -> Self {
        Self::new(config.width, config.height)
            .with_latency(Duration::from_millis(150))
            .with_warmup_frames(3)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of reads that return nothing before the first frame decodes
    pub fn with_warmup_frames(mut self, frames: u32) -> Self {
        self.warmup_frames = frames;
        self
    }

    #[cfg(test)]
    pub fn denying(mut self, reason: &str) -> Self {
        self.deny = Some(reason.to_string());
        self
    }

    /// Live count of streams that have been opened and not yet released
    #[cfg(test)]
    pub fn open_handles(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.open_handles)
    }
}

#[async_trait]
impl CameraBackend for TestPatternBackend {
    fn name(&self) -> &'static str {
        "test-pattern"
    }

    async fn open(&self, facing: Facing) -> Result<Box<dyn CameraStream>, AcquisitionError> {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        if let Some(reason) = &self.deny {
            return Err(AcquisitionError::PermissionDenied(reason.clone()));
        }

        let open = self.open_handles.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("Test pattern stream opened on {} camera ({} open)", facing, open);

        Ok(Box::new(TestPatternStream {
            facing,
            width: self.width,
            height: self.height,
            warmup_remaining: self.warmup_frames,
            frame_counter: 0,
            open: true,
            open_handles: Arc::clone(&self.open_handles),
        }))
    }
}

struct TestPatternStream {
    facing: Facing,
    width: u32,
    height: u32,
    warmup_remaining: u32,
    frame_counter: u32,
    open: bool,
    open_handles: Arc<AtomicUsize>,
}

impl CameraStream for TestPatternStream {
    fn facing(&self) -> Facing {
        self.facing
    }

    fn latest_frame(&mut self) -> Option<VideoFrame> {
        if !self.open {
            return None;
        }
        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            return None;
        }

        self.frame_counter = self.frame_counter.wrapping_add(1);
        let (width, height) = (self.width, self.height);
        let shift = (self.frame_counter % 256) as u8;
        // Front camera gets a blue cast so flips are visible on screen
        let blue_base = if self.facing == Facing::Front { 160 } else { 40 };

        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            let b = blue_base + ((x + y) % 64) as u8;
            Rgb([r.wrapping_add(shift), g, b])
        });
        Some(VideoFrame::new(img))
    }

    fn stop(&mut self) {
        if self.open {
            self.open = false;
            self.open_handles.fetch_sub(1, Ordering::SeqCst);
            log::debug!("Test pattern stream released on {} camera", self.facing);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for TestPatternStream {
    fn drop(&mut self) {
        self.stop();
    }
}
