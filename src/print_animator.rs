use anyhow::Context;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use std::io::Cursor;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::time::Duration;

use crate::animation::{AnimationClip, AnimationFrame, ClipAction, PlaybackHandle};
use crate::assets::LoadedScene;
use crate::compositor::StillImage;
use crate::config::PrintConfig;
use crate::errors::TextureDecodeError;
use crate::scene::{PrintSource, SceneGraph, Texture, TextureBinding};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintSettings {
    pub target_mesh: String,
    pub material_slot: String,
    pub clip_name: String,
    pub tick_interval: Duration,
}

impl PrintSettings {
    pub fn from_config(config: &PrintConfig) -> Self {
        Self {
            target_mesh: config.target_mesh.clone(),
            material_slot: config.material_slot.clone(),
            clip_name: config.clip_name.clone(),
            tick_interval: Duration::from_millis(config.tick_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintAnimationState {
    Idle,
    Loading,
    Playing,
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrintEvent {
    Bound { generation: u64, source: PrintSource },
    Finished { generation: u64 },
}

struct DecodedPrint {
    texture: Texture,
    source: PrintSource,
}

struct PendingDecode {
    generation: u64,
    receiver: oneshot::Receiver<Result<DecodedPrint, TextureDecodeError>>,
}

/// Binds stills onto the photo plane and plays the eject clip.
///
/// Each `play()` supersedes the previous one: its decode receiver and its
/// playback handle are dropped, so nothing from the older request can reach
/// the scene afterwards.
pub struct PrintAnimator {
    scene: SceneGraph,
    clips: Vec<Arc<AnimationClip>>,
    settings: PrintSettings,
    fallback: Arc<[u8]>,
    runtime: Handle,
    state: PrintAnimationState,
    generation: u64,
    loading: Option<PendingDecode>,
    playback: Option<PlaybackHandle>,
    binding: Option<TextureBinding>,
}

impl PrintAnimator {
    pub fn new(loaded: LoadedScene, settings: PrintSettings, fallback: Arc<[u8]>, runtime: Handle) -> Self {
        match AnimationClip::find_by_name(&loaded.clips, &settings.clip_name) {
            Some(clip) => {
                for track in &clip.tracks {
                    if loaded.scene.find_node(&track.node).is_none() {
                        log::warn!("Clip '{}' animates missing node '{}'", clip.name, track.node);
                    }
                }
            }
            None => {
                log::warn!("Scene has no '{}' clip; prints will appear without ejecting", settings.clip_name);
            }
        }

        Self {
            scene: loaded.scene,
            clips: loaded.clips,
            settings,
            fallback,
            runtime,
            state: PrintAnimationState::Idle,
            generation: 0,
            loading: None,
            playback: None,
            binding: None,
        }
    }

    /// Start printing `still`, or the fallback placeholder when there is none
    pub fn play(&mut self, still: Option<StillImage>) {
        self.generation += 1;
        let generation = self.generation;

        if let Some(previous) = self.playback.take() {
            log::debug!("Print #{} supersedes playback #{}", generation, previous.id());
        }
        if let Some(previous) = self.loading.take() {
            log::debug!("Print #{} supersedes decode #{}", generation, previous.generation);
        }

        if still.is_none() {
            log::warn!("No image provided to play(). Using fallback.");
        }

        let (sender, receiver) = oneshot::channel();
        let fallback = Arc::clone(&self.fallback);
        self.runtime.spawn_blocking(move || {
            if sender.is_closed() {
                return;
            }
            let decoded = decode_print(still.as_ref(), &fallback);
            if sender.send(decoded).is_err() {
                log::debug!("Decode #{} finished after being superseded", generation);
            }
        });

        self.loading = Some(PendingDecode { generation, receiver });
        self.state = PrintAnimationState::Loading;
    }

    /// Apply finished decodes and animation frames. Call once per host frame.
    ///
    /// Errors only when the fallback itself cannot be decoded; the animator
    /// is back to idle afterwards.
    pub fn poll(&mut self) -> Result<Vec<PrintEvent>, TextureDecodeError> {
        let mut events = Vec::new();

        if let Some(mut pending) = self.loading.take() {
            match pending.receiver.try_recv() {
                Err(TryRecvError::Empty) => self.loading = Some(pending),
                Err(TryRecvError::Closed) => {
                    self.state = PrintAnimationState::Idle;
                    return Err(TextureDecodeError::Interrupted);
                }
                Ok(Err(e)) => {
                    log::error!("Print #{} failed, fallback image unusable: {}", pending.generation, e);
                    self.state = PrintAnimationState::Idle;
                    return Err(e);
                }
                Ok(Ok(decoded)) => {
                    // The bind is in place before the eject starts moving
                    self.bind(pending.generation, decoded, &mut events);
                    self.start_playback(pending.generation, &mut events);
                }
            }
        }

        if let Some(playback) = self.playback.as_mut() {
            if let Some(frame) = playback.take_frame() {
                apply_pose(&mut self.scene, &frame);
                if frame.finished && self.state == PrintAnimationState::Playing {
                    self.state = PrintAnimationState::Finished;
                    log::info!("Print #{} ejected after {:.2}s", playback.id(), frame.time);
                    events.push(PrintEvent::Finished { generation: playback.id() });
                }
            }
        }

        Ok(events)
    }

    pub fn state(&self) -> PrintAnimationState {
        self.state
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    pub fn binding(&self) -> Option<&TextureBinding> {
        self.binding.as_ref()
    }

    pub fn settings(&self) -> &PrintSettings {
        &self.settings
    }

    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub fn playback(&self) -> Option<&PlaybackHandle> {
        self.playback.as_ref()
    }

    pub fn is_animating(&self) -> bool {
        matches!(self.state, PrintAnimationState::Loading | PrintAnimationState::Playing)
    }

    fn bind(&mut self, generation: u64, decoded: DecodedPrint, events: &mut Vec<PrintEvent>) {
        let binding = TextureBinding {
            mesh: self.settings.target_mesh.clone(),
            slot: self.settings.material_slot.clone(),
            texture: Arc::new(decoded.texture),
            source: decoded.source,
        };

        if self.scene.apply_binding(&binding).is_none() {
            log::warn!(
                "Mesh '{}' has no '{}' material; print #{} not bound",
                binding.mesh,
                binding.slot,
                generation
            );
            return;
        }

        log::info!(
            "Print #{} bound to {}/{} from {:?} ({}x{})",
            generation,
            binding.mesh,
            binding.slot,
            binding.source,
            binding.texture.width(),
            binding.texture.height()
        );
        events.push(PrintEvent::Bound {
            generation,
            source: binding.source,
        });
        self.binding = Some(binding);
    }

    fn start_playback(&mut self, generation: u64, events: &mut Vec<PrintEvent>) {
        let Some(clip) = AnimationClip::find_by_name(&self.clips, &self.settings.clip_name).cloned() else {
            log::warn!("Clip '{}' not found; print #{} shown without eject", self.settings.clip_name, generation);
            self.state = PrintAnimationState::Finished;
            events.push(PrintEvent::Finished { generation });
            return;
        };

        let mut action = ClipAction::new(clip);
        action.reset().clamp_when_finished(true).play();

        let handle = PlaybackHandle::spawn(&self.runtime, generation, action, self.settings.tick_interval);
        apply_pose(&mut self.scene, &handle.latest_frame());
        self.playback = Some(handle);
        self.state = PrintAnimationState::Playing;
    }
}

fn apply_pose(scene: &mut SceneGraph, frame: &AnimationFrame) {
    for pose in &frame.pose {
        if let Some(node) = scene.find_node_mut(&pose.node) {
            node.translation = pose.translation;
        }
    }
}

fn decode_print(still: Option<&StillImage>, fallback: &[u8]) -> Result<DecodedPrint, TextureDecodeError> {
    if let Some(still) = still {
        match decode_flipped("photo", still.bytes()) {
            Ok(texture) => {
                return Ok(DecodedPrint {
                    texture,
                    source: PrintSource::Still,
                })
            }
            Err(e) => log::warn!("Captured still could not be decoded ({}), using fallback", e),
        }
    }

    Ok(DecodedPrint {
        texture: decode_flipped("fallback", fallback)?,
        source: PrintSource::Fallback,
    })
}

/// Decode an encoded image into engine row order. Image rows run top-down
/// while texture rows run bottom-up, so the flip is always applied.
pub fn decode_flipped(label: &str, bytes: &[u8]) -> Result<Texture, TextureDecodeError> {
    let mut pixels = image::load_from_memory(bytes)?.to_rgba8();
    if pixels.width() == 0 || pixels.height() == 0 {
        return Err(TextureDecodeError::Empty);
    }
    image::imageops::flip_vertical_in_place(&mut pixels);
    Ok(Texture::from_engine_rows(label, pixels))
}

/// Grey "no image" card used when there is no photo to print
pub fn placeholder_png() -> Result<Vec<u8>, image::ImageError> {
    let white = Rgba([255, 255, 255, 255]);
    let mut img = RgbaImage::from_pixel(512, 512, Rgba([0xcc, 0xcc, 0xcc, 255]));
    draw_hollow_rect_mut(&mut img, Rect::at(96, 96).of_size(320, 320), white);
    draw_line_segment_mut(&mut img, (96.0, 96.0), (416.0, 416.0), white);
    draw_line_segment_mut(&mut img, (416.0, 96.0), (96.0, 416.0), white);

    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(img).write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
    Ok(bytes)
}

pub fn load_fallback(config: &PrintConfig) -> anyhow::Result<Arc<[u8]>> {
    match &config.fallback_image {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read fallback image: {}", path.display()))?;
            log::info!("Fallback print loaded from {}", path.display());
            Ok(bytes.into())
        }
        None => Ok(placeholder_png().context("Failed to build placeholder print")?.into()),
    }
}
