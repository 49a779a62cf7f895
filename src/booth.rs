use chrono::Local;
use crossbeam::channel::Sender;

use crate::camera::{Facing, VideoFrame};
use crate::camera_controller::{CameraCaptureController, CameraEvent, Lifecycle};
use crate::compositor::{PhotoCompositor, StillImage};
use crate::errors::CaptureError;
use crate::print_animator::{PrintAnimationState, PrintAnimator, PrintEvent};
use crate::scene::SceneGraph;
use crate::shutter::ShutterEvent;

/// The command surface the UI drives: start, take a still, flip.
///
/// Owns the whole capture-to-print pipeline. Commands return immediately;
/// `poll()` once per frame moves everything along.
pub struct PhotoBooth {
    camera: CameraCaptureController,
    compositor: PhotoCompositor,
    animator: PrintAnimator,
    shutter: Option<Sender<ShutterEvent>>,
    camera_visible: bool,
    captured: Option<StillImage>,
    last_error: Option<String>,
}

impl PhotoBooth {
    pub fn new(
        camera: CameraCaptureController,
        compositor: PhotoCompositor,
        animator: PrintAnimator,
        shutter: Option<Sender<ShutterEvent>>,
    ) -> Self {
        Self {
            camera,
            compositor,
            animator,
            shutter,
            camera_visible: false,
            captured: None,
            last_error: None,
        }
    }

    pub fn start_capture(&mut self) {
        self.last_error = None;
        self.camera_visible = true;
        let facing = self.camera.facing();
        self.camera.start(facing);
    }

    /// Composite the current frame, release the camera and print the still
    pub fn take_still(&mut self) -> Result<(), CaptureError> {
        let still = match self
            .camera
            .current_frame()
            .and_then(|frame| self.compositor.capture(frame))
        {
            Ok(still) => still,
            Err(e) => {
                log::error!("Capture failed: {}", e);
                self.last_error = Some(format!("Capture failed: {}", e));
                return Err(e);
            }
        };

        // The live feed is no longer needed once the pixels are read
        self.camera.stop();
        self.camera_visible = false;

        if let Some(shutter) = &self.shutter {
            let event = ShutterEvent {
                side: still.width(),
                at: Local::now(),
            };
            if shutter.send(event).is_err() {
                log::warn!("Shutter player is gone; capturing silently");
            }
        }

        log::info!("Still captured: {}x{} {:?}", still.width(), still.height(), still.format());
        self.captured = Some(still.clone());
        self.animator.play(Some(still));
        Ok(())
    }

    /// Returns false when ignored because the camera is still switching
    pub fn flip_camera(&mut self) -> bool {
        self.camera.flip()
    }

    pub fn poll(&mut self) {
        for event in self.camera.poll() {
            match event {
                CameraEvent::Ready { facing, generation } => {
                    log::debug!("Camera ready ({}, acquisition #{})", facing, generation);
                }
                CameraEvent::Failed(e) => {
                    self.camera_visible = false;
                    self.last_error = Some(format!("Camera unavailable: {}", e));
                }
            }
        }

        match self.animator.poll() {
            Ok(events) => {
                for event in events {
                    match event {
                        PrintEvent::Bound { generation, source } => {
                            log::debug!("Print #{} showing {:?} image", generation, source);
                        }
                        PrintEvent::Finished { generation } => {
                            log::debug!("Print #{} finished", generation);
                        }
                    }
                }
            }
            Err(e) => self.last_error = Some(format!("Print failed: {}", e)),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.camera.is_loading()
    }

    pub fn camera_visible(&self) -> bool {
        self.camera_visible
    }

    pub fn camera_live(&self) -> bool {
        self.camera.lifecycle() == Lifecycle::Live
    }

    pub fn facing(&self) -> Facing {
        self.camera.facing()
    }

    pub fn preview_frame(&self) -> Option<&VideoFrame> {
        self.camera.preview_frame()
    }

    pub fn captured_image(&self) -> Option<&StillImage> {
        self.captured.as_ref()
    }

    pub fn print_state(&self) -> PrintAnimationState {
        self.animator.state()
    }

    pub fn animator(&self) -> &PrintAnimator {
        &self.animator
    }

    pub fn scene(&self) -> &SceneGraph {
        self.animator.scene()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Whether the host should keep repainting every frame
    pub fn needs_animation_frames(&self) -> bool {
        self.camera_visible || self.camera.is_loading() || self.animator.is_animating()
    }
}
