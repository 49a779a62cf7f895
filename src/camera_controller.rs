use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::time::{sleep, Duration};

use crate::camera::{CameraBackend, CameraStream, Facing, VideoFrame};
use crate::errors::{AcquisitionError, CaptureError};

type Acquisition = Result<Box<dyn CameraStream>, AcquisitionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Acquiring,
    Live,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CameraEvent {
    /// First decodable frame arrived; loading is over
    Ready { facing: Facing, generation: u64 },
    /// Acquisition failed; loading is over
    Failed(AcquisitionError),
}

/// The one open stream, owned exclusively by the controller
pub struct CameraSession {
    stream: Box<dyn CameraStream>,
    facing: Facing,
    generation: u64,
    opened_at: Instant,
}

struct PendingAcquisition {
    generation: u64,
    facing: Facing,
    receiver: oneshot::Receiver<Acquisition>,
}

/// Owns the camera stream and its lifecycle.
///
/// Hardware negotiation runs as a task on the runtime; everything else
/// happens on the caller's thread inside `poll()`. Superseding an
/// acquisition drops its receiver, so a late stream is stopped by the task
/// (or by its own `Drop`) instead of replacing the current session.
pub struct CameraCaptureController {
    backend: Arc<dyn CameraBackend>,
    runtime: Handle,
    facing: Facing,
    lifecycle: Lifecycle,
    session: Option<CameraSession>,
    pending: Option<PendingAcquisition>,
    latest: Option<VideoFrame>,
    generation: u64,
    busy: bool,
    flip_settle: Duration,
}

impl CameraCaptureController {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        initial_facing: Facing,
        flip_settle: Duration,
        runtime: Handle,
    ) -> Self {
        log::info!(
            "Camera controller using {} backend, {} camera by default",
            backend.name(),
            initial_facing
        );

        Self {
            backend,
            runtime,
            facing: initial_facing,
            lifecycle: Lifecycle::Idle,
            session: None,
            pending: None,
            latest: None,
            generation: 0,
            busy: false,
            flip_settle,
        }
    }

    /// Request the camera with the given facing, releasing any current one first
    pub fn start(&mut self, facing: Facing) {
        self.begin(facing, Duration::ZERO);
    }

    /// Release all hardware and abandon any acquisition in flight
    pub fn stop(&mut self) {
        self.release();
        if self.lifecycle != Lifecycle::Idle {
            self.lifecycle = Lifecycle::Stopped;
        }
        self.busy = false;
    }

    /// Switch to the opposite camera. Returns false when the request was
    /// ignored because an acquisition is still in flight.
    pub fn flip(&mut self) -> bool {
        if self.busy || self.lifecycle == Lifecycle::Acquiring {
            log::debug!("Flip ignored: camera busy (acquisition #{})", self.generation);
            return false;
        }

        self.busy = true;
        let next = self.facing.opposite();
        log::info!("Flipping camera {} -> {}", self.facing, next);
        self.begin(next, self.flip_settle);
        true
    }

    /// Drive pending acquisitions forward. Call once per host frame.
    pub fn poll(&mut self) -> Vec<CameraEvent> {
        let mut events = Vec::new();

        if let Some(mut pending) = self.pending.take() {
            match pending.receiver.try_recv() {
                Err(TryRecvError::Empty) => self.pending = Some(pending),
                Ok(Ok(stream)) => {
                    log::debug!(
                        "{} camera opened (acquisition #{}), waiting for first frame",
                        pending.facing,
                        pending.generation
                    );
                    self.session = Some(CameraSession {
                        stream,
                        facing: pending.facing,
                        generation: pending.generation,
                        opened_at: Instant::now(),
                    });
                }
                Ok(Err(e)) => self.fail(e, &mut events),
                Err(TryRecvError::Closed) => self.fail(AcquisitionError::Interrupted, &mut events),
            }
        }

        if let Some(session) = self.session.as_mut() {
            let frame = session.stream.latest_frame().filter(VideoFrame::is_decodable);
            if let Some(frame) = frame {
                self.latest = Some(frame);
                if self.lifecycle == Lifecycle::Acquiring {
                    self.lifecycle = Lifecycle::Live;
                    self.busy = false;
                    log::info!(
                        "{} camera live after {:.2}s",
                        session.facing,
                        session.opened_at.elapsed().as_secs_f32()
                    );
                    events.push(CameraEvent::Ready {
                        facing: session.facing,
                        generation: session.generation,
                    });
                }
            }
        }

        events
    }

    /// The frame a still would be taken from. Only valid while live.
    pub fn current_frame(&self) -> Result<&VideoFrame, CaptureError> {
        if self.lifecycle != Lifecycle::Live {
            return Err(CaptureError::NotLive(self.lifecycle));
        }
        self.latest
            .as_ref()
            .ok_or(CaptureError::EmptyFrame { width: 0, height: 0 })
    }

    pub fn preview_frame(&self) -> Option<&VideoFrame> {
        match self.lifecycle {
            Lifecycle::Live => self.latest.as_ref(),
            _ => None,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Facing of the current or most recently requested camera
    pub fn facing(&self) -> Facing {
        self.facing
    }

    pub fn is_loading(&self) -> bool {
        self.lifecycle == Lifecycle::Acquiring
    }

    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn begin(&mut self, facing: Facing, delay: Duration) {
        self.release();

        self.generation += 1;
        self.facing = facing;
        self.lifecycle = Lifecycle::Acquiring;

        let generation = self.generation;
        let backend = Arc::clone(&self.backend);
        let (sender, receiver) = oneshot::channel::<Acquisition>();

        self.runtime.spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            if sender.is_closed() {
                log::debug!("Acquisition #{} abandoned before opening", generation);
                return;
            }

            let opened = backend.open(facing).await;
            if let Err(Ok(mut stale)) = sender.send(opened) {
                stale.stop();
                log::debug!("Discarded stale {} stream from acquisition #{}", facing, generation);
            }
        });

        log::info!("Requesting {} camera (acquisition #{})", facing, generation);
        self.pending = Some(PendingAcquisition { generation, facing, receiver });
    }

    fn release(&mut self) {
        if let Some(pending) = self.pending.take() {
            log::debug!("Abandoning acquisition #{}", pending.generation);
        }
        if let Some(mut session) = self.session.take() {
            if session.stream.is_open() {
                session.stream.stop();
            }
            log::info!(
                "Released {} camera (session #{}, open {:.1}s)",
                session.stream.facing(),
                session.generation,
                session.opened_at.elapsed().as_secs_f32()
            );
        }
        self.latest = None;
    }

    fn fail(&mut self, error: AcquisitionError, events: &mut Vec<CameraEvent>) {
        log::error!("Camera acquisition #{} failed: {}", self.generation, error);
        self.lifecycle = Lifecycle::Stopped;
        self.busy = false;
        events.push(CameraEvent::Failed(error));
    }
}

impl Drop for CameraCaptureController {
    fn drop(&mut self) {
        self.release();
        log::info!("Camera controller dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::TestPatternBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn controller_with(backend: TestPatternBackend) -> (CameraCaptureController, Arc<AtomicUsize>) {
        let handles = backend.open_handles();
        let controller = CameraCaptureController::new(
            Arc::new(backend),
            Facing::Front,
            Duration::from_millis(300),
            Handle::current(),
        );
        (controller, handles)
    }

    async fn settle(controller: &mut CameraCaptureController) -> Vec<CameraEvent> {
        let mut events = Vec::new();
        for _ in 0..200 {
            events.extend(controller.poll());
            if controller.lifecycle() != Lifecycle::Acquiring {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        events
    }

    fn ready_count(events: &[CameraEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, CameraEvent::Ready { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_goes_live_once() {
        let backend = TestPatternBackend::new(640, 480).with_latency(Duration::from_millis(50));
        let (mut controller, handles) = controller_with(backend);
        assert_eq!(controller.lifecycle(), Lifecycle::Idle);

        controller.start(Facing::Front);
        assert!(controller.is_loading());

        let events = settle(&mut controller).await;
        assert_eq!(ready_count(&events), 1);
        assert_eq!(controller.lifecycle(), Lifecycle::Live);
        assert_eq!(handles.load(Ordering::SeqCst), 1);

        // Staying live never re-signals readiness
        for _ in 0..5 {
            assert!(controller.poll().is_empty());
        }
        let frame = controller.current_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (640, 480));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_acquiring_until_frame_decodes() {
        let backend = TestPatternBackend::new(32, 32).with_warmup_frames(3);
        let (mut controller, handles) = controller_with(backend);

        controller.start(Facing::Back);
        sleep(Duration::from_millis(5)).await;

        // Stream open, frames not yet decodable
        assert!(controller.poll().is_empty());
        assert_eq!(handles.load(Ordering::SeqCst), 1);
        assert!(controller.is_loading());
        assert!(matches!(controller.current_frame(), Err(CaptureError::NotLive(Lifecycle::Acquiring))));

        let events = settle(&mut controller).await;
        assert_eq!(ready_count(&events), 1);
        assert!(controller.preview_frame().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_camera_surfaces_error() {
        let backend = TestPatternBackend::new(32, 32).denying("permission prompt dismissed");
        let (mut controller, handles) = controller_with(backend);

        controller.start(Facing::Front);
        let events = settle(&mut controller).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            CameraEvent::Failed(AcquisitionError::PermissionDenied(_))
        ));
        assert_eq!(controller.lifecycle(), Lifecycle::Stopped);
        assert!(!controller.is_busy());
        assert_eq!(handles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentrant_flip_leaves_one_session() {
        let backend = TestPatternBackend::new(64, 64).with_latency(Duration::from_millis(40));
        let (mut controller, handles) = controller_with(backend);

        controller.start(Facing::Front);
        settle(&mut controller).await;
        assert_eq!(controller.lifecycle(), Lifecycle::Live);

        assert!(controller.flip());
        assert!(!controller.flip());
        assert!(!controller.flip());
        assert!(controller.is_busy());

        // The old stream is released before the new one is requested
        assert_eq!(handles.load(Ordering::SeqCst), 0);

        let events = settle(&mut controller).await;
        assert_eq!(ready_count(&events), 1);
        assert_eq!(controller.lifecycle(), Lifecycle::Live);
        assert_eq!(controller.facing(), Facing::Back);
        assert!(!controller.is_busy());
        assert_eq!(handles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flip_waits_for_settle_delay() {
        let backend = TestPatternBackend::new(16, 16);
        let (mut controller, handles) = controller_with(backend);

        controller.start(Facing::Front);
        settle(&mut controller).await;

        controller.flip();
        sleep(Duration::from_millis(200)).await;
        assert!(controller.poll().is_empty());
        assert_eq!(handles.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(150)).await;
        let events = settle(&mut controller).await;
        assert_eq!(
            events,
            vec![CameraEvent::Ready { facing: Facing::Back, generation: 2 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_discards_stale_acquisition() {
        let backend = TestPatternBackend::new(16, 16).with_latency(Duration::from_millis(30));
        let (mut controller, handles) = controller_with(backend);

        controller.start(Facing::Front);
        controller.start(Facing::Back);

        let events = settle(&mut controller).await;
        assert_eq!(
            events,
            vec![CameraEvent::Ready { facing: Facing::Back, generation: 2 }]
        );

        // Give the abandoned task time to finish and release its stream
        sleep(Duration::from_millis(100)).await;
        controller.poll();
        assert_eq!(handles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_acquisition() {
        let backend = TestPatternBackend::new(16, 16).with_latency(Duration::from_millis(30));
        let (mut controller, handles) = controller_with(backend);

        controller.start(Facing::Front);
        controller.stop();
        assert_eq!(controller.lifecycle(), Lifecycle::Stopped);

        sleep(Duration::from_millis(100)).await;
        assert!(controller.poll().is_empty());
        assert_eq!(controller.lifecycle(), Lifecycle::Stopped);
        assert_eq!(handles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_live_stream() {
        let backend = TestPatternBackend::new(16, 16);
        let (mut controller, handles) = controller_with(backend);

        controller.start(Facing::Front);
        settle(&mut controller).await;
        assert_eq!(handles.load(Ordering::SeqCst), 1);

        controller.stop();
        assert_eq!(handles.load(Ordering::SeqCst), 0);
        assert!(controller.preview_frame().is_none());
        assert!(matches!(controller.current_frame(), Err(CaptureError::NotLive(Lifecycle::Stopped))));
    }
}
