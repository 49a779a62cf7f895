use nalgebra::Vector3;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

// ============================================================================
// CLIPS
// ============================================================================

/// Translation keyframes for one scene node
#[derive(Debug, Clone)]
pub struct KeyframeTrack {
    pub node: String,
    pub times: Vec<f32>,
    pub values: Vec<Vector3<f32>>,
}

impl KeyframeTrack {
    pub fn new(node: &str, keys: &[(f32, [f32; 3])]) -> Self {
        Self {
            node: node.to_string(),
            times: keys.iter().map(|(t, _)| *t).collect(),
            values: keys.iter().map(|(_, v)| Vector3::from(*v)).collect(),
        }
    }

    /// Linear interpolation between the surrounding keys, held at both ends
    pub fn sample(&self, time: f32) -> Vector3<f32> {
        let (Some(&first), Some(&last)) = (self.times.first(), self.times.last()) else {
            return Vector3::zeros();
        };
        if time <= first {
            return self.values[0];
        }
        if time >= last {
            return self.values[self.values.len() - 1];
        }

        let next = self.times.partition_point(|&t| t <= time);
        let (t0, t1) = (self.times[next - 1], self.times[next]);
        let alpha = if t1 > t0 { (time - t0) / (t1 - t0) } else { 1.0 };
        self.values[next - 1].lerp(&self.values[next], alpha)
    }
}

#[derive(Debug, Clone)]
pub struct AnimationClip {
    pub name: String,
    pub duration: f32,
    pub tracks: Vec<KeyframeTrack>,
}

impl AnimationClip {
    pub fn new(name: &str, tracks: Vec<KeyframeTrack>) -> Self {
        let duration = tracks
            .iter()
            .filter_map(|t| t.times.last().copied())
            .fold(0.0_f32, f32::max);
        Self {
            name: name.to_string(),
            duration,
            tracks,
        }
    }

    pub fn find_by_name<'a>(clips: &'a [Arc<AnimationClip>], name: &str) -> Option<&'a Arc<AnimationClip>> {
        clips.iter().find(|clip| clip.name == name)
    }
}

// ============================================================================
// CLIP ACTION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct NodePose {
    pub node: String,
    pub translation: Vector3<f32>,
}

/// One published step of a playback
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationFrame {
    pub time: f32,
    pub finished: bool,
    pub pose: Vec<NodePose>,
}

/// Play-once state for a single clip
#[derive(Debug, Clone)]
pub struct ClipAction {
    clip: Arc<AnimationClip>,
    time: f32,
    clamp_when_finished: bool,
    running: bool,
    finished: bool,
}

impl ClipAction {
    pub fn new(clip: Arc<AnimationClip>) -> Self {
        Self {
            clip,
            time: 0.0,
            clamp_when_finished: true,
            running: false,
            finished: false,
        }
    }

    pub fn reset(&mut self) -> &mut Self {
        self.time = 0.0;
        self.running = false;
        self.finished = false;
        self
    }

    /// Hold the last frame when done instead of snapping back to the start
    pub fn clamp_when_finished(&mut self, clamp: bool) -> &mut Self {
        self.clamp_when_finished = clamp;
        self
    }

    pub fn play(&mut self) -> &mut Self {
        self.running = true;
        self
    }

    /// Advance by `delta` seconds. Returns true once the clip has ended.
    pub fn update(&mut self, delta: f32) -> bool {
        if self.running && !self.finished {
            self.time += delta.max(0.0);
            if self.time >= self.clip.duration {
                self.time = self.clip.duration;
                self.finished = true;
                self.running = false;
            }
        }
        self.finished
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn frame(&self) -> AnimationFrame {
        let sample_time = if self.finished && !self.clamp_when_finished {
            0.0
        } else {
            self.time
        };

        AnimationFrame {
            time: self.time,
            finished: self.finished,
            pose: self
                .clip
                .tracks
                .iter()
                .map(|track| NodePose {
                    node: track.node.clone(),
                    translation: track.sample(sample_time),
                })
                .collect(),
        }
    }
}

// ============================================================================
// PLAYBACK TASK
// ============================================================================

/// A running playback. Dropping the handle aborts its tick task, so an
/// orphaned playback can never keep ticking or publishing poses.
pub struct PlaybackHandle {
    id: u64,
    clip_name: String,
    task: JoinHandle<()>,
    frames: watch::Receiver<AnimationFrame>,
    final_taken: bool,
}

impl PlaybackHandle {
    pub fn spawn(runtime: &Handle, id: u64, action: ClipAction, tick: Duration) -> Self {
        let clip_name = action.clip.name.clone();
        let (sender, frames) = watch::channel(action.frame());
        let task = runtime.spawn(drive(id, action, sender, tick));
        log::debug!("Playback #{} started for clip '{}'", id, clip_name);

        Self {
            id,
            clip_name,
            task,
            frames,
            final_taken: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// New frame published since the last call, if any.
    ///
    /// The tick task drops its sender right after publishing the final
    /// frame, so a closed channel still yields that last value once.
    pub fn take_frame(&mut self) -> Option<AnimationFrame> {
        let fresh = match self.frames.has_changed() {
            Ok(changed) => changed,
            Err(_) => !self.final_taken,
        };
        if !fresh {
            return None;
        }

        let frame = self.frames.borrow_and_update().clone();
        if frame.finished || self.task.is_finished() {
            self.final_taken = true;
        }
        Some(frame)
    }

    pub fn latest_frame(&self) -> AnimationFrame {
        self.frames.borrow().clone()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<AnimationFrame> {
        self.frames.clone()
    }

    #[cfg(test)]
    pub fn is_ticking(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            log::debug!("Playback #{} of '{}' abandoned", self.id, self.clip_name);
        }
        self.task.abort();
    }
}

async fn drive(id: u64, mut action: ClipAction, sender: watch::Sender<AnimationFrame>, tick: Duration) {
    let mut interval = time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();

    loop {
        interval.tick().await;
        let now = Instant::now();
        let finished = action.update(now.duration_since(last).as_secs_f32());
        last = now;

        if sender.send(action.frame()).is_err() {
            log::debug!("Playback #{} has no observers left, stopping", id);
            return;
        }
        if finished {
            log::debug!("Playback #{} reached its final frame at {:.2}s", id, action.time());
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eject_clip() -> Arc<AnimationClip> {
        Arc::new(AnimationClip::new(
            "PlaneAction",
            vec![KeyframeTrack::new(
                "Plane",
                &[(0.0, [0.0, 0.0, 0.0]), (0.5, [0.0, -0.5, 0.0]), (1.0, [0.0, -1.0, 0.2])],
            )],
        ))
    }

    #[test]
    fn test_track_sampling() {
        let clip = eject_clip();
        let track = &clip.tracks[0];
        assert_eq!(clip.duration, 1.0);

        assert_eq!(track.sample(-1.0), Vector3::new(0.0, 0.0, 0.0));
        assert!((track.sample(0.25).y + 0.25).abs() < 1e-6);
        assert!((track.sample(0.75).z - 0.1).abs() < 1e-6);
        assert_eq!(track.sample(5.0), Vector3::new(0.0, -1.0, 0.2));
    }

    #[test]
    fn test_action_clamps_at_end() {
        let mut action = ClipAction::new(eject_clip());
        action.reset().clamp_when_finished(true).play();

        assert!(!action.update(0.4));
        assert!(!action.update(0.4));
        assert!(action.update(0.4));
        assert_eq!(action.time(), 1.0);

        // Further updates stay on the last frame
        assert!(action.update(3.0));
        let frame = action.frame();
        assert!(frame.finished);
        assert_eq!(frame.pose[0].translation, Vector3::new(0.0, -1.0, 0.2));
    }

    #[test]
    fn test_action_without_clamp_returns_to_start() {
        let mut action = ClipAction::new(eject_clip());
        action.reset().clamp_when_finished(false).play();
        action.update(2.0);
        assert_eq!(action.frame().pose[0].translation, Vector3::zeros());
    }

    #[test]
    fn test_action_idle_until_played() {
        let mut action = ClipAction::new(eject_clip());
        assert!(!action.update(5.0));
        assert_eq!(action.time(), 0.0);
    }

    #[test]
    fn test_find_clip_by_name() {
        let clips = vec![eject_clip()];
        assert!(AnimationClip::find_by_name(&clips, "PlaneAction").is_some());
        assert!(AnimationClip::find_by_name(&clips, "Wave").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_runs_to_completion() {
        let mut action = ClipAction::new(eject_clip());
        action.reset().play();
        let mut handle = PlaybackHandle::spawn(&Handle::current(), 1, action, Duration::from_millis(16));

        time::sleep(Duration::from_millis(1200)).await;
        let frame = handle.take_frame().unwrap();
        assert!(frame.finished);
        assert_eq!(frame.time, 1.0);
        assert!(!handle.is_ticking());
        assert!(handle.take_frame().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_host_sees_final_frame_once() {
        let clip = Arc::new(AnimationClip::new(
            "Short",
            vec![KeyframeTrack::new("Plane", &[(0.0, [0.0, 0.0, 0.0]), (0.1, [0.0, -1.0, 0.0])])],
        ));
        let mut action = ClipAction::new(clip);
        action.reset().clamp_when_finished(true).play();
        let mut handle = PlaybackHandle::spawn(&Handle::current(), 3, action, Duration::from_millis(16));

        let mut finished_frames = 0;
        let mut last = None;
        for _ in 0..100 {
            time::sleep(Duration::from_millis(16)).await;
            if let Some(frame) = handle.take_frame() {
                if frame.finished {
                    finished_frames += 1;
                }
                last = Some(frame);
            }
        }

        assert!(!handle.is_ticking());
        assert_eq!(finished_frames, 1);
        let last = last.unwrap();
        assert!(last.finished);
        assert_eq!(last.pose[0].translation, Vector3::new(0.0, -1.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_playback_stops_ticking() {
        let mut action = ClipAction::new(eject_clip());
        action.reset().play();
        let handle = PlaybackHandle::spawn(&Handle::current(), 7, action, Duration::from_millis(16));
        let mut observer = handle.subscribe();

        time::sleep(Duration::from_millis(100)).await;
        assert!(!observer.borrow_and_update().finished);

        drop(handle);
        // Sender goes away with the aborted task
        assert!(observer.changed().await.is_err());
        assert!(!observer.borrow().finished);
    }
}
