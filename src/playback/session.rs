//! One playing animation instance and its per-tick frame scheduling.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::PlayerError;
use super::clock::TimeSample;
use crate::animation::{AnimationFile, AnimationPlayer};
use crate::decode::FrameDecoder;
use crate::gpu::SharedTexture;
use crate::schema::PlayerConfig;
use crate::stream::{
    BufferPool, FrameBuffer, FrameReceiver, FrameStreamer, Received, StreamControl, frame_queue,
};

/// Poll interval of a blocking export-mode receive.
const EXPORT_WAIT: Duration = Duration::from_millis(100);

/// Identifies a session within a [`super::SessionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the first frame.
    Starting,
    Playing,
    /// A seek was requested; the last frame is shown until the decoder catches up.
    Seeking,
    Finished,
}

/// Why a session finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Stopped by the caller.
    Stopped,
    /// The external clock went back past the start time.
    Rewind,
    /// Playback time ran past the animation's duration.
    Timeout,
    /// The decoder delivered end of stream.
    EndOfStream,
    /// The decoder thread went away.
    Disconnected,
}

/// World-space bounds of a placed animation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldBounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

/// A playing animation: decoder thread, frame queue and scheduling state.
pub struct PlaybackSession {
    id: SessionId,
    path: PathBuf,
    file: Arc<AnimationFile>,
    origin: [f64; 3],
    receiver: FrameReceiver,
    control: Arc<StreamControl>,
    worker: Option<JoinHandle<()>>,
    pool: Arc<BufferPool>,
    texture: Option<SharedTexture>,
    start_time: f64,
    /// Frames consumed so far.
    rendered: u32,
    state: SessionState,
    stop_reason: Option<StopReason>,
    last_frame: Option<FrameBuffer>,
    /// Seek generation of the last request; queued buffers from older
    /// generations are stale.
    generation: u64,
    /// End of stream seen behind a frame that was shown first.
    deferred_end: Option<FrameBuffer>,
    interpolation: f32,
    resync_threshold: u32,
    max_catch_up: u32,
}

impl PlaybackSession {
    /// Open `path` and start its decoder thread. Playback time starts at
    /// `start_time` on the session's time source.
    pub fn start(
        id: SessionId,
        path: &Path,
        origin: [f64; 3],
        texture: SharedTexture,
        pool: Arc<BufferPool>,
        config: &PlayerConfig,
        start_time: f64,
    ) -> Result<Self, PlayerError> {
        let file = Arc::new(AnimationFile::open(path)?);
        let decoder = FrameDecoder::new(config.initial_particle_capacity, config.parallel_threshold)
            .with_texture(texture.clone());
        let player = AnimationPlayer::with_decoder(path, Arc::clone(&file), decoder, config)?;

        let (sender, receiver) = frame_queue(config.queue_capacity);
        let control = Arc::new(StreamControl::new());
        let worker = FrameStreamer::new(player, sender, Arc::clone(&pool), Arc::clone(&control))
            .spawn(&id.to_string())
            .map_err(PlayerError::Spawn)?;

        log::info!(
            "Session {id} started: {} ({} frames @ {} fps)",
            path.display(),
            file.total_frames(),
            file.fps()
        );

        Ok(Self {
            id,
            path: path.to_path_buf(),
            file,
            origin,
            receiver,
            control,
            worker: Some(worker),
            pool,
            texture: Some(texture),
            start_time,
            rendered: 0,
            state: SessionState::Starting,
            stop_reason: None,
            last_frame: None,
            generation: 0,
            deferred_end: None,
            interpolation: 0.0,
            resync_threshold: config.resync_threshold,
            max_catch_up: config.max_catch_up_frames.max(1),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &AnimationFile {
        &self.file
    }

    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn is_finished(&self) -> bool {
        self.state == SessionState::Finished
    }

    /// Frames consumed from the queue so far.
    pub fn rendered_frames(&self) -> u32 {
        self.rendered
    }

    /// Sub-frame position between the previous and current frame, in `[0, 1]`.
    pub fn interpolation(&self) -> f32 {
        self.interpolation
    }

    pub fn texture(&self) -> Option<&SharedTexture> {
        self.texture.as_ref()
    }

    /// Frame currently on display.
    pub fn current_frame(&self) -> Option<&FrameBuffer> {
        self.last_frame.as_ref()
    }

    pub fn world_bounds(&self) -> WorldBounds {
        let bbox = self.file.bbox();
        let mut min = self.origin;
        let mut max = self.origin;
        for axis in 0..3 {
            min[axis] += f64::from(bbox.min[axis]);
            max[axis] += f64::from(bbox.max[axis]);
        }
        WorldBounds { min, max }
    }

    /// Advance the schedule to `sample` and return the frame to display.
    ///
    /// Returns `None` once the session has finished.
    pub fn poll(&mut self, sample: &TimeSample) -> Option<&FrameBuffer> {
        if self.is_finished() {
            return None;
        }

        let elapsed = sample.now - self.start_time;
        if sample.external && elapsed < 0.0 {
            self.stop(StopReason::Rewind);
            return None;
        }
        if elapsed > self.file.duration() {
            self.stop(StopReason::Timeout);
            return None;
        }

        let fps = f64::from(self.file.fps());
        let total = self.file.total_frames();
        let expected = ((elapsed * fps).ceil().max(0.0) as u64).min(u64::from(total)) as u32;

        if self.rendered.abs_diff(expected) > self.resync_threshold {
            log::debug!(
                "Session {} drifted ({} rendered, {expected} expected), seeking",
                self.id,
                self.rendered
            );
            self.request_seek(expected);
            return self.last_frame.as_ref();
        }

        let incoming = if sample.exporting {
            self.take_blocking(expected)
        } else {
            self.take_available(expected, total)
        };

        match incoming {
            Some(frame) if frame.is_end_of_stream() => {
                self.pool.release(frame);
                self.stop(StopReason::EndOfStream);
                return None;
            }
            Some(frame) => {
                if let Some(old) = self.last_frame.replace(frame) {
                    self.pool.release(old);
                }
                self.rendered += 1;
                self.state = SessionState::Playing;
            }
            None if self.is_finished() => return None,
            None => {}
        }

        self.interpolation = (elapsed * fps - (f64::from(self.rendered) - 1.0)).clamp(0.0, 1.0) as f32;
        self.last_frame.as_ref()
    }

    /// Export mode: wait for the next frame if one is due.
    fn take_blocking(&mut self, expected: u32) -> Option<FrameBuffer> {
        if self.rendered >= expected {
            return None;
        }
        match self.receive(true) {
            Received::Frame(frame) => Some(frame),
            Received::Empty | Received::Disconnected => {
                self.stop(StopReason::Disconnected);
                None
            }
        }
    }

    /// Interactive mode: take up to the catch-up budget without blocking,
    /// releasing every superseded frame.
    fn take_available(&mut self, expected: u32, total: u32) -> Option<FrameBuffer> {
        let mut budget = expected.saturating_sub(self.rendered).min(self.max_catch_up);
        if expected >= total {
            // Keep draining so the end-of-stream marker is seen
            budget = budget.max(1);
        }

        let mut newest: Option<FrameBuffer> = None;
        for _ in 0..budget {
            match self.receive(false) {
                Received::Frame(frame) if frame.is_end_of_stream() => {
                    if newest.is_none() {
                        return Some(frame);
                    }
                    // Show the final frame first; finish on the next poll
                    self.deferred_end = Some(frame);
                    break;
                }
                Received::Frame(frame) => {
                    if let Some(skipped) = newest.replace(frame) {
                        self.pool.release(skipped);
                        self.rendered += 1;
                    }
                }
                Received::Empty => break,
                Received::Disconnected => {
                    if newest.is_none() {
                        self.stop(StopReason::Disconnected);
                    }
                    break;
                }
            }
        }
        newest
    }

    /// Next frame from the queue. Buffers queued before the last seek
    /// (including a stale end-of-stream marker) are released.
    fn receive(&mut self, blocking: bool) -> Received {
        if let Some(end) = self.deferred_end.take() {
            return Received::Frame(end);
        }
        loop {
            let received = if blocking {
                self.receiver.recv_timeout(EXPORT_WAIT)
            } else {
                self.receiver.try_recv()
            };
            match received {
                Received::Frame(frame) if frame.generation() < self.generation => {
                    self.pool.release(frame);
                }
                Received::Empty if blocking && self.control.is_running() => {}
                other => return other,
            }
        }
    }

    fn request_seek(&mut self, frame: u32) {
        let target = frame.min(self.file.total_frames().saturating_sub(1));
        self.generation = self.control.request_seek(target);
        if let Some(end) = self.deferred_end.take() {
            self.pool.release(end);
        }
        self.rendered = frame;
        self.state = SessionState::Seeking;
    }

    /// Move playback to `frame`, re-anchoring the start time so the
    /// schedule continues from there.
    pub fn seek(&mut self, frame: u32, sample: &TimeSample) {
        if self.is_finished() {
            return;
        }
        let frame = frame.min(self.file.total_frames().saturating_sub(1));
        self.start_time = sample.now - f64::from(frame) / f64::from(self.file.fps());
        self.request_seek(frame);
    }

    /// Finish the session and signal its decoder thread. Does not wait.
    pub fn stop(&mut self, reason: StopReason) {
        if self.is_finished() {
            return;
        }
        self.state = SessionState::Finished;
        self.stop_reason = Some(reason);
        self.control.stop();
        if let Some(frame) = self.last_frame.take() {
            self.pool.release(frame);
        }
        if let Some(end) = self.deferred_end.take() {
            self.pool.release(end);
        }
        self.texture = None;
        log::info!("Session {} stopped: {reason:?}", self.id);
    }

    /// True when finished and the decoder thread has exited.
    pub fn is_reapable(&self) -> bool {
        self.is_finished() && self.worker.as_ref().is_none_or(|w| w.is_finished())
    }

    /// Wait for the decoder thread to exit.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Decoder thread of session {} panicked", self.id);
            }
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.stop(StopReason::Stopped);
        self.join();
    }
}
