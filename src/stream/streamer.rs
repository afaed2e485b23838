//! Decoder thread: one per playing session.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::pool::{BufferPool, FrameBuffer};
use super::queue::FrameSender;
use crate::animation::{AnimationPlayer, FrameStep};
use crate::decode::SeekPlan;
use crate::playback::PlayerError;

/// Upper bound on one idle wait before re-checking the running flag.
const IDLE_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct SeekState {
    pending: Option<u32>,
    /// Bumped by every request; stamped on each queued buffer.
    generation: u64,
}

/// State shared between a decoder thread and its session.
#[derive(Debug)]
pub struct StreamControl {
    running: AtomicBool,
    finished: AtomicBool,
    seek: Mutex<SeekState>,
    wake: Condvar,
}

impl StreamControl {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            finished: AtomicBool::new(false),
            seek: Mutex::new(SeekState::default()),
            wake: Condvar::new(),
        }
    }

    /// Ask the decoder to reposition. A newer request replaces a pending one.
    ///
    /// Returns the generation the decoder stamps on frames (and the end of
    /// stream marker) produced after it applies this request.
    pub fn request_seek(&self, frame: u32) -> u64 {
        let mut seek = self.seek.lock();
        seek.generation += 1;
        seek.pending = Some(frame);
        self.wake.notify_one();
        seek.generation
    }

    /// Signal the decoder thread to exit at its next check.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        // Take the lock so a thread between its check and its wait sees the flag
        let _guard = self.seek.lock();
        self.wake.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True once end of stream was signalled and no seek has restarted decoding.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn has_pending_seek(&self) -> bool {
        self.seek.lock().pending.is_some()
    }

    /// Pending target and its generation.
    fn take_seek(&self) -> Option<(u32, u64)> {
        let mut seek = self.seek.lock();
        let generation = seek.generation;
        seek.pending.take().map(|frame| (frame, generation))
    }

    fn set_finished(&self, finished: bool) {
        self.finished.store(finished, Ordering::Release);
    }

    /// Block until a seek is pending or the stream is stopped.
    fn wait_for_work(&self) {
        let mut seek = self.seek.lock();
        while self.is_running() && seek.pending.is_none() {
            self.wake.wait_for(&mut seek, IDLE_WAIT);
        }
    }
}

impl Default for StreamControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives an [`AnimationPlayer`] and feeds decoded frames into a queue.
///
/// Queued frames are flushed back to the pool when the streamer is dropped,
/// whichever way its loop exits.
pub struct FrameStreamer {
    player: AnimationPlayer,
    sender: FrameSender,
    pool: Arc<BufferPool>,
    control: Arc<StreamControl>,
    /// Generation of the last applied seek.
    generation: u64,
}

impl FrameStreamer {
    pub fn new(
        player: AnimationPlayer,
        sender: FrameSender,
        pool: Arc<BufferPool>,
        control: Arc<StreamControl>,
    ) -> Self {
        Self {
            player,
            sender,
            pool,
            control,
            generation: 0,
        }
    }

    /// Run on a dedicated, named thread.
    pub fn spawn(self, name: &str) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(format!("nbl-stream-{name}"))
            .spawn(move || self.run())
    }

    /// Decode until stopped.
    pub fn run(mut self) {
        if let Err(err) = self.run_loop() {
            log::error!("Animation streamer crashed: {err}");
        }
        self.control.stop();
    }

    fn run_loop(&mut self) -> Result<(), PlayerError> {
        while self.control.is_running() {
            if let Some((frame, generation)) = self.control.take_seek() {
                self.apply_seek(frame, generation);
            }

            if self.player.is_at_end() {
                self.finish_stream();
                continue;
            }

            match self.player.advance(Some(&self.pool))? {
                FrameStep::Emitted(buffer) => self.push(buffer),
                FrameStep::Skipped(_) | FrameStep::Dropped(_) | FrameStep::End => {}
            }
        }
        Ok(())
    }

    fn apply_seek(&mut self, frame: u32, generation: u64) {
        if let SeekPlan::HardReset { .. } = self.player.seek(frame) {
            let flushed = self.sender.flush(&self.pool);
            log::debug!("Hard reset flushed {flushed} queued frames");
        }
        self.generation = generation;
        self.control.set_finished(false);
    }

    /// Signal end of stream once, then idle until a seek or stop arrives.
    fn finish_stream(&mut self) {
        if !self.control.is_finished() {
            self.push(FrameBuffer::end_of_stream());
            self.control.set_finished(true);
            log::debug!("End of stream reached");
        }
        self.control.wait_for_work();
    }

    /// Queue a buffer, giving up if the session stops or a seek arrives.
    fn push(&self, mut buffer: FrameBuffer) {
        buffer.set_generation(self.generation);
        let control = &self.control;
        let sent = self
            .sender
            .send(buffer, || !control.is_running() || control.has_pending_seek());
        if let Err(buffer) = sent {
            self.pool.release(buffer);
        }
    }
}

impl Drop for FrameStreamer {
    fn drop(&mut self) {
        let flushed = self.sender.flush(&self.pool);
        if flushed > 0 {
            log::debug!("Streamer released {flushed} unconsumed frames");
        }
    }
}
