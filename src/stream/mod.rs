//! Producer side of playback: buffer pool, frame queue and decoder thread.

mod pool;
mod queue;
mod streamer;

pub use pool::{BufferPool, FrameBuffer, PoolError};
pub use queue::{FrameReceiver, FrameSender, Received, frame_queue};
pub use streamer::{FrameStreamer, StreamControl};
