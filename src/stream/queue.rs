//! Bounded hand-off of decoded frames from a decoder thread to its consumer.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError};

use super::pool::{BufferPool, FrameBuffer};

/// How long a blocked send waits before re-checking for cancellation.
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Create a queue holding at most `capacity` frames.
pub fn frame_queue(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (
        FrameSender {
            tx,
            drain: rx.clone(),
        },
        FrameReceiver { rx },
    )
}

/// Producer side, owned by the decoder thread.
pub struct FrameSender {
    tx: Sender<FrameBuffer>,
    /// Lets the producer flush frames nobody consumed yet.
    drain: Receiver<FrameBuffer>,
}

impl FrameSender {
    /// Block until `buffer` is queued.
    ///
    /// `cancelled` is polled while the queue is full. On cancellation or a
    /// dropped consumer the buffer is handed back to the caller.
    pub fn send(
        &self,
        mut buffer: FrameBuffer,
        cancelled: impl Fn() -> bool,
    ) -> Result<(), FrameBuffer> {
        loop {
            match self.tx.send_timeout(buffer, SEND_POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(b)) => {
                    if cancelled() {
                        return Err(b);
                    }
                    buffer = b;
                }
                Err(SendTimeoutError::Disconnected(b)) => return Err(b),
            }
        }
    }

    /// Discard every queued frame, releasing it to `pool`.
    pub fn flush(&self, pool: &BufferPool) -> usize {
        let mut flushed = 0;
        while let Ok(buffer) = self.drain.try_recv() {
            pool.release(buffer);
            flushed += 1;
        }
        flushed
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Consumer side, owned by the playback session.
pub struct FrameReceiver {
    rx: Receiver<FrameBuffer>,
}

/// Outcome of a non-blocking or bounded receive.
#[derive(Debug)]
pub enum Received {
    Frame(FrameBuffer),
    Empty,
    /// The decoder thread is gone.
    Disconnected,
}

impl FrameReceiver {
    pub fn try_recv(&self) -> Received {
        match self.rx.try_recv() {
            Ok(buffer) => Received::Frame(buffer),
            Err(TryRecvError::Empty) => Received::Empty,
            Err(TryRecvError::Disconnected) => Received::Disconnected,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Received {
        match self.rx.recv_timeout(timeout) {
            Ok(buffer) => Received::Frame(buffer),
            Err(RecvTimeoutError::Timeout) => Received::Empty,
            Err(RecvTimeoutError::Disconnected) => Received::Disconnected,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.rx.capacity()
    }
}
