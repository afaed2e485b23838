//! Keyframe-based seek resolution.

/// How the decoder should reach a requested frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekPlan {
    /// Keep decoding from the current position, suppressing output until
    /// `target` is reached. State is kept.
    FastForward { target: u32 },
    /// Jump to `keyframe`, clear state and flush queued frames, then
    /// fast-forward to `target`.
    HardReset { keyframe: u32, target: u32 },
}

impl SeekPlan {
    pub fn target(&self) -> u32 {
        match *self {
            Self::FastForward { target } | Self::HardReset { target, .. } => target,
        }
    }
}

/// Resolves seek requests against a sorted keyframe index.
#[derive(Debug, Clone, Copy)]
pub struct SeekResolver<'a> {
    keyframes: &'a [u32],
    total_frames: u32,
    hard_reset_distance: u32,
}

impl<'a> SeekResolver<'a> {
    pub fn new(keyframes: &'a [u32], total_frames: u32, hard_reset_distance: u32) -> Self {
        Self {
            keyframes,
            total_frames,
            hard_reset_distance,
        }
    }

    /// Greatest keyframe at or before `target`, or 0 if none.
    pub fn keyframe_for(&self, target: u32) -> u32 {
        let idx = self.keyframes.partition_point(|&k| k <= target);
        if idx == 0 { 0 } else { self.keyframes[idx - 1] }
    }

    /// Plan a seek from decoder position `current` (the next frame it will
    /// decode) to `requested`. Out-of-range requests clamp.
    pub fn resolve(&self, current: u32, requested: u32) -> SeekPlan {
        let target = requested.min(self.total_frames.saturating_sub(1));
        let behind = target < current;
        let far_ahead = target - current.min(target) > self.hard_reset_distance;

        if behind || far_ahead {
            SeekPlan::HardReset {
                keyframe: self.keyframe_for(target),
                target,
            }
        } else {
            SeekPlan::FastForward { target }
        }
    }
}
