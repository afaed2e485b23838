//! Owns every active session and drives them once per host tick.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use super::PlayerError;
use super::clock::TimeSource;
use super::session::{PlaybackSession, SessionId, StopReason, WorldBounds};
use crate::animation::AnimationFile;
use crate::gpu::{DrawBatch, GpuBackend, GpuError, TextureCache, UploadPipeline};
use crate::schema::{CullingBehavior, PlayerConfig};
use crate::stream::{BufferPool, FrameBuffer};

/// Per-tick render statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Sessions still playing.
    pub active: usize,
    /// Sessions drawn this tick.
    pub rendered: usize,
    pub particles: u64,
}

/// Registry of playing animations sharing one buffer pool and texture cache.
pub struct SessionManager {
    config: PlayerConfig,
    clock: Arc<dyn TimeSource>,
    pool: Arc<BufferPool>,
    textures: Arc<TextureCache>,
    sessions: BTreeMap<SessionId, PlaybackSession>,
    next_id: u64,
    last_stats: FrameStats,
}

impl SessionManager {
    pub fn new(
        config: PlayerConfig,
        clock: Arc<dyn TimeSource>,
        pool: Arc<BufferPool>,
        textures: Arc<TextureCache>,
    ) -> Self {
        Self {
            config,
            clock,
            pool,
            textures,
            sessions: BTreeMap::new(),
            next_id: 1,
            last_stats: FrameStats::default(),
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn textures(&self) -> &Arc<TextureCache> {
        &self.textures
    }

    /// Start playing `path` at world position `origin`.
    ///
    /// Returns `Ok(None)` when in-game rendering is disabled and the host is
    /// not exporting.
    pub fn start_session(
        &mut self,
        path: impl AsRef<Path>,
        origin: [f64; 3],
    ) -> Result<Option<SessionId>, PlayerError> {
        let path = path.as_ref();
        let sample = self.clock.sample();
        if !self.config.render_in_game && !sample.exporting {
            log::debug!("In-game rendering disabled, ignoring {}", path.display());
            return Ok(None);
        }

        let entries = AnimationFile::pre_scan_textures(path)?;
        let key = path.to_string_lossy();
        let texture = self.textures.acquire(&key, &entries)?;

        let id = SessionId(self.next_id);
        self.next_id += 1;
        let session = PlaybackSession::start(
            id,
            path,
            origin,
            texture,
            Arc::clone(&self.pool),
            &self.config,
            sample.now,
        )?;
        self.sessions.insert(id, session);
        Ok(Some(id))
    }

    /// Stop a session and wait for its decoder thread. Returns false for
    /// unknown ids.
    pub fn stop_session(&mut self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some(mut session) => {
                session.stop(StopReason::Stopped);
                session.join();
                true
            }
            None => false,
        }
    }

    /// Run one scheduling step for `id` and return the frame to display.
    pub fn poll_next_frame(&mut self, id: SessionId) -> Option<&FrameBuffer> {
        let sample = self.clock.sample();
        self.sessions.get_mut(&id)?.poll(&sample)
    }

    /// Move session `id` to `frame`. Out of range frames clamp.
    pub fn seek(&mut self, id: SessionId, frame: u32) -> bool {
        let sample = self.clock.sample();
        match self.sessions.get_mut(&id) {
            Some(session) => {
                session.seek(frame, &sample);
                true
            }
            None => false,
        }
    }

    pub fn session(&self, id: SessionId) -> Option<&PlaybackSession> {
        self.sessions.get(&id)
    }

    /// Sessions that have not finished.
    pub fn instance_count(&self) -> usize {
        self.sessions.values().filter(|s| !s.is_finished()).count()
    }

    pub fn last_stats(&self) -> FrameStats {
        self.last_stats
    }

    /// Poll every session and draw the visible ones relative to `camera`.
    ///
    /// Finished sessions are reaped afterwards.
    pub fn render<B, F>(
        &mut self,
        pipeline: &mut UploadPipeline<B>,
        camera: [f64; 3],
        is_visible: F,
    ) -> Result<FrameStats, GpuError>
    where
        B: GpuBackend,
        F: Fn(&WorldBounds) -> bool,
    {
        let sample = self.clock.sample();
        let mut stats = FrameStats::default();

        for session in self.sessions.values_mut() {
            if session.is_finished() {
                continue;
            }
            stats.active += 1;

            let visible = is_visible(&session.world_bounds());
            if !visible && self.config.culling == CullingBehavior::PauseAndHide {
                continue;
            }
            if session.poll(&sample).is_none() || !visible {
                continue;
            }
            let Some(frame) = session.current_frame() else {
                continue;
            };
            if frame.particle_count() == 0 {
                continue;
            }

            let origin = session.origin();
            let batch = DrawBatch {
                particle_count: frame.particle_count() as u32,
                offset: [
                    (origin[0] - camera[0]) as f32,
                    (origin[1] - camera[1]) as f32,
                    (origin[2] - camera[2]) as f32,
                ],
                interpolation: session.interpolation(),
                texture: session.texture().map(|t| t.handle()),
            };
            pipeline.submit(frame.as_slice(), &batch)?;
            stats.rendered += 1;
            stats.particles += u64::from(batch.particle_count);
        }

        self.reap();
        self.last_stats = stats;
        Ok(stats)
    }

    /// Drop finished sessions whose decoder threads have exited.
    pub fn reap(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_reapable());
        let reaped = before - self.sessions.len();
        if reaped > 0 {
            log::debug!("Reaped {reaped} finished sessions");
        }
        reaped
    }

    /// Stop every session, then return pooled memory and upload buffers to
    /// their initial footprint.
    pub fn clear_all<B: GpuBackend>(
        &mut self,
        pipeline: &mut UploadPipeline<B>,
    ) -> Result<(), GpuError> {
        let count = self.sessions.len();
        for session in self.sessions.values_mut() {
            session.stop(StopReason::Stopped);
        }
        for session in self.sessions.values_mut() {
            session.join();
        }
        self.sessions.clear();

        let freed = self.pool.reclaim();
        log::info!("Cleared {count} sessions, reclaimed {freed} pooled buffers");
        self.last_stats = FrameStats::default();
        pipeline.shrink()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        for session in self.sessions.values_mut() {
            session.stop(StopReason::Stopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::drifting_particle_file;
    use crate::gpu::{HeadlessUploader, HostBackend};
    use crate::playback::ExternalClock;
    use crate::schema::UploadConfig;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    struct Harness {
        _dir: tempfile::TempDir,
        path: std::path::PathBuf,
        clock: Arc<ExternalClock>,
        manager: SessionManager,
        pipeline: UploadPipeline<HostBackend>,
        ticks: u32,
    }

    fn harness(config: PlayerConfig) -> Harness {
        let dir = tempdir().unwrap();
        let path = drifting_particle_file(dir.path());
        let clock = Arc::new(ExternalClock::new());
        clock.set_time(10.0);
        clock.set_exporting(true);
        let manager = SessionManager::new(
            config,
            clock.clone(),
            Arc::new(BufferPool::default()),
            TextureCache::new(Arc::new(HeadlessUploader::new())),
        );
        let upload = UploadConfig {
            initial_buffer_size: 1024,
            ..UploadConfig::default()
        };
        let pipeline = UploadPipeline::new(HostBackend::new(), &upload).unwrap();
        Harness {
            _dir: dir,
            path,
            clock,
            manager,
            pipeline,
            ticks: 0,
        }
    }

    /// Move the clock to the middle of the next frame.
    fn next_frame_time(h: &mut Harness) {
        h.clock.set_time(10.0 + (f64::from(h.ticks) + 0.5) / 30.0);
        h.ticks += 1;
    }

    fn step(h: &mut Harness) -> FrameStats {
        next_frame_time(h);
        h.manager
            .render(&mut h.pipeline, [0.0; 3], |_| true)
            .unwrap()
    }

    #[test]
    fn test_start_session_shares_texture() {
        let mut h = harness(PlayerConfig::default());
        let a = h.manager.start_session(&h.path, [0.0; 3]).unwrap().unwrap();
        let b = h.manager.start_session(&h.path, [5.0; 3]).unwrap().unwrap();
        assert_ne!(a, b);
        assert_eq!(h.manager.instance_count(), 2);

        // One reference per session and one per decoder
        let key = h.path.to_string_lossy().to_string();
        assert_eq!(h.manager.textures().ref_count(&key), 4);
        assert_eq!(h.manager.textures().len(), 1);

        assert!(h.manager.stop_session(a));
        assert!(!h.manager.stop_session(a));
        assert_eq!(h.manager.textures().ref_count(&key), 2);
    }

    #[test]
    fn test_render_disabled_discards_request() {
        let config = PlayerConfig {
            render_in_game: false,
            ..PlayerConfig::default()
        };
        let mut h = harness(config);
        h.clock.set_exporting(false);
        assert!(h.manager.start_session(&h.path, [0.0; 3]).unwrap().is_none());

        // Exporting always renders
        h.clock.set_exporting(true);
        assert!(h.manager.start_session(&h.path, [0.0; 3]).unwrap().is_some());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let mut h = harness(PlayerConfig::default());
        let missing = h.path.with_file_name("missing.nbl");
        assert!(h.manager.start_session(&missing, [0.0; 3]).is_err());
        assert!(h.manager.textures().is_empty());
    }

    #[test]
    fn test_render_draws_every_export_frame() {
        let mut h = harness(PlayerConfig::default());
        h.manager.start_session(&h.path, [3.0, 0.0, 0.0]).unwrap();

        for _ in 0..60 {
            let stats = step(&mut h);
            assert_eq!(stats.active, 1);
            assert_eq!(stats.rendered, 1);
            assert_eq!(stats.particles, 1);
        }
        let backend = h.pipeline.backend();
        assert_eq!(backend.draw_calls(), 60);
        let batch = backend.last_batch().unwrap();
        assert_eq!(batch.offset, [3.0, 0.0, 0.0]);
        assert!(batch.texture.is_some());
    }

    #[test]
    fn test_finished_sessions_are_reaped() {
        let mut h = harness(PlayerConfig::default());
        h.manager.start_session(&h.path, [0.0; 3]).unwrap();
        for _ in 0..60 {
            step(&mut h);
        }

        // Past the duration: the session times out and its thread exits
        h.clock.advance(1.0);
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let stats = h.manager.render(&mut h.pipeline, [0.0; 3], |_| true).unwrap();
            if stats.active == 0 && h.manager.session(SessionId(1)).is_none() {
                break;
            }
            assert!(Instant::now() < deadline, "session was never reaped");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(h.manager.textures().is_empty());
    }

    #[test]
    fn test_simulate_only_culling_skips_draw() {
        let mut h = harness(PlayerConfig::default());
        let id = h.manager.start_session(&h.path, [0.0; 3]).unwrap().unwrap();
        for _ in 0..10 {
            next_frame_time(&mut h);
            let stats = h.manager.render(&mut h.pipeline, [0.0; 3], |_| false).unwrap();
            assert_eq!(stats.rendered, 0);
        }
        // Still decoding while hidden
        assert_eq!(h.manager.session(id).unwrap().rendered_frames(), 10);
        assert_eq!(h.pipeline.backend().draw_calls(), 0);
    }

    #[test]
    fn test_pause_and_hide_stops_polling() {
        let config = PlayerConfig {
            culling: CullingBehavior::PauseAndHide,
            ..PlayerConfig::default()
        };
        let mut h = harness(config);
        let id = h.manager.start_session(&h.path, [0.0; 3]).unwrap().unwrap();
        for _ in 0..10 {
            next_frame_time(&mut h);
            h.manager.render(&mut h.pipeline, [0.0; 3], |_| false).unwrap();
        }
        assert_eq!(h.manager.session(id).unwrap().rendered_frames(), 0);
    }

    #[test]
    fn test_seek_and_poll_next_frame() {
        let mut h = harness(PlayerConfig::default());
        let id = h.manager.start_session(&h.path, [0.0; 3]).unwrap().unwrap();
        assert!(h.manager.seek(id, 40));

        next_frame_time(&mut h);
        let frame = h.manager.poll_next_frame(id).unwrap();
        assert_eq!(frame.frame(), 40);
        assert!(!h.manager.seek(SessionId(99), 1));
    }

    #[test]
    fn test_clear_all_shrinks_upload_buffers() {
        let mut h = harness(PlayerConfig::default());
        h.manager.start_session(&h.path, [0.0; 3]).unwrap();
        h.manager.start_session(&h.path, [1.0; 3]).unwrap();
        step(&mut h);

        // Force growth past the initial size
        let large = vec![0u8; 4096];
        let batch = DrawBatch {
            particle_count: 0,
            offset: [0.0; 3],
            interpolation: 0.0,
            texture: None,
        };
        h.pipeline.submit(&large, &batch).unwrap();
        assert_eq!(h.pipeline.capacity(), 4096);

        h.manager.clear_all(&mut h.pipeline).unwrap();
        assert_eq!(h.manager.instance_count(), 0);
        assert_eq!(h.pipeline.capacity(), 1024);
        assert!(h.manager.textures().is_empty());
        assert_eq!(h.manager.pool().pooled_count(), 0);
    }
}
