//! Reference-counted texture atlases shared by every session of one file.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::animation::TextureEntry;

/// Opaque handle to an uploaded texture array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Texture upload failure.
#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error("Failed to upload texture {path}: {reason}")]
    Upload { path: String, reason: String },
}

/// Atlas layers occupied by one texture entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerRange {
    pub start: u32,
    pub count: u32,
}

/// Maps a particle's `(tex, seq)` pair to an atlas layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextureAtlasMap {
    ranges: Vec<LayerRange>,
}

impl TextureAtlasMap {
    pub fn new(ranges: Vec<LayerRange>) -> Self {
        Self { ranges }
    }

    /// Lay entries out consecutively, one layer per sprite-sheet cell.
    pub fn from_entries(entries: &[TextureEntry]) -> Self {
        let mut start = 0;
        let ranges = entries
            .iter()
            .map(|entry| {
                let count = entry.frame_count();
                let range = LayerRange { start, count };
                start += count;
                range
            })
            .collect();
        Self { ranges }
    }

    pub fn total_layers(&self) -> u32 {
        self.ranges.iter().map(|r| r.count).sum()
    }

    /// Layer for a particle. Unknown textures map to layer 0.
    pub fn layer(&self, tex: u8, seq: u8) -> f32 {
        match self.ranges.get(tex as usize) {
            Some(range) if range.count > 0 => {
                (range.start + u32::from(seq) % range.count) as f32
            }
            Some(range) => range.start as f32,
            None => 0.0,
        }
    }
}

/// Result of uploading a list of sprite sheets.
#[derive(Debug, Clone)]
pub struct UploadedAtlas {
    pub handle: TextureHandle,
    pub atlas: TextureAtlasMap,
}

/// Host-side texture loader. Image decoding lives behind this trait.
pub trait TextureUploader: Send + Sync {
    /// Upload the given sheets into one texture array.
    fn upload(&self, entries: &[TextureEntry]) -> Result<UploadedAtlas, TextureError>;

    /// Upload the fallback texture used by animations without entries.
    fn upload_default(&self) -> Result<UploadedAtlas, TextureError>;

    /// Free a texture array. Called once per successful upload.
    fn destroy(&self, handle: TextureHandle);
}

/// Uploader that only computes layouts. Used for headless playback.
#[derive(Debug, Default)]
pub struct HeadlessUploader {
    next_handle: AtomicU64,
}

impl HeadlessUploader {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> TextureHandle {
        TextureHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl TextureUploader for HeadlessUploader {
    fn upload(&self, entries: &[TextureEntry]) -> Result<UploadedAtlas, TextureError> {
        Ok(UploadedAtlas {
            handle: self.next(),
            atlas: TextureAtlasMap::from_entries(entries),
        })
    }

    fn upload_default(&self) -> Result<UploadedAtlas, TextureError> {
        Ok(UploadedAtlas {
            handle: self.next(),
            atlas: TextureAtlasMap::new(vec![LayerRange { start: 0, count: 1 }]),
        })
    }

    fn destroy(&self, handle: TextureHandle) {
        log::debug!("Headless texture {} destroyed", handle.0);
    }
}

/// An uploaded atlas and its layout.
#[derive(Debug)]
pub struct TextureResource {
    key: String,
    handle: TextureHandle,
    atlas: Arc<TextureAtlasMap>,
}

impl TextureResource {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn atlas(&self) -> &Arc<TextureAtlasMap> {
        &self.atlas
    }
}

struct CacheEntry {
    resource: Arc<TextureResource>,
    refs: usize,
}

/// Texture resources keyed by animation path.
///
/// Acquire and release are serialized under one lock, including the
/// upload on a miss and the destroy at zero references.
pub struct TextureCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    uploader: Arc<dyn TextureUploader>,
}

impl TextureCache {
    pub fn new(uploader: Arc<dyn TextureUploader>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            uploader,
        })
    }

    /// Take a reference to the resource for `key`, uploading it on first use.
    pub fn acquire(
        self: &Arc<Self>,
        key: &str,
        entries: &[TextureEntry],
    ) -> Result<SharedTexture, TextureError> {
        let mut map = self.entries.lock();
        if let Some(entry) = map.get_mut(key) {
            entry.refs += 1;
            return Ok(SharedTexture {
                cache: Arc::clone(self),
                resource: Arc::clone(&entry.resource),
            });
        }

        let uploaded = if entries.is_empty() {
            self.uploader.upload_default()?
        } else {
            self.uploader.upload(entries)?
        };
        log::info!(
            "Texture cache miss for {key}: {} layers uploaded",
            uploaded.atlas.total_layers()
        );
        let resource = Arc::new(TextureResource {
            key: key.to_string(),
            handle: uploaded.handle,
            atlas: Arc::new(uploaded.atlas),
        });
        map.insert(
            key.to_string(),
            CacheEntry {
                resource: Arc::clone(&resource),
                refs: 1,
            },
        );
        Ok(SharedTexture {
            cache: Arc::clone(self),
            resource,
        })
    }

    /// Current reference count for `key`.
    pub fn ref_count(&self, key: &str) -> usize {
        self.entries.lock().get(key).map_or(0, |e| e.refs)
    }

    /// Number of resident resources.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn retain(&self, key: &str) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.refs += 1;
        }
    }

    fn release(&self, key: &str) {
        let mut map = self.entries.lock();
        let Some(entry) = map.get_mut(key) else {
            log::warn!("Texture release for unknown key {key}");
            return;
        };
        entry.refs -= 1;
        if entry.refs == 0 {
            if let Some(entry) = map.remove(key) {
                self.uploader.destroy(entry.resource.handle);
                log::info!("Texture resource for {key} disposed");
            }
        }
    }
}

/// One counted reference to a cached texture. Released on drop.
pub struct SharedTexture {
    cache: Arc<TextureCache>,
    resource: Arc<TextureResource>,
}

impl SharedTexture {
    pub fn handle(&self) -> TextureHandle {
        self.resource.handle
    }

    pub fn atlas(&self) -> &Arc<TextureAtlasMap> {
        &self.resource.atlas
    }

    pub fn key(&self) -> &str {
        &self.resource.key
    }
}

impl Clone for SharedTexture {
    fn clone(&self) -> Self {
        self.cache.retain(&self.resource.key);
        Self {
            cache: Arc::clone(&self.cache),
            resource: Arc::clone(&self.resource),
        }
    }
}

impl Drop for SharedTexture {
    fn drop(&mut self) {
        self.cache.release(&self.resource.key);
    }
}

impl std::fmt::Debug for SharedTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTexture")
            .field("key", &self.resource.key)
            .field("handle", &self.resource.handle)
            .finish()
    }
}
