//! Texture request deduplication and asynchronous completion
//!
//! Every `ImageTexture` maps to a [`TextureKey`]. Nodes with identical keys
//! share one [`TextureHandle`] and one load. The loader receives a
//! [`TextureCompletion`] it resolves whenever the image arrives; the cache
//! keeps the matching receiver and turns arrivals into [`TextureEvent`]s on
//! [`TextureCache::poll`]. Clearing the cache drops every receiver, which
//! turns late completions into no-ops.

use std::collections::VecDeque;

use futures::channel::oneshot;
use rustc_hash::FxHashMap;

use crate::constants::texture_constants::{ABSOLUTE_URL_PREFIXES, TEXTURE_TIMEOUT_MS};
use crate::scene::fields::{ImageTextureFields, TextureBinding, TextureTransformFields};
use crate::scene::node::NodeKey;

/// Shared handle of one deduplicated texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(u64);

impl TextureHandle {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapMode {
    Repeat,
    ClampToEdge,
}

impl WrapMode {
    fn from_repeat(repeat: bool) -> Self {
        if repeat {
            WrapMode::Repeat
        } else {
            WrapMode::ClampToEdge
        }
    }
}

/// Everything that makes two textures interchangeable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureKey {
    pub url: String,
    pub transparent: bool,
    pub wrap: (WrapMode, WrapMode),
    pub anisotropy: u8,
    /// Bit patterns of center, rotation, scale and translation
    pub transform: Option<[u32; 7]>,
}

impl TextureKey {
    pub fn new(
        url: String,
        texture: &ImageTextureFields,
        transform: Option<&TextureTransformFields>,
    ) -> Self {
        Self {
            url,
            transparent: texture.transparent,
            wrap: (
                WrapMode::from_repeat(texture.repeat_s),
                WrapMode::from_repeat(texture.repeat_t),
            ),
            anisotropy: texture.anisotropy,
            transform: transform.map(|t| {
                [
                    t.center.x.to_bits(),
                    t.center.y.to_bits(),
                    t.rotation.to_bits(),
                    t.scale.x.to_bits(),
                    t.scale.y.to_bits(),
                    t.translation.x.to_bits(),
                    t.translation.y.to_bits(),
                ]
            }),
        }
    }
}

/// Prefix relative urls with the texture path announced by the server
pub fn resolve_url(prefix: &str, url: &str) -> String {
    if prefix.is_empty() || ABSOLUTE_URL_PREFIXES.iter().any(|p| url.starts_with(p)) {
        return url.to_string();
    }
    if prefix.ends_with('/') {
        format!("{}{}", prefix, url)
    } else {
        format!("{}/{}", prefix, url)
    }
}

/// Decoded RGBA8 image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl ImageData {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Single opaque white pixel
    pub fn white() -> Self {
        Self::new(1, 1, vec![255; 4])
    }
}

pub type LoadResult = Result<ImageData, String>;

/// One load handed to the [`TextureLoader`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureRequest {
    pub handle: TextureHandle,
    pub key: TextureKey,
}

impl TextureRequest {
    pub fn url(&self) -> &str {
        &self.key.url
    }
}

/// Completion side of a pending load
#[derive(Debug)]
pub struct TextureCompletion {
    sender: oneshot::Sender<LoadResult>,
}

impl TextureCompletion {
    /// Deliver the result; `false` when the scene that asked for it is gone
    pub fn complete(self, result: LoadResult) -> bool {
        self.sender.send(result).is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.sender.is_canceled()
    }
}

/// Source of images
pub trait TextureLoader {
    /// Return an already decoded image, or keep `completion` and resolve it
    /// later
    fn load_or_retrieve(
        &mut self,
        request: &TextureRequest,
        completion: TextureCompletion,
    ) -> Option<ImageData>;
}

/// Loader that queues every request until the host completes it
#[derive(Debug, Default)]
pub struct QueuedTextureLoader {
    queue: VecDeque<(TextureRequest, TextureCompletion)>,
    retained: FxHashMap<String, ImageData>,
    requested: Vec<String>,
}

impl QueuedTextureLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `url` synchronously from now on
    pub fn retain(&mut self, url: impl Into<String>, image: ImageData) {
        self.retained.insert(url.into(), image);
    }

    /// Every url ever requested, in request order
    pub fn requested_urls(&self) -> &[String] {
        &self.requested
    }

    pub fn pending_urls(&self) -> Vec<&str> {
        self.queue.iter().map(|(request, _)| request.url()).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// Resolve the oldest queued load; `None` when nothing is queued
    pub fn complete_next(&mut self, result: LoadResult) -> Option<bool> {
        let (_, completion) = self.queue.pop_front()?;
        Some(completion.complete(result))
    }

    /// Resolve every queued load of `url`, returning how many were delivered
    pub fn complete_url(&mut self, url: &str, result: LoadResult) -> usize {
        let mut delivered = 0;
        let mut remaining = VecDeque::with_capacity(self.queue.len());
        for (request, completion) in self.queue.drain(..) {
            if request.url() == url {
                if completion.complete(result.clone()) {
                    delivered += 1;
                }
            } else {
                remaining.push_back((request, completion));
            }
        }
        self.queue = remaining;
        delivered
    }

    /// Resolve everything queued with `result`
    pub fn complete_all(&mut self, result: LoadResult) -> usize {
        self.queue
            .drain(..)
            .filter(|(_, completion)| !completion.is_cancelled())
            .map(|(_, completion)| completion.complete(result.clone()))
            .filter(|delivered| *delivered)
            .count()
    }
}

impl TextureLoader for QueuedTextureLoader {
    fn load_or_retrieve(
        &mut self,
        request: &TextureRequest,
        completion: TextureCompletion,
    ) -> Option<ImageData> {
        self.requested.push(request.url().to_string());
        if let Some(image) = self.retained.get(request.url()) {
            return Some(image.clone());
        }
        self.queue.push_back((request.clone(), completion));
        None
    }
}

enum TextureState {
    Pending {
        receiver: oneshot::Receiver<LoadResult>,
        timed_out: bool,
    },
    Ready(ImageData),
    Failed(String),
}

struct TextureEntry {
    key: TextureKey,
    state: TextureState,
    waiters: Vec<NodeKey>,
    requested_at_ms: u64,
}

impl TextureEntry {
    fn binding(&self, handle: TextureHandle) -> TextureBinding {
        match self.state {
            TextureState::Pending { .. } => TextureBinding::Pending(handle),
            TextureState::Ready(_) => TextureBinding::Ready(handle),
            TextureState::Failed(_) => TextureBinding::Failed(handle),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TextureOutcome {
    Loaded,
    Failed(String),
    /// Still loading but no longer counted as pending
    TimedOut,
}

/// Change of a texture's state, with the nodes waiting on it
#[derive(Debug, Clone, PartialEq)]
pub struct TextureEvent {
    pub handle: TextureHandle,
    pub url: String,
    pub outcome: TextureOutcome,
    pub waiters: Vec<NodeKey>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureStats {
    pub requests: u64,
    pub loads_started: u64,
    pub shared_hits: u64,
    pub loaded: u64,
    pub failed: u64,
    pub timed_out: u64,
}

pub struct TextureCache {
    entries: FxHashMap<TextureHandle, TextureEntry>,
    by_key: FxHashMap<TextureKey, TextureHandle>,
    next_handle: u64,
    timeout_ms: u64,
    stats: TextureStats,
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::new(TEXTURE_TIMEOUT_MS)
    }
}

impl TextureCache {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            entries: FxHashMap::default(),
            by_key: FxHashMap::default(),
            next_handle: 1,
            timeout_ms,
            stats: TextureStats::default(),
        }
    }

    pub fn stats(&self) -> TextureStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attach `waiter` to the texture for `key`, starting a load if no live
    /// texture shares the key
    pub fn request(
        &mut self,
        key: TextureKey,
        waiter: NodeKey,
        loader: &mut dyn TextureLoader,
        now_ms: u64,
    ) -> TextureBinding {
        self.stats.requests += 1;
        if let Some(&handle) = self.by_key.get(&key) {
            if let Some(entry) = self.entries.get_mut(&handle) {
                self.stats.shared_hits += 1;
                if !entry.waiters.contains(&waiter) {
                    entry.waiters.push(waiter);
                }
                return entry.binding(handle);
            }
        }

        let handle = TextureHandle(self.next_handle);
        self.next_handle += 1;
        self.stats.loads_started += 1;

        let (sender, receiver) = oneshot::channel();
        let request = TextureRequest {
            handle,
            key: key.clone(),
        };
        log::debug!("Requesting texture {}", request.url());
        let state = match loader.load_or_retrieve(&request, TextureCompletion { sender }) {
            Some(image) => {
                self.stats.loaded += 1;
                TextureState::Ready(image)
            }
            None => TextureState::Pending {
                receiver,
                timed_out: false,
            },
        };

        let entry = TextureEntry {
            key: key.clone(),
            state,
            waiters: vec![waiter],
            requested_at_ms: now_ms,
        };
        let binding = entry.binding(handle);
        self.entries.insert(handle, entry);
        self.by_key.insert(key, handle);
        binding
    }

    /// Stop notifying `waiter` about `handle`; the texture is dropped with
    /// its last waiter and a load still in flight completes into nothing
    pub fn release(&mut self, handle: TextureHandle, waiter: NodeKey) {
        let Some(entry) = self.entries.get_mut(&handle) else {
            return;
        };
        entry.waiters.retain(|&existing| existing != waiter);
        if !entry.waiters.is_empty() {
            return;
        }
        if let Some(entry) = self.entries.remove(&handle) {
            if self.by_key.get(&entry.key) == Some(&handle) {
                self.by_key.remove(&entry.key);
            }
            log::debug!("Texture {} has no users left", entry.key.url);
        }
    }

    pub fn image(&self, handle: TextureHandle) -> Option<&ImageData> {
        match &self.entries.get(&handle)?.state {
            TextureState::Ready(image) => Some(image),
            _ => None,
        }
    }

    pub fn failure(&self, handle: TextureHandle) -> Option<&str> {
        match &self.entries.get(&handle)?.state {
            TextureState::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn key(&self, handle: TextureHandle) -> Option<&TextureKey> {
        self.entries.get(&handle).map(|entry| &entry.key)
    }

    /// Loads still blocking "all textures loaded"; timed out loads excluded
    pub fn has_pending(&self) -> bool {
        self.entries.values().any(|entry| {
            matches!(
                entry.state,
                TextureState::Pending {
                    timed_out: false,
                    ..
                }
            )
        })
    }

    /// Collect finished loads and expire slow ones
    pub fn poll(&mut self, now_ms: u64) -> Vec<TextureEvent> {
        let mut events = Vec::new();
        for (&handle, entry) in self.entries.iter_mut() {
            let TextureState::Pending {
                receiver,
                timed_out,
            } = &mut entry.state
            else {
                continue;
            };

            let outcome = match receiver.try_recv() {
                Ok(None) => {
                    if *timed_out || now_ms.saturating_sub(entry.requested_at_ms) < self.timeout_ms {
                        continue;
                    }
                    *timed_out = true;
                    self.stats.timed_out += 1;
                    log::warn!(
                        "Texture {} still loading after {} ms",
                        entry.key.url,
                        self.timeout_ms
                    );
                    events.push(TextureEvent {
                        handle,
                        url: entry.key.url.clone(),
                        outcome: TextureOutcome::TimedOut,
                        waiters: entry.waiters.clone(),
                    });
                    continue;
                }
                Ok(Some(Ok(image))) => {
                    self.stats.loaded += 1;
                    entry.state = TextureState::Ready(image);
                    TextureOutcome::Loaded
                }
                Ok(Some(Err(error))) => {
                    self.stats.failed += 1;
                    log::warn!("Texture {} failed to load: {}", entry.key.url, error);
                    entry.state = TextureState::Failed(error.clone());
                    TextureOutcome::Failed(error)
                }
                Err(oneshot::Canceled) => {
                    self.stats.failed += 1;
                    let error = "loader dropped the request".to_string();
                    log::warn!("Texture {} failed to load: {}", entry.key.url, error);
                    entry.state = TextureState::Failed(error.clone());
                    TextureOutcome::Failed(error)
                }
            };
            events.push(TextureEvent {
                handle,
                url: entry.key.url.clone(),
                outcome,
                waiters: entry.waiters.clone(),
            });
        }
        events.sort_by_key(|event| event.handle);
        events
    }

    /// Forget every texture; outstanding completions become no-ops
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_key.clear();
    }
}
