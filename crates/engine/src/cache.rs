//! Bounded pool of GPU texture slots with an asynchronous refill pipeline.
//!
//! Decoding runs on a dedicated worker thread (file read, bitmap decode,
//! scale); only the final GPU upload is performed on the GPU command thread
//! when the renderer calls [`TextureCache::drain_completed`]. A slot's
//! `ready` flag flips true only after that upload succeeds, and a slot that
//! is pinned (currently displayed by a frame) is never evicted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use rand::prelude::*;
use tracing::{debug, warn};

use crate::media::MediaSource;
use crate::paint::PaintBackend;
use crate::types::{DecodedImage, MediaId, SlotId, TextureHandle};

/// One entry in the bounded texture pool.
#[derive(Debug)]
struct Slot {
    handle: Option<TextureHandle>,
    media: Option<MediaId>,
    ready: bool,
    last_used: Instant,
    pinned: bool,
}

impl Slot {
    fn empty(now: Instant) -> Self {
        Self {
            handle: None,
            media: None,
            ready: false,
            last_used: now,
            pinned: false,
        }
    }
}

/// Fixed-capacity slot table with least-recently-used eviction.
///
/// Pure state, no GPU objects: the table stores opaque handles and hands
/// evicted ones back to the caller for destruction.
pub struct SlotTable {
    slots: Vec<Slot>,
}

impl SlotTable {
    pub fn new(capacity: usize, now: Instant) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::empty(now)).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Finds a slot for a fresh upload: an empty slot if one exists,
    /// otherwise the least-recently-used unpinned slot. Returns the evicted
    /// handle (caller destroys it) alongside the claimed slot. `None` when
    /// every slot is pinned.
    pub fn claim(&mut self, now: Instant) -> Option<(SlotId, Option<TextureHandle>)> {
        if let Some(index) = self.slots.iter().position(|slot| slot.handle.is_none()) {
            self.slots[index].last_used = now;
            return Some((SlotId(index), None));
        }
        let victim = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.pinned)
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(index, _)| index)?;
        let slot = &mut self.slots[victim];
        let evicted = slot.handle.take();
        slot.media = None;
        slot.ready = false;
        slot.last_used = now;
        Some((SlotId(victim), evicted))
    }

    /// Installs an uploaded texture, marking the slot ready.
    pub fn install(&mut self, id: SlotId, handle: TextureHandle, media: MediaId, now: Instant) {
        let slot = &mut self.slots[id.0];
        slot.handle = Some(handle);
        slot.media = Some(media);
        slot.ready = true;
        slot.last_used = now;
        slot.pinned = false;
    }

    pub fn is_ready(&self, id: SlotId) -> bool {
        self.slots[id.0].ready
    }

    pub fn handle(&self, id: SlotId) -> Option<TextureHandle> {
        let slot = &self.slots[id.0];
        if slot.ready {
            slot.handle
        } else {
            None
        }
    }

    pub fn media(&self, id: SlotId) -> Option<&MediaId> {
        self.slots[id.0].media.as_ref()
    }

    pub fn pin(&mut self, id: SlotId) {
        self.slots[id.0].pinned = true;
    }

    pub fn unpin(&mut self, id: SlotId) {
        self.slots[id.0].pinned = false;
    }

    pub fn is_pinned(&self, id: SlotId) -> bool {
        self.slots[id.0].pinned
    }

    pub fn mark_used(&mut self, id: SlotId, now: Instant) {
        self.slots[id.0].last_used = now;
    }

    /// A ready, unpinned slot suitable as a transition's incoming texture.
    /// Prefers the least recently used spare, so a slot just displaced from
    /// a frame is not immediately shown again.
    pub fn spare_ready(&self) -> Option<SlotId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.ready && !slot.pinned)
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(index, _)| SlotId(index))
    }

    fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.handle.is_some()).count()
    }

    /// Clears every slot and returns the handles for destruction.
    pub fn clear(&mut self) -> Vec<TextureHandle> {
        let now = Instant::now();
        self.slots
            .iter_mut()
            .filter_map(|slot| {
                let handle = slot.handle.take();
                *slot = Slot::empty(now);
                handle
            })
            .collect()
    }
}

/// Control messages for the decode worker.
enum CacheCommand {
    /// Decode one more photo.
    Load,
    /// Re-enumerate the media source before the next decode.
    Reload,
    /// Drop all queued (not yet started) decode requests.
    Flush,
    Pause(bool),
    SetDimensions(u32, u32),
    Shutdown,
}

/// A decode result travelling back to the GPU thread.
struct DecodedPhoto {
    generation: u64,
    media: MediaId,
    image: DecodedImage,
}

/// Asynchronous pipeline from a [`MediaSource`] to GPU-resident textures.
pub struct TextureCache {
    table: SlotTable,
    control_tx: Sender<CacheCommand>,
    results_rx: Receiver<DecodedPhoto>,
    generation: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
    pending: usize,
}

impl TextureCache {
    /// Spawns the decode worker. `capacity` bounds the slot pool;
    /// `dimensions` is the initial decode target; `seed` drives the
    /// enumeration shuffle.
    pub fn new(
        source: Box<dyn MediaSource>,
        capacity: usize,
        dimensions: (u32, u32),
        seed: u64,
    ) -> Self {
        let (control_tx, control_rx) = unbounded();
        let (results_tx, results_rx) = unbounded();
        let generation = Arc::new(AtomicU64::new(0));
        let worker_generation = Arc::clone(&generation);
        let worker = std::thread::Builder::new()
            .name("photoflux-decode".into())
            .spawn(move || {
                decode_worker(source, control_rx, results_tx, worker_generation, dimensions, seed);
            })
            .expect("failed to spawn decode worker");
        Self {
            table: SlotTable::new(capacity, Instant::now()),
            control_tx,
            results_rx,
            generation,
            worker: Some(worker),
            pending: 0,
        }
    }

    pub fn table(&self) -> &SlotTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut SlotTable {
        &mut self.table
    }

    /// Number of decode requests issued but not yet fulfilled.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Asks the worker for one more decoded photo.
    pub fn request(&mut self) {
        self.pending += 1;
        let _ = self.control_tx.send(CacheCommand::Load);
    }

    /// Requests decodes until every slot is either filled or has a decode
    /// in flight. A no-op on a full pool.
    pub fn top_up(&mut self) {
        let want = self
            .table
            .capacity()
            .saturating_sub(self.table.occupied() + self.pending);
        for _ in 0..want {
            self.request();
        }
    }

    /// Re-enumerates the media source; future decodes pull from the
    /// refreshed set.
    pub fn reload_media(&self) {
        let _ = self.control_tx.send(CacheCommand::Reload);
    }

    /// Cancels queued decode requests; with `force`, results already decoded
    /// but not yet delivered are dropped too.
    pub fn empty_texture_queue(&mut self, force: bool) {
        let _ = self.control_tx.send(CacheCommand::Flush);
        self.pending = 0;
        if force {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Changes the decode target for subsequent loads. Existing textures
    /// keep their resolution.
    pub fn set_dimensions(&self, width: u32, height: u32) {
        let _ = self
            .control_tx
            .send(CacheCommand::SetDimensions(width.max(1), height.max(1)));
    }

    /// Suspends or resumes decoding. In-flight decodes may still complete;
    /// new ones are not started while paused.
    pub fn set_pause(&self, paused: bool) {
        let _ = self.control_tx.send(CacheCommand::Pause(paused));
    }

    /// GPU-thread upload step: turns delivered decode results into ready
    /// slots. Returns the slots that became ready.
    pub fn drain_completed(&mut self, backend: &mut dyn PaintBackend) -> Vec<SlotId> {
        let mut ready = Vec::new();
        loop {
            let photo = match self.results_rx.try_recv() {
                Ok(photo) => photo,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("decode worker disconnected");
                    break;
                }
            };
            self.pending = self.pending.saturating_sub(1);
            if photo.generation != self.generation.load(Ordering::Acquire) {
                debug!(media = %photo.media, "dropping stale decode result");
                continue;
            }
            let now = Instant::now();
            let Some((slot, evicted)) = self.table.claim(now) else {
                warn!(media = %photo.media, "no evictable slot; dropping decoded photo");
                continue;
            };
            if let Some(old) = evicted {
                backend.destroy_texture(old);
            }
            let label = photo.media.to_string();
            match backend.create_texture(&photo.image, &label) {
                Ok(handle) => {
                    self.table.install(slot, handle, photo.media, now);
                    ready.push(slot);
                }
                Err(err) => {
                    // Upload failure leaves the slot empty; the frame keeps
                    // whatever it was displaying.
                    warn!(media = %photo.media, error = %err, "GPU texture upload failed");
                }
            }
        }
        ready
    }

    /// Stops the worker and clears the slot table, destroying every texture
    /// through the backend.
    pub fn recycle(&mut self, backend: &mut dyn PaintBackend) {
        for handle in self.table.clear() {
            backend.destroy_texture(handle);
        }
        self.shutdown_worker();
    }

    fn shutdown_worker(&mut self) {
        let _ = self.control_tx.send(CacheCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for TextureCache {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}

fn decode_worker(
    mut source: Box<dyn MediaSource>,
    control_rx: Receiver<CacheCommand>,
    results_tx: Sender<DecodedPhoto>,
    generation: Arc<AtomicU64>,
    initial_dimensions: (u32, u32),
    seed: u64,
) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut dimensions = initial_dimensions;
    let mut media: Vec<MediaId> = Vec::new();
    let mut cursor = 0usize;
    let mut enumerated = false;
    let mut queued = 0usize;
    let mut paused = false;
    // Set when the source has nothing to decode; cleared by a reload.
    let mut starved = false;

    loop {
        // Block while idle, paused, or starved; poll between decodes
        // otherwise.
        let command = if queued > 0 && !paused && !starved {
            match control_rx.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => return,
            }
        } else {
            match control_rx.recv() {
                Ok(command) => Some(command),
                Err(_) => return,
            }
        };

        match command {
            Some(CacheCommand::Load) => {
                queued += 1;
                continue;
            }
            Some(CacheCommand::Reload) => {
                enumerated = false;
                starved = false;
                continue;
            }
            Some(CacheCommand::Flush) => {
                queued = 0;
                continue;
            }
            Some(CacheCommand::Pause(value)) => {
                paused = value;
                continue;
            }
            Some(CacheCommand::SetDimensions(width, height)) => {
                dimensions = (width, height);
                continue;
            }
            Some(CacheCommand::Shutdown) => return,
            None => {}
        }

        if paused || queued == 0 || starved {
            continue;
        }

        if !enumerated {
            match source.enumerate() {
                Ok(mut list) => {
                    list.shuffle(&mut rng);
                    media = list;
                    cursor = 0;
                    enumerated = true;
                }
                Err(err) => {
                    warn!(error = %err, "media enumeration failed; waiting for a reload");
                    starved = true;
                    continue;
                }
            }
        }

        if media.is_empty() {
            debug!("media source is empty; waiting for a reload");
            starved = true;
            continue;
        }

        // The result is tagged with the generation in force when the decode
        // starts, so a force-flush issued mid-decode drops it at drain time.
        let job_generation = generation.load(Ordering::Acquire);
        queued -= 1;

        let mut attempts = 0;
        while attempts < media.len() {
            let id = media[cursor].clone();
            cursor = (cursor + 1) % media.len();
            match source.decode(&id, dimensions) {
                Ok(image) => {
                    let delivered = results_tx.send(DecodedPhoto {
                        generation: job_generation,
                        media: id,
                        image,
                    });
                    if delivered.is_err() {
                        return;
                    }
                    break;
                }
                Err(err) => {
                    warn!(media = %id, error = %err, "decode failed; trying next candidate");
                    attempts += 1;
                }
            }
        }
        if attempts == media.len() {
            // Put the request back and park until a reload brings a usable
            // set; dropping it would leave the cache's pending count stuck.
            warn!("every media candidate failed to decode; waiting for a reload");
            queued += 1;
            starved = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use collageconfig::Color;
    use std::collections::HashSet;
    use std::time::Duration;

    use crate::paint::DrawError;
    use crate::types::QuadParams;

    /// Backend stub that mints handles without a GPU.
    #[derive(Default)]
    struct NullBackend {
        next_handle: u64,
        destroyed: Vec<TextureHandle>,
        fail_uploads: bool,
    }

    impl PaintBackend for NullBackend {
        fn configure_surface(&mut self, _width: u32, _height: u32) {}

        fn create_texture(
            &mut self,
            _image: &DecodedImage,
            _label: &str,
        ) -> anyhow::Result<TextureHandle> {
            if self.fail_uploads {
                return Err(anyhow!("upload rejected"));
            }
            self.next_handle += 1;
            Ok(TextureHandle(self.next_handle))
        }

        fn destroy_texture(&mut self, handle: TextureHandle) {
            self.destroyed.push(handle);
        }

        fn begin_frame(&mut self, _clear: Color) -> Result<(), DrawError> {
            Ok(())
        }

        fn draw_photo(&mut self, _texture: TextureHandle, _quad: QuadParams) {}

        fn draw_fill(&mut self, _color: Color, _quad: QuadParams) {}

        fn end_frame(&mut self) -> Result<(), DrawError> {
            Ok(())
        }
    }

    struct FakeSource {
        entries: Vec<MediaId>,
        broken: HashSet<MediaId>,
        decode_delay: Duration,
    }

    impl FakeSource {
        fn with_entries(count: usize) -> Self {
            Self {
                entries: (0..count).map(|i| MediaId::new(format!("photo-{i}"))).collect(),
                broken: HashSet::new(),
                decode_delay: Duration::ZERO,
            }
        }
    }

    impl MediaSource for FakeSource {
        fn enumerate(&mut self) -> anyhow::Result<Vec<MediaId>> {
            Ok(self.entries.clone())
        }

        fn decode(&mut self, id: &MediaId, target: (u32, u32)) -> anyhow::Result<DecodedImage> {
            if !self.decode_delay.is_zero() {
                std::thread::sleep(self.decode_delay);
            }
            if self.broken.contains(id) {
                return Err(anyhow!("corrupt entry {id}"));
            }
            let (w, h) = (target.0.max(1), target.1.max(1));
            Ok(DecodedImage::new(w, h, vec![0u8; (w * h * 4) as usize]))
        }
    }

    fn drain_until(
        cache: &mut TextureCache,
        backend: &mut NullBackend,
        want: usize,
    ) -> Vec<SlotId> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut ready = Vec::new();
        while ready.len() < want {
            ready.extend(cache.drain_completed(backend));
            assert!(Instant::now() < deadline, "decodes never arrived");
            std::thread::sleep(Duration::from_millis(2));
        }
        ready
    }

    #[test]
    fn slot_table_prefers_empty_then_lru() {
        let t0 = Instant::now();
        let mut table = SlotTable::new(2, t0);
        let (first, evicted) = table.claim(t0).unwrap();
        assert!(evicted.is_none());
        table.install(first, TextureHandle(1), MediaId::new("a"), t0);
        let (second, evicted) = table.claim(t0 + Duration::from_secs(1)).unwrap();
        assert!(evicted.is_none());
        assert_ne!(first, second);
        table.install(second, TextureHandle(2), MediaId::new("b"), t0 + Duration::from_secs(1));

        // Both full: the older slot is evicted.
        let (victim, evicted) = table.claim(t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(victim, first);
        assert_eq!(evicted, Some(TextureHandle(1)));
        assert!(!table.is_ready(victim));
    }

    #[test]
    fn pinned_slots_are_never_evicted() {
        let t0 = Instant::now();
        let mut table = SlotTable::new(2, t0);
        for (i, name) in ["a", "b"].iter().enumerate() {
            let (slot, _) = table.claim(t0).unwrap();
            table.install(slot, TextureHandle(i as u64), MediaId::new(*name), t0);
            table.pin(slot);
        }
        assert!(table.claim(t0 + Duration::from_secs(1)).is_none());

        table.unpin(SlotId(1));
        let (victim, evicted) = table.claim(t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(victim, SlotId(1));
        assert_eq!(evicted, Some(TextureHandle(1)));
    }

    #[test]
    fn displayed_handles_survive_excess_completions() {
        // N frames displaying, K > N completions: pinned handles never change.
        let mut cache = TextureCache::new(Box::new(FakeSource::with_entries(16)), 4, (8, 8), 7);
        let mut backend = NullBackend::default();
        for _ in 0..4 {
            cache.request();
        }
        let ready = drain_until(&mut cache, &mut backend, 4);
        let pinned: Vec<_> = ready
            .iter()
            .take(3)
            .map(|&slot| {
                cache.table_mut().pin(slot);
                (slot, cache.table().handle(slot).unwrap())
            })
            .collect();

        for _ in 0..10 {
            cache.request();
        }
        drain_until(&mut cache, &mut backend, 10);

        for (slot, handle) in pinned {
            assert!(cache.table().is_pinned(slot));
            assert_eq!(cache.table().handle(slot), Some(handle));
        }
    }

    #[test]
    fn ready_only_after_upload() {
        let mut cache = TextureCache::new(Box::new(FakeSource::with_entries(4)), 2, (8, 8), 1);
        let mut backend = NullBackend {
            fail_uploads: true,
            ..NullBackend::default()
        };
        cache.request();
        let deadline = Instant::now() + Duration::from_secs(5);
        while cache.pending() > 0 && Instant::now() < deadline {
            assert!(cache.drain_completed(&mut backend).is_empty());
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(cache.pending(), 0);
        assert!(cache.table().spare_ready().is_none());
    }

    #[test]
    fn decode_failures_retry_next_candidate() {
        let mut source = FakeSource::with_entries(3);
        source.broken.insert(MediaId::new("photo-0"));
        source.broken.insert(MediaId::new("photo-1"));
        let mut cache = TextureCache::new(Box::new(source), 2, (8, 8), 3);
        let mut backend = NullBackend::default();
        cache.request();
        let ready = drain_until(&mut cache, &mut backend, 1);
        assert_eq!(cache.table().media(ready[0]), Some(&MediaId::new("photo-2")));
    }

    #[test]
    fn force_empty_drops_in_flight_results() {
        let mut source = FakeSource::with_entries(4);
        source.decode_delay = Duration::from_millis(30);
        let mut cache = TextureCache::new(Box::new(source), 2, (8, 8), 5);
        let mut backend = NullBackend::default();
        cache.request();
        // The worker is mid-decode; force-flush bumps the generation.
        std::thread::sleep(Duration::from_millis(10));
        cache.empty_texture_queue(true);
        std::thread::sleep(Duration::from_millis(80));
        assert!(cache.drain_completed(&mut backend).is_empty());

        // The pipeline still works afterwards.
        cache.request();
        let ready = drain_until(&mut cache, &mut backend, 1);
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn pause_defers_new_decodes() {
        let mut cache = TextureCache::new(Box::new(FakeSource::with_entries(4)), 2, (8, 8), 9);
        let mut backend = NullBackend::default();
        cache.set_pause(true);
        cache.request();
        std::thread::sleep(Duration::from_millis(50));
        assert!(cache.drain_completed(&mut backend).is_empty());

        cache.set_pause(false);
        let ready = drain_until(&mut cache, &mut backend, 1);
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn empty_source_blocks_until_reload() {
        let entries = Arc::new(std::sync::Mutex::new(Vec::<MediaId>::new()));

        struct SharedSource(Arc<std::sync::Mutex<Vec<MediaId>>>);

        impl MediaSource for SharedSource {
            fn enumerate(&mut self) -> anyhow::Result<Vec<MediaId>> {
                Ok(self.0.lock().unwrap().clone())
            }

            fn decode(&mut self, _id: &MediaId, target: (u32, u32)) -> anyhow::Result<DecodedImage> {
                let (w, h) = (target.0.max(1), target.1.max(1));
                Ok(DecodedImage::new(w, h, vec![0u8; (w * h * 4) as usize]))
            }
        }

        let mut cache = TextureCache::new(
            Box::new(SharedSource(Arc::clone(&entries))),
            2,
            (8, 8),
            13,
        );
        let mut backend = NullBackend::default();
        cache.request();
        std::thread::sleep(Duration::from_millis(50));
        assert!(cache.drain_completed(&mut backend).is_empty());
        assert_eq!(cache.pending(), 1, "starved requests stay pending");

        entries.lock().unwrap().push(MediaId::new("late-arrival"));
        cache.reload_media();
        let ready = drain_until(&mut cache, &mut backend, 1);
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn total_decode_failure_keeps_the_request_alive() {
        let broken = Arc::new(std::sync::Mutex::new(true));

        struct FlakySource(Arc<std::sync::Mutex<bool>>);

        impl MediaSource for FlakySource {
            fn enumerate(&mut self) -> anyhow::Result<Vec<MediaId>> {
                Ok(vec![MediaId::new("flaky-0"), MediaId::new("flaky-1")])
            }

            fn decode(&mut self, id: &MediaId, target: (u32, u32)) -> anyhow::Result<DecodedImage> {
                if *self.0.lock().unwrap() {
                    return Err(anyhow!("corrupt entry {id}"));
                }
                let (w, h) = (target.0.max(1), target.1.max(1));
                Ok(DecodedImage::new(w, h, vec![0u8; (w * h * 4) as usize]))
            }
        }

        let mut cache = TextureCache::new(Box::new(FlakySource(Arc::clone(&broken))), 2, (8, 8), 17);
        let mut backend = NullBackend::default();
        cache.request();
        std::thread::sleep(Duration::from_millis(50));
        assert!(cache.drain_completed(&mut backend).is_empty());
        assert_eq!(cache.pending(), 1, "the failed request stays pending");

        // Once the source is healthy again, a reload resumes the queued
        // request and top_up only has to cover the true shortfall.
        *broken.lock().unwrap() = false;
        cache.reload_media();
        cache.top_up();
        assert_eq!(cache.pending(), 2);
        let ready = drain_until(&mut cache, &mut backend, 2);
        assert_eq!(ready.len(), 2);
    }

    #[test]
    fn top_up_requests_only_the_shortfall() {
        let mut cache = TextureCache::new(Box::new(FakeSource::with_entries(8)), 4, (8, 8), 11);
        let mut backend = NullBackend::default();
        cache.top_up();
        assert_eq!(cache.pending(), 4);
        drain_until(&mut cache, &mut backend, 4);

        // A full pool needs nothing.
        cache.top_up();
        assert_eq!(cache.pending(), 0);
    }

    #[test]
    fn recycle_destroys_every_texture() {
        let mut cache = TextureCache::new(Box::new(FakeSource::with_entries(4)), 3, (8, 8), 2);
        let mut backend = NullBackend::default();
        for _ in 0..3 {
            cache.request();
        }
        drain_until(&mut cache, &mut backend, 3);
        cache.recycle(&mut backend);
        assert_eq!(backend.destroyed.len(), 3);
        assert!(cache.table().spare_ready().is_none());
    }
}
