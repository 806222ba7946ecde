//! The photo-frame grid and its displayed content.
//!
//! A [`World`] owns a fixed-size set of [`Frame`]s tiling the viewport
//! according to the orientation-appropriate disposition. The frame count is
//! immutable once created: a disposition change recreates the world
//! wholesale via [`World::recreate_world`], never resizes it in place.

use std::time::Instant;

use collageconfig::{Color, Disposition, EffectKind, WallpaperConfig};
use rand::prelude::*;
use tracing::debug;

use crate::cache::TextureCache;
use crate::paint::PaintBackend;
use crate::transition::TransitionEngine;
use crate::types::{QuadParams, Rect, SlotId};

/// Fraction of a cell's smaller dimension left as border around the photo.
const BORDER_FRACTION: f32 = 0.04;

/// One rectangular cell of the wallpaper grid.
#[derive(Debug)]
pub struct Frame {
    rect: Rect,
    slot: Option<SlotId>,
    pending: Option<SlotId>,
    last_changed: Instant,
}

impl Frame {
    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn slot(&self) -> Option<SlotId> {
        self.slot
    }

    pub fn pending(&self) -> Option<SlotId> {
        self.pending
    }
}

pub struct World {
    frames: Vec<Frame>,
    disposition: Disposition,
    effects: Vec<EffectKind>,
    border: Color,
    engine: TransitionEngine,
    rng: StdRng,
}

impl World {
    pub fn new(config: &WallpaperConfig, seed: u64) -> Self {
        Self {
            frames: Vec::new(),
            disposition: config.landscape_disposition,
            effects: config.effects.clone(),
            border: config.border_color,
            engine: TransitionEngine::new(config.transition_max_duration),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Lays out the grid for the given viewport and requests an initial
    /// texture for every frame. Any in-flight transition is dropped.
    pub fn recreate_world(
        &mut self,
        cache: &mut TextureCache,
        config: &WallpaperConfig,
        width: u32,
        height: u32,
        now: Instant,
    ) {
        self.release_slots(cache);
        self.engine.reset();
        self.engine.set_max_duration(config.transition_max_duration);
        self.effects = config.effects.clone();
        self.border = config.border_color;
        self.disposition = config.disposition_for(width, height);

        let rows = self.disposition.rows;
        let cols = self.disposition.cols;
        let cell_w = 2.0 / cols as f32;
        let cell_h = 2.0 / rows as f32;
        self.frames = (0..rows)
            .flat_map(|row| {
                (0..cols).map(move |col| Frame {
                    rect: Rect::new(
                        -1.0 + col as f32 * cell_w,
                        -1.0 + row as f32 * cell_h,
                        cell_w,
                        cell_h,
                    ),
                    slot: None,
                    pending: None,
                    last_changed: now,
                })
            })
            .collect();

        // One fresh decode per frame (replacing whatever the cache held),
        // then fill the remaining slots so transitions have spares.
        for _ in 0..self.frames.len() {
            cache.request();
        }
        cache.top_up();
        debug!(rows, cols, width, height, "recreated world");
    }

    /// Hands newly ready texture slots to frames still waiting for content;
    /// leftovers remain in the cache as transition spares.
    pub fn assign_ready(&mut self, cache: &mut TextureCache, ready: &[SlotId], now: Instant) {
        for &slot in ready {
            let Some(frame) = self.frames.iter_mut().find(|frame| frame.slot.is_none()) else {
                break;
            };
            frame.slot = Some(slot);
            frame.last_changed = now;
            cache.table_mut().pin(slot);
        }
    }

    /// Issues one draw call per frame. A frame mid-transition draws both its
    /// outgoing and incoming textures with the effect's blend parameters.
    pub fn draw(&self, cache: &mut TextureCache, backend: &mut dyn PaintBackend, now: Instant) {
        let blending = self.engine.blend(now);
        for (index, frame) in self.frames.iter().enumerate() {
            if self.border.a > 0.0 {
                backend.draw_fill(self.border, QuadParams::still(frame.rect));
            }
            let photo_rect = frame.rect.inset_by_fraction(BORDER_FRACTION);
            match blending {
                Some((running, blend)) if running == index => {
                    if let Some(handle) = frame.slot.and_then(|slot| cache.table().handle(slot)) {
                        backend.draw_photo(
                            handle,
                            QuadParams {
                                rect: photo_rect,
                                offset: (blend.out_offset_x, 0.0),
                                x_scale: blend.out_x_scale,
                                alpha: blend.out_alpha,
                            },
                        );
                    }
                    if let Some(handle) = frame.pending.and_then(|slot| cache.table().handle(slot))
                    {
                        backend.draw_photo(
                            handle,
                            QuadParams {
                                rect: photo_rect,
                                offset: (blend.in_offset_x, 0.0),
                                x_scale: blend.in_x_scale,
                                alpha: blend.in_alpha,
                            },
                        );
                    }
                }
                _ => {
                    if let Some(slot) = frame.slot {
                        if let Some(handle) = cache.table().handle(slot) {
                            backend.draw_photo(handle, QuadParams::still(photo_rect));
                        }
                    }
                }
            }
            if let Some(slot) = frame.slot {
                cache.table_mut().mark_used(slot, now);
            }
        }
    }

    pub fn has_running_transition(&self, now: Instant) -> bool {
        self.engine.has_running(now)
    }

    pub fn transition_timed_out(&self, now: Instant) -> bool {
        self.engine.timed_out(now)
    }

    /// True when no transition is selected, running, or completing.
    pub fn transition_is_idle(&self) -> bool {
        self.engine.is_idle()
    }

    /// Picks the least recently changed populated frame and a spare ready
    /// texture, then starts the transition. Returns false when nothing can
    /// transition yet (already running, no candidate, or no spare).
    pub fn select_transition(&mut self, cache: &mut TextureCache, now: Instant) -> bool {
        if !self.engine.begin_select() {
            return false;
        }
        let candidate = self
            .frames
            .iter()
            .enumerate()
            .filter(|(_, frame)| frame.slot.is_some())
            .min_by_key(|(_, frame)| frame.last_changed)
            .map(|(index, _)| index);
        let spare = cache.table().spare_ready();
        match (candidate, spare) {
            (Some(index), Some(slot)) => {
                self.frames[index].pending = Some(slot);
                cache.table_mut().pin(slot);
                let kind = *self.effects.choose(&mut self.rng).unwrap_or(&EffectKind::Fade);
                self.engine.commit(index, kind, now);
                debug!(frame = index, ?kind, "selected transition");
                true
            }
            _ => {
                debug!("no transition candidate available");
                self.engine.abort_select();
                false
            }
        }
    }

    /// Commits the running transition's pending texture into its frame and
    /// returns the engine to idle. Returns true when a transition was
    /// actually completed.
    pub fn deselect_transition(&mut self, cache: &mut TextureCache, now: Instant) -> bool {
        let Some(index) = self.engine.begin_complete() else {
            return false;
        };
        let frame = &mut self.frames[index];
        if let Some(pending) = frame.pending.take() {
            if let Some(old) = frame.slot.replace(pending) {
                cache.table_mut().unpin(old);
                cache.table_mut().mark_used(old, now);
            }
            frame.last_changed = now;
            // Refill the pool so the next transition has a fresh spare.
            cache.request();
        }
        self.engine.finish();
        true
    }

    /// Releases every frame's texture reference and clears the grid. Slot
    /// eviction stays with the texture cache.
    pub fn recycle(&mut self, cache: &mut TextureCache) {
        self.release_slots(cache);
        self.frames.clear();
        self.engine.reset();
    }

    fn release_slots(&mut self, cache: &mut TextureCache) {
        for frame in &mut self.frames {
            if let Some(slot) = frame.slot.take() {
                cache.table_mut().unpin(slot);
            }
            if let Some(slot) = frame.pending.take() {
                cache.table_mut().unpin(slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::time::Duration;

    use crate::media::MediaSource;
    use crate::paint::DrawError;
    use crate::types::{DecodedImage, MediaId, TextureHandle};

    struct EmptySource;

    impl MediaSource for EmptySource {
        fn enumerate(&mut self) -> Result<Vec<MediaId>> {
            Ok(Vec::new())
        }

        fn decode(&mut self, _id: &MediaId, _target: (u32, u32)) -> Result<DecodedImage> {
            anyhow::bail!("no media")
        }
    }

    #[derive(Default)]
    struct RecordingBackend {
        photos: Vec<(TextureHandle, QuadParams)>,
        fills: Vec<(Color, QuadParams)>,
    }

    impl PaintBackend for RecordingBackend {
        fn configure_surface(&mut self, _width: u32, _height: u32) {}

        fn create_texture(&mut self, _image: &DecodedImage, _label: &str) -> Result<TextureHandle> {
            unreachable!("world tests install textures directly")
        }

        fn destroy_texture(&mut self, _handle: TextureHandle) {}

        fn begin_frame(&mut self, _clear: Color) -> Result<(), DrawError> {
            Ok(())
        }

        fn draw_photo(&mut self, texture: TextureHandle, quad: QuadParams) {
            self.photos.push((texture, quad));
        }

        fn draw_fill(&mut self, color: Color, quad: QuadParams) {
            self.fills.push((color, quad));
        }

        fn end_frame(&mut self) -> Result<(), DrawError> {
            Ok(())
        }
    }

    fn cache_with_capacity(capacity: usize) -> TextureCache {
        TextureCache::new(Box::new(EmptySource), capacity, (8, 8), 0)
    }

    /// Installs `count` ready slots directly, bypassing the worker.
    fn install_ready(cache: &mut TextureCache, count: usize, now: Instant) -> Vec<SlotId> {
        (0..count)
            .map(|i| {
                let (slot, _) = cache.table_mut().claim(now).expect("slot available");
                cache.table_mut().install(
                    slot,
                    TextureHandle(100 + i as u64),
                    MediaId::new(format!("img-{i}")),
                    now,
                );
                slot
            })
            .collect()
    }

    fn config_3x2() -> WallpaperConfig {
        WallpaperConfig {
            landscape_disposition: Disposition { rows: 2, cols: 3 },
            portrait_disposition: Disposition { rows: 3, cols: 2 },
            ..WallpaperConfig::default()
        }
    }

    fn populated_world(cache: &mut TextureCache, now: Instant) -> World {
        let config = config_3x2();
        let mut world = World::new(&config, 42);
        world.recreate_world(cache, &config, 1920, 1080, now);
        let ready = install_ready(cache, 6, now);
        world.assign_ready(cache, &ready, now);
        world
    }

    #[test]
    fn layout_tiles_the_viewport() {
        let now = Instant::now();
        let mut cache = cache_with_capacity(8);
        let config = config_3x2();
        let mut world = World::new(&config, 1);
        world.recreate_world(&mut cache, &config, 1920, 1080, now);

        assert_eq!(world.frame_count(), 6);
        assert_eq!(cache.pending(), cache.table().capacity());
        let cell_w = 2.0 / 3.0;
        let cell_h = 1.0;
        for (index, frame) in world.frames().iter().enumerate() {
            let rect = frame.rect();
            assert!((rect.w - cell_w).abs() < 1e-6);
            assert!((rect.h - cell_h).abs() < 1e-6);
            let col = index % 3;
            let row = index / 3;
            assert!((rect.x - (-1.0 + col as f32 * cell_w)).abs() < 1e-6);
            assert!((rect.y - (-1.0 + row as f32 * cell_h)).abs() < 1e-6);
        }
    }

    #[test]
    fn orientation_switches_disposition() {
        let now = Instant::now();
        let mut cache = cache_with_capacity(8);
        let config = config_3x2();
        let mut world = World::new(&config, 1);
        world.recreate_world(&mut cache, &config, 1080, 1920, now);
        assert_eq!(world.frame_count(), 6);
        let rect = world.frames()[0].rect();
        // Portrait: 3 rows x 2 cols.
        assert!((rect.w - 1.0).abs() < 1e-6);
        assert!((rect.h - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn assign_ready_pins_and_fills_in_order() {
        let now = Instant::now();
        let mut cache = cache_with_capacity(8);
        let world = populated_world(&mut cache, now);
        for frame in world.frames() {
            let slot = frame.slot().expect("frame populated");
            assert!(cache.table().is_pinned(slot));
            assert!(cache.table().is_ready(slot));
        }
    }

    #[test]
    fn draw_only_uses_ready_textures() {
        let now = Instant::now();
        let mut cache = cache_with_capacity(8);
        let config = config_3x2();
        let mut world = World::new(&config, 3);
        world.recreate_world(&mut cache, &config, 1920, 1080, now);
        // Populate only half the frames.
        let ready = install_ready(&mut cache, 3, now);
        world.assign_ready(&mut cache, &ready, now);

        let mut backend = RecordingBackend::default();
        world.draw(&mut cache, &mut backend, now);
        assert_eq!(backend.photos.len(), 3);
        assert_eq!(backend.fills.len(), 6, "every cell draws its border");
    }

    #[test]
    fn select_prefers_least_recently_changed() {
        let t0 = Instant::now();
        let mut cache = cache_with_capacity(8);
        let mut world = populated_world(&mut cache, t0);
        // Age frame 2 back so it is the stalest.
        world.frames[2].last_changed = t0 - Duration::from_secs(60);
        install_ready(&mut cache, 1, t0 + Duration::from_secs(1));

        assert!(world.select_transition(&mut cache, t0 + Duration::from_secs(2)));
        assert_eq!(world.engine.running_frame(), Some(2));
        assert!(world.frames()[2].pending().is_some());
        let pending = world.frames()[2].pending().unwrap();
        assert!(cache.table().is_pinned(pending));
    }

    #[test]
    fn select_fails_without_spare_texture() {
        let now = Instant::now();
        let mut cache = cache_with_capacity(6);
        let mut world = populated_world(&mut cache, now);
        // All six slots are pinned to frames; no spare exists.
        assert!(!world.select_transition(&mut cache, now));
        assert!(!world.has_running_transition(now));
        // Failure leaves the engine idle, so a later attempt may succeed.
        assert!(world.engine.is_idle());
    }

    #[test]
    fn second_select_is_deferred_while_running() {
        let t0 = Instant::now();
        let mut cache = cache_with_capacity(8);
        let mut world = populated_world(&mut cache, t0);
        install_ready(&mut cache, 2, t0);
        assert!(world.select_transition(&mut cache, t0));
        assert!(!world.select_transition(&mut cache, t0 + Duration::from_millis(10)));
        let running: Vec<_> = world
            .frames()
            .iter()
            .filter(|frame| frame.pending().is_some())
            .collect();
        assert_eq!(running.len(), 1, "at most one transition in flight");
    }

    #[test]
    fn deselect_commits_pending_and_requests_refill() {
        let t0 = Instant::now();
        let mut cache = cache_with_capacity(8);
        let mut world = populated_world(&mut cache, t0);
        install_ready(&mut cache, 1, t0);
        let pending_before = cache.pending();
        assert!(world.select_transition(&mut cache, t0));
        let index = world.engine.running_frame().unwrap();
        let old = world.frames()[index].slot().unwrap();
        let incoming = world.frames()[index].pending().unwrap();

        world.deselect_transition(&mut cache, t0 + Duration::from_secs(1));
        assert_eq!(world.frames()[index].slot(), Some(incoming));
        assert!(world.frames()[index].pending().is_none());
        assert!(!cache.table().is_pinned(old), "old slot becomes evictable");
        assert!(cache.table().is_pinned(incoming));
        assert_eq!(cache.pending(), pending_before + 1, "refill requested");
        assert!(world.engine.is_idle());
    }

    #[test]
    fn deselect_without_transition_is_a_no_op() {
        let now = Instant::now();
        let mut cache = cache_with_capacity(8);
        let mut world = populated_world(&mut cache, now);
        assert!(!world.deselect_transition(&mut cache, now));
        assert!(world.engine.is_idle());
    }

    #[test]
    fn recycle_releases_references_but_not_slots() {
        let now = Instant::now();
        let mut cache = cache_with_capacity(8);
        let mut world = populated_world(&mut cache, now);
        world.recycle(&mut cache);
        assert_eq!(world.frame_count(), 0);
        // Textures stay in the cache; only the pins are gone.
        assert!(cache.table().spare_ready().is_some());
    }
}
