//! Top-level render orchestration.
//!
//! The [`Renderer`] owns the texture cache, the world, and the timers, and
//! exposes the lifecycle surface the host calls into: create/destroy,
//! pause/resume, surface callbacks, and the per-frame draw. Every method
//! that touches GPU-adjacent state runs on the GPU command thread; the
//! dispatcher enforces that.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use collageconfig::WallpaperConfig;
use tracing::{debug, info, warn};

use crate::cache::TextureCache;
use crate::dispatch::{DelayedEvent, DispatcherHandle, EngineEvent, GpuDispatcher, SettingsEvent};
use crate::media::MediaSource;
use crate::paint::PaintBackend;
use crate::types::{QuadParams, Rect, RenderMode};
use crate::world::World;

/// Slots kept beyond the on-screen frame count so a transition always has
/// spare incoming textures while every displayed slot stays pinned.
const SPARE_SLOTS: usize = 2;

static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct Renderer {
    instance: u64,
    config: WallpaperConfig,
    dispatcher: GpuDispatcher,
    /// Consumed by the texture cache on first surface creation.
    source: Option<Box<dyn MediaSource>>,
    cache: Option<TextureCache>,
    world: Option<World>,
    /// Last surface size seen, used to skip redundant resize callbacks.
    dims: Option<(u32, u32)>,
    /// Surface height minus the configured status-bar inset.
    measured_height: u32,
    transition_timer: Option<DelayedEvent>,
    scan_timer: Option<DelayedEvent>,
    seed: u64,
    paused: bool,
    destroyed: bool,
}

impl Renderer {
    pub fn new(config: WallpaperConfig, source: Box<dyn MediaSource>, seed: u64) -> Self {
        Self {
            instance: INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed),
            config,
            dispatcher: GpuDispatcher::new(),
            source: Some(source),
            cache: None,
            world: None,
            dims: None,
            measured_height: 0,
            transition_timer: None,
            scan_timer: None,
            seed,
            paused: false,
            destroyed: false,
        }
    }

    /// Producer handle for cross-thread collaborators (settings watcher,
    /// timers, the host event loop).
    pub fn handle(&self) -> DispatcherHandle {
        self.dispatcher.handle()
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn config(&self) -> &WallpaperConfig {
        &self.config
    }

    pub fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    pub fn cache(&self) -> Option<&TextureCache> {
        self.cache.as_ref()
    }

    /// Replaces the active configuration. Callers follow up with a
    /// [`SettingsEvent`] describing which parts of the pipeline must react.
    pub fn apply_config(&mut self, config: WallpaperConfig) {
        self.config = config;
    }

    pub fn on_create(&mut self) {
        info!(instance = self.instance, "renderer created");
        self.schedule_or_cancel_media_scan();
    }

    /// Tears the renderer down. Idempotent; all later callbacks are no-ops.
    /// Texture memory is released when the host drops its paint backend.
    pub fn on_destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.transition_timer = None;
        self.scan_timer = None;
        if let (Some(world), Some(cache)) = (&mut self.world, &mut self.cache) {
            world.recycle(cache);
        }
        self.world = None;
        // Dropping the cache stops the decode worker.
        self.cache = None;
        info!(instance = self.instance, "renderer destroyed");
    }

    /// The wallpaper became invisible: stop scheduling transitions and stop
    /// decoding. In-flight decodes finish and wait in the result queue.
    pub fn on_pause(&mut self) {
        if self.destroyed {
            return;
        }
        debug!(instance = self.instance, "paused");
        self.paused = true;
        self.transition_timer = None;
        if let Some(cache) = &self.cache {
            cache.set_pause(true);
        }
    }

    pub fn on_resume(&mut self) {
        if self.destroyed {
            return;
        }
        debug!(instance = self.instance, "resumed");
        self.paused = false;
        if let Some(cache) = &self.cache {
            cache.set_pause(false);
        }
        // The next frame re-arms the transition timer.
        self.dispatcher.handle().request_render();
    }

    /// First GPU callback after a surface (re)creation. The surface size is
    /// not known yet, so the decode target starts from the configured width
    /// hint; the first resize callback corrects it.
    pub fn on_surface_created(&mut self) {
        if self.destroyed {
            return;
        }
        self.dispatcher.assert_gpu_thread();
        self.dims = None;
        if self.cache.is_none() {
            if let Some(source) = self.source.take() {
                let frames = self
                    .config
                    .portrait_disposition
                    .frame_count()
                    .max(self.config.landscape_disposition.frame_count());
                let probe = (self.config.surface_hint_width / 2).max(1);
                self.cache = Some(TextureCache::new(
                    source,
                    frames + SPARE_SLOTS,
                    (probe, probe),
                    self.seed.wrapping_add(1),
                ));
                debug!(
                    instance = self.instance,
                    capacity = frames + SPARE_SLOTS,
                    probe,
                    "texture cache created"
                );
            }
        }
    }

    /// Surface resize. Redundant callbacks with the current size are
    /// ignored; a real change rebuilds the world for the new orientation.
    pub fn on_surface_changed(&mut self, backend: &mut dyn PaintBackend, width: u32, height: u32) {
        if self.destroyed {
            return;
        }
        self.dispatcher.assert_gpu_thread();
        if self.dims == Some((width, height)) {
            debug!(instance = self.instance, width, height, "surface size unchanged");
            return;
        }
        self.dims = Some((width, height));
        self.measured_height = height
            .saturating_sub(self.config.status_bar_inset)
            .max(1);
        backend.configure_surface(width, height);

        if let Some(cache) = &self.cache {
            cache.set_dimensions((width / 2).max(1), (self.measured_height / 2).max(1));
            cache.set_pause(false);
        }
        let mut world = self.world.take().unwrap_or_else(|| World::new(&self.config, self.seed));
        if let Some(cache) = &mut self.cache {
            world.recreate_world(cache, &self.config, width, self.measured_height, Instant::now());
        }
        self.world = Some(world);
        info!(
            instance = self.instance,
            width,
            height,
            measured_height = self.measured_height,
            "surface changed"
        );
        self.schedule_transition();
    }

    /// Per-frame callback: drain cross-thread events, upload finished
    /// decodes, draw the world, and settle the transition machine.
    pub fn on_draw_frame(&mut self, backend: &mut dyn PaintBackend) {
        if self.destroyed {
            return;
        }
        for event in self.dispatcher.drain() {
            self.handle_event(event);
        }

        let now = Instant::now();
        if let (Some(cache), Some(world)) = (&mut self.cache, &mut self.world) {
            let ready = cache.drain_completed(backend);
            world.assign_ready(cache, &ready, now);
            // Upload failures can leave the pool short; refill the shortfall.
            cache.top_up();
        }

        if let Err(err) = backend.begin_frame(self.config.background_color) {
            warn!(instance = self.instance, error = %err, "skipping frame");
            return;
        }
        let mut completed = false;
        let mut idle = false;
        if let (Some(cache), Some(world)) = (&mut self.cache, &mut self.world) {
            world.draw(cache, backend, now);
            if !world.has_running_transition(now) {
                if world.transition_timed_out(now) {
                    debug!(
                        instance = self.instance,
                        "transition exceeded its deadline; forcing completion"
                    );
                }
                completed = world.deselect_transition(cache, now);
            }
            idle = world.transition_is_idle();
        }
        if completed {
            self.dispatcher.set_render_mode(RenderMode::OnDemand);
            self.transition_timer = None;
        }
        // Re-arm only when the timer was consumed (or cancelled by a pause);
        // an armed timer is never reset by an intervening draw.
        if idle && self.transition_timer.is_none() {
            self.schedule_transition();
        }
        let overlay = self.config.overlay();
        if overlay.a > 0.0 {
            backend.draw_fill(overlay, QuadParams::still(Rect::FULLSCREEN));
        }
        if let Err(err) = backend.end_frame() {
            warn!(instance = self.instance, error = %err, "frame presentation failed");
        }
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Settings(settings) => self.handle_settings(settings),
            EngineEvent::SelectTransition => {
                // The one-shot timer just fired.
                self.transition_timer = None;
                let now = Instant::now();
                let mut selected = false;
                let mut idle = true;
                if let (Some(cache), Some(world)) = (&mut self.cache, &mut self.world) {
                    selected = world.select_transition(cache, now);
                    idle = world.transition_is_idle();
                }
                if selected {
                    self.dispatcher.set_render_mode(RenderMode::Continuous);
                } else if idle {
                    // Nothing to transition yet (no populated frame or no
                    // spare texture); try again after another interval.
                    self.schedule_transition();
                }
                // A select that arrived while a transition is still running
                // is dropped; the draw loop re-arms once the machine idles.
            }
            EngineEvent::MediaScanTick => {
                debug!(instance = self.instance, "periodic media scan");
                self.handle_settings(SettingsEvent {
                    media_reload: true,
                    ..SettingsEvent::default()
                });
            }
        }
    }

    /// Applies a settings notification. Flags are handled in a fixed order:
    /// empty the texture queue, reload media, react to the scan interval,
    /// recreate the world, redraw. A combined reload + interval change
    /// reschedules the scan exactly once.
    fn handle_settings(&mut self, settings: SettingsEvent) {
        debug!(instance = self.instance, ?settings, "applying settings notification");
        if settings.empty_texture_queue {
            if let Some(cache) = &mut self.cache {
                cache.empty_texture_queue(true);
            }
        }
        let mut rescheduled = false;
        if settings.media_reload {
            if let Some(cache) = &self.cache {
                cache.reload_media();
            }
            self.schedule_or_cancel_media_scan();
            rescheduled = true;
        }
        if settings.media_interval_changed && !rescheduled {
            self.schedule_or_cancel_media_scan();
        }
        if settings.recreate_world {
            if let (Some(cache), Some(world), Some((width, _))) =
                (&mut self.cache, &mut self.world, self.dims)
            {
                world.recreate_world(
                    cache,
                    &self.config,
                    width,
                    self.measured_height,
                    Instant::now(),
                );
            }
        }
        if settings.redraw {
            self.dispatcher.handle().request_render();
        }
    }

    /// Arms (or replaces) the inter-transition timer.
    fn schedule_transition(&mut self) {
        if self.destroyed || self.paused {
            return;
        }
        self.transition_timer = Some(DelayedEvent::schedule(
            self.dispatcher.handle(),
            self.config.transition_interval,
            EngineEvent::SelectTransition,
        ));
    }

    /// Arms the periodic media scan, or cancels it when the configured
    /// interval is zero.
    fn schedule_or_cancel_media_scan(&mut self) {
        if self.destroyed || !self.config.media_scan_enabled() {
            self.scan_timer = None;
            return;
        }
        self.scan_timer = Some(DelayedEvent::schedule(
            self.dispatcher.handle(),
            self.config.media_scan_interval,
            EngineEvent::MediaScanTick,
        ));
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.on_destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::thread;
    use std::time::Duration;

    use crate::types::{DecodedImage, MediaId};

    struct EmptySource;

    impl MediaSource for EmptySource {
        fn enumerate(&mut self) -> Result<Vec<MediaId>> {
            Ok(Vec::new())
        }

        fn decode(&mut self, _id: &MediaId, _target: (u32, u32)) -> Result<DecodedImage> {
            anyhow::bail!("no media")
        }
    }

    fn renderer_with(config: WallpaperConfig) -> Renderer {
        Renderer::new(config, Box::new(EmptySource), 7)
    }

    #[test]
    fn instances_get_distinct_ids() {
        let a = renderer_with(WallpaperConfig::default());
        let b = renderer_with(WallpaperConfig::default());
        assert_ne!(a.instance(), b.instance());
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut renderer = renderer_with(WallpaperConfig::default());
        renderer.on_create();
        renderer.on_surface_created();
        assert!(renderer.cache().is_some());
        renderer.on_destroy();
        assert!(renderer.cache().is_none());
        renderer.on_destroy();
        renderer.on_pause();
        renderer.on_resume();
    }

    #[test]
    fn media_scan_is_disabled_by_a_zero_interval() {
        let mut config = WallpaperConfig::default();
        config.media_scan_interval = Duration::ZERO;
        let mut renderer = renderer_with(config);
        renderer.on_create();
        assert!(renderer.scan_timer.is_none());

        let mut enabled = WallpaperConfig::default();
        enabled.media_scan_interval = Duration::from_secs(3600);
        renderer.apply_config(enabled);
        renderer.schedule_or_cancel_media_scan();
        assert!(renderer.scan_timer.is_some());
    }

    #[test]
    fn pause_cancels_the_transition_timer() {
        let mut config = WallpaperConfig::default();
        config.transition_interval = Duration::from_millis(20);
        let mut renderer = renderer_with(config);
        renderer.schedule_transition();
        renderer.on_pause();
        assert!(renderer.transition_timer.is_none());
        thread::sleep(Duration::from_millis(60));
        assert!(renderer.dispatcher.drain().is_empty(), "cancelled timer fired");
    }

    #[test]
    fn interval_change_alone_still_reschedules() {
        let mut config = WallpaperConfig::default();
        config.media_scan_interval = Duration::from_secs(3600);
        let mut renderer = renderer_with(config);
        renderer.handle_settings(SettingsEvent {
            media_interval_changed: true,
            ..SettingsEvent::default()
        });
        assert!(renderer.scan_timer.is_some());
    }

    #[test]
    fn combined_reload_and_interval_change_arms_one_scan() {
        let mut config = WallpaperConfig::default();
        config.media_scan_interval = Duration::from_millis(30);
        let mut renderer = renderer_with(config);
        renderer.handle_settings(SettingsEvent {
            media_reload: true,
            media_interval_changed: true,
            ..SettingsEvent::default()
        });
        assert!(renderer.scan_timer.is_some());

        thread::sleep(Duration::from_millis(60));
        let ticks = renderer
            .dispatcher
            .drain()
            .into_iter()
            .filter(|event| matches!(event, EngineEvent::MediaScanTick))
            .count();
        assert_eq!(ticks, 1, "both flags together arm a single scan timer");
    }
}
